//! Video-host embed resolution.
//!
//! An iframe or a scripted `<video data-setup>` player points at a hosted
//! video page, not a media file. Resolvers fetch the host's metadata document
//! and pick one playable rendition plus its poster and caption tracks.
//!
//! # Architecture
//!
//! - [`VideoResolver`] - async trait each host integration implements
//! - [`ResolverRegistry`] - ordered resolvers; the first capable one wins
//! - [`PlayerConfigResolver`] - player-config JSON hosts (Vimeo style)
//! - [`MediaLibraryResolver`] - LMS media library iframes
//!
//! # Example
//!
//! ```no_run
//! use offline_core::download::HttpClient;
//! use offline_core::entry::Link;
//! use offline_core::video::build_default_resolver_registry;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = build_default_resolver_registry(&HttpClient::for_resolvers(10, 30));
//! let link = Link::new(
//!     "https://player.vimeo.com/video/76979871",
//!     "https://player.vimeo.com/video/76979871",
//!     "iframe",
//!     "src",
//! );
//! let asset = registry.resolve(&link, &CancellationToken::new()).await?;
//! println!("media: {}", asset.url);
//! # Ok(())
//! # }
//! ```

mod error;
mod media_library;
mod player_config;
mod registry;

pub use error::ResolveError;
pub use media_library::MediaLibraryResolver;
pub use player_config::PlayerConfigResolver;
pub use registry::ResolverRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::download::HttpClient;
use crate::entry::Link;

/// Containers the offline player can render.
const PLAYABLE_MIME_TYPES: [&str; 4] = ["video/mp4", "audio/mp4", "audio/mpeg", "audio/mp3"];

/// A caption or subtitle track attached to a resolved video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub url: String,
    pub language: Option<String>,
    pub label: Option<String>,
    /// `subtitles`, `captions`, ...
    pub kind: String,
}

/// A playable asset resolved from an embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAsset {
    /// Direct media URL.
    pub url: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
    #[serde(default)]
    pub is_audio: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Player accent colour, as the host reports it (`00adef`).
    #[serde(default)]
    pub color_hint: Option<String>,
}

impl VideoAsset {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            poster_url: None,
            subtitles: Vec::new(),
            is_audio: false,
            display_name: None,
            color_hint: None,
        }
    }
}

/// Trait every video-host integration implements.
///
/// Uses `async_trait` so resolvers can live in a `Vec<Box<dyn VideoResolver>>`.
#[async_trait]
pub trait VideoResolver: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Returns true if this resolver understands the link's URL.
    fn can_handle(&self, link: &Link) -> bool;

    /// Fetches host metadata and selects one playable rendition.
    async fn resolve(
        &self,
        link: &Link,
        token: &CancellationToken,
    ) -> Result<VideoAsset, ResolveError>;
}

/// Links that must be resolved before they can be downloaded.
#[must_use]
pub fn is_video_candidate(link: &Link) -> bool {
    link.tag == "iframe" || (link.tag == "video" && link.attribute == "data-setup")
}

/// One rendition offered by a host.
#[derive(Debug, Clone, Default)]
pub(crate) struct Rendition {
    pub url: String,
    pub mime: String,
    pub width: u32,
    pub is_default: bool,
    /// Absent flag counts as public.
    pub is_public: Option<bool>,
}

/// Picks the rendition to download.
///
/// Only playable containers are considered. A host-flagged default wins,
/// then the first public entry, then the widest.
pub(crate) fn select_playable(renditions: &[Rendition]) -> Option<&Rendition> {
    let playable: Vec<&Rendition> = renditions
        .iter()
        .filter(|r| {
            PLAYABLE_MIME_TYPES
                .iter()
                .any(|mime| r.mime.eq_ignore_ascii_case(mime))
        })
        .collect();

    playable
        .iter()
        .find(|r| r.is_default)
        .or_else(|| playable.iter().find(|r| r.is_public.unwrap_or(true)))
        .or_else(|| playable.iter().max_by_key(|r| r.width))
        .copied()
}

/// Builds the resolver registry used by the pipeline.
#[must_use]
pub fn build_default_resolver_registry(client: &HttpClient) -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    registry.register(Box::new(PlayerConfigResolver::new(client.clone())));
    registry.register(Box::new(MediaLibraryResolver::new(client.clone())));
    registry
}
