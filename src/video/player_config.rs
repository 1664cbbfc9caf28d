//! Resolver for hosts that publish a JSON player configuration (Vimeo style).
//!
//! Recognised embeds:
//! - `https://player.<host>/video/<id>`
//! - `https://<host>/<id>` and `https://www.<host>/<id>`
//!
//! The configuration lives at `<config_base>/video/<id>/config`.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::{Rendition, ResolveError, SubtitleTrack, VideoAsset, VideoResolver, select_playable};
use crate::download::HttpClient;
use crate::entry::Link;

const DEFAULT_HOST: &str = "vimeo.com";
const DEFAULT_CONFIG_BASE: &str = "https://player.vimeo.com";

#[allow(clippy::expect_used)]
static NUMERIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("numeric id regex is valid")); // Static pattern, safe to panic

#[allow(clippy::expect_used)]
static DEFAULT_CONFIG_URL: LazyLock<Url> = LazyLock::new(|| {
    Url::parse(DEFAULT_CONFIG_BASE).expect("default config base is a valid URL") // Static literal, safe to panic
});

#[derive(Debug, Deserialize)]
struct PlayerConfig {
    #[serde(default)]
    request: RequestSection,
    #[serde(default)]
    video: VideoSection,
    #[serde(default)]
    embed: EmbedSection,
}

#[derive(Debug, Default, Deserialize)]
struct RequestSection {
    #[serde(default)]
    files: FilesSection,
    #[serde(default)]
    text_tracks: Vec<TextTrack>,
}

#[derive(Debug, Default, Deserialize)]
struct FilesSection {
    #[serde(default)]
    progressive: Vec<ProgressiveFile>,
    #[serde(default)]
    audio: Vec<ProgressiveFile>,
}

#[derive(Debug, Deserialize)]
struct ProgressiveFile {
    url: String,
    #[serde(default)]
    mime: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    default: bool,
    #[serde(default)]
    public: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TextTrack {
    url: String,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default = "default_track_kind")]
    kind: String,
}

fn default_track_kind() -> String {
    "subtitles".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct VideoSection {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbs: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbedSection {
    #[serde(default)]
    color: Option<String>,
}

impl From<&ProgressiveFile> for Rendition {
    fn from(file: &ProgressiveFile) -> Self {
        Self {
            url: file.url.clone(),
            mime: file.mime.clone(),
            width: file.width,
            is_default: file.default,
            is_public: file.public,
        }
    }
}

/// Resolves player embeds through the host's config endpoint.
#[derive(Debug, Clone)]
pub struct PlayerConfigResolver {
    client: HttpClient,
    host: String,
    config_base: Url,
}

impl PlayerConfigResolver {
    /// Resolver for the default host.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            host: DEFAULT_HOST.to_string(),
            config_base: DEFAULT_CONFIG_URL.clone(),
        }
    }

    /// Resolver for `host` whose configs are served from `config_base`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnrecognizedUrl`] if `config_base` is not a URL.
    pub fn with_config_base(
        client: HttpClient,
        host: impl Into<String>,
        config_base: &str,
    ) -> Result<Self, ResolveError> {
        let config_base =
            Url::parse(config_base).map_err(|_| ResolveError::unrecognized(config_base))?;
        Ok(Self {
            client,
            host: host.into().to_ascii_lowercase(),
            config_base,
        })
    }

    /// Video id of a recognised embed URL.
    fn video_id(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

        if host == format!("player.{}", self.host) {
            return match segments.as_slice() {
                ["video", id, ..] if NUMERIC_ID.is_match(id) => Some((*id).to_string()),
                _ => None,
            };
        }
        if host == self.host || host == format!("www.{}", self.host) {
            return segments
                .iter()
                .find(|segment| NUMERIC_ID.is_match(segment))
                .map(|id| (*id).to_string());
        }
        None
    }

    fn config_url(&self, id: &str) -> Result<Url, ResolveError> {
        let base = self.config_base.as_str().trim_end_matches('/');
        let raw = format!("{base}/video/{id}/config");
        Url::parse(&raw).map_err(|_| ResolveError::unrecognized(raw))
    }
}

#[async_trait]
impl VideoResolver for PlayerConfigResolver {
    fn name(&self) -> &'static str {
        "player-config"
    }

    fn can_handle(&self, link: &Link) -> bool {
        self.video_id(link.source_url()).is_some()
    }

    #[instrument(skip(self, link, token), fields(url = %link.source_url()))]
    async fn resolve(
        &self,
        link: &Link,
        token: &CancellationToken,
    ) -> Result<VideoAsset, ResolveError> {
        let embed_url = link.source_url();
        let id = self
            .video_id(embed_url)
            .ok_or_else(|| ResolveError::unrecognized(embed_url))?;
        let config_url = self.config_url(&id)?;
        debug!(config = %config_url, "fetching player config");

        let config: PlayerConfig = self
            .client
            .fetch_json(&config_url, token)
            .await
            .map_err(|e| ResolveError::fetch(config_url.as_str(), e))?;

        let files = &config.request.files;
        let (renditions, is_audio) = if files.progressive.is_empty() {
            (&files.audio, true)
        } else {
            (&files.progressive, false)
        };
        let renditions: Vec<Rendition> = renditions.iter().map(Rendition::from).collect();
        if renditions.is_empty() {
            return Err(ResolveError::invalid_metadata(
                config_url.as_str(),
                "no progressive or audio files",
            ));
        }
        let chosen =
            select_playable(&renditions).ok_or_else(|| ResolveError::no_playable_asset(embed_url))?;

        let subtitles = config
            .request
            .text_tracks
            .iter()
            .filter_map(|track| {
                let url = config_url.join(&track.url).ok()?;
                Some(SubtitleTrack {
                    url: url.to_string(),
                    language: track.lang.clone(),
                    label: track.label.clone(),
                    kind: track.kind.clone(),
                })
            })
            .collect();

        Ok(VideoAsset {
            url: chosen.url.clone(),
            poster_url: largest_thumb(&config.video.thumbs),
            subtitles,
            is_audio,
            display_name: config.video.title,
            color_hint: config.embed.color,
        })
    }
}

/// Widest numbered thumbnail, else `base`.
fn largest_thumb(thumbs: &HashMap<String, String>) -> Option<String> {
    thumbs
        .iter()
        .filter_map(|(size, url)| size.parse::<u32>().ok().map(|size| (size, url)))
        .max_by_key(|(size, _)| *size)
        .map(|(_, url)| url.clone())
        .or_else(|| thumbs.get("base").cloned())
}
