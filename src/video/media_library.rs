//! Resolver for LMS media library iframes.
//!
//! `/media_objects_iframe/<id>` and `/media_attachments_iframe/<id>` embeds
//! describe themselves at `/media_objects/<id>/info` on the same origin.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::{Rendition, ResolveError, SubtitleTrack, VideoAsset, VideoResolver, select_playable};
use crate::download::HttpClient;
use crate::entry::Link;

const IFRAME_SEGMENTS: [&str; 2] = ["media_objects_iframe", "media_attachments_iframe"];

#[derive(Debug, Deserialize)]
struct MediaInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    media_sources: Vec<MediaSource>,
    #[serde(default)]
    poster_url: Option<String>,
    #[serde(default)]
    media_tracks: Vec<MediaTrack>,
}

#[derive(Debug, Deserialize)]
struct MediaSource {
    url: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MediaTrack {
    src: String,
    #[serde(default)]
    srclang: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default = "default_kind")]
    kind: String,
}

fn default_kind() -> String {
    "subtitles".to_string()
}

/// Resolves media library embeds through their info endpoint.
#[derive(Debug, Clone)]
pub struct MediaLibraryResolver {
    client: HttpClient,
}

impl MediaLibraryResolver {
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Info document URL for an embed, if the embed is recognised.
    fn info_url(url: &str) -> Option<Url> {
        let url = Url::parse(url).ok()?;
        let segments: Vec<&str> = url.path_segments()?.collect();
        let position = segments
            .iter()
            .position(|segment| IFRAME_SEGMENTS.contains(segment))?;
        let id = segments.get(position + 1).filter(|id| !id.is_empty())?;
        url.join(&format!("/media_objects/{id}/info")).ok()
    }
}

#[async_trait]
impl VideoResolver for MediaLibraryResolver {
    fn name(&self) -> &'static str {
        "media-library"
    }

    fn can_handle(&self, link: &Link) -> bool {
        Self::info_url(link.source_url()).is_some()
    }

    #[instrument(skip(self, link, token), fields(url = %link.source_url()))]
    async fn resolve(
        &self,
        link: &Link,
        token: &CancellationToken,
    ) -> Result<VideoAsset, ResolveError> {
        let embed_url = link.source_url();
        let info_url = Self::info_url(embed_url).ok_or_else(|| ResolveError::unrecognized(embed_url))?;
        debug!(info = %info_url, "fetching media info");

        let info: MediaInfo = self
            .client
            .fetch_json(&info_url, token)
            .await
            .map_err(|e| ResolveError::fetch(info_url.as_str(), e))?;

        if info.media_sources.is_empty() {
            return Err(ResolveError::invalid_metadata(
                info_url.as_str(),
                "media_sources is empty",
            ));
        }
        let renditions: Vec<Rendition> = info
            .media_sources
            .iter()
            .map(|source| Rendition {
                url: source.url.clone(),
                mime: source.content_type.clone(),
                width: source.width.unwrap_or(0),
                ..Rendition::default()
            })
            .collect();
        let chosen =
            select_playable(&renditions).ok_or_else(|| ResolveError::no_playable_asset(embed_url))?;
        let media_url = info_url
            .join(&chosen.url)
            .map_err(|_| ResolveError::invalid_metadata(info_url.as_str(), "unusable source url"))?;

        let subtitles = info
            .media_tracks
            .iter()
            .filter_map(|track| {
                let url = info_url.join(&track.src).ok()?;
                Some(SubtitleTrack {
                    url: url.to_string(),
                    language: track.srclang.clone(),
                    label: track.label.clone(),
                    kind: track.kind.clone(),
                })
            })
            .collect();

        let poster_url = info
            .poster_url
            .as_deref()
            .and_then(|poster| info_url.join(poster).ok())
            .map(String::from);

        Ok(VideoAsset {
            url: media_url.to_string(),
            poster_url,
            subtitles,
            is_audio: info
                .media_type
                .as_deref()
                .is_some_and(|kind| kind.eq_ignore_ascii_case("audio")),
            display_name: info.title,
            color_hint: None,
        })
    }
}
