//! Discovered references and their roles.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::video::VideoAsset;

/// Role of a link, derived from the tag it was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    Stylesheet,
    Iframe,
    Video,
    Audio,
    Image,
    Source,
    WebLink,
}

/// One embeddable reference discovered in a part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Attribute value exactly as it appeared in the markup.
    pub original_url: String,
    /// `original_url` resolved against the part's base URL.
    pub absolute_url: String,
    /// Media URL produced by video resolution, when applicable.
    #[serde(default)]
    pub extracted_url: Option<String>,
    /// Bundle-relative path once downloaded. Set exactly once.
    #[serde(default)]
    pub downloaded_path: Option<String>,
    /// Lowercase tag name (`img`, `iframe`, ...); empty for URL parts.
    pub tag: String,
    /// Attribute the value came from (`src`, `href`, `poster`, `data-setup`).
    pub attribute: String,
    /// Resolved video metadata baked into the rewritten markup.
    #[serde(default)]
    pub video: Option<VideoAsset>,
}

impl Link {
    /// Creates an un-downloaded link.
    #[must_use]
    pub fn new(
        original_url: impl Into<String>,
        absolute_url: impl Into<String>,
        tag: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            original_url: original_url.into(),
            absolute_url: absolute_url.into(),
            extracted_url: None,
            downloaded_path: None,
            tag: tag.into(),
            attribute: attribute.into(),
            video: None,
        }
    }

    /// Link standing for an opaque URL part (e.g. a launch target).
    #[must_use]
    pub fn pointer(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::new(url.clone(), url, "", "url")
    }

    /// URL to fetch: the extracted one if present, else the absolute one.
    #[must_use]
    pub fn source_url(&self) -> &str {
        self.extracted_url.as_deref().unwrap_or(&self.absolute_url)
    }

    /// Whether the asset is already on disk.
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        self.downloaded_path.is_some()
    }

    /// Records the local path. Returns `false` and leaves the link untouched
    /// if it was already downloaded.
    pub fn mark_downloaded(&mut self, path: impl Into<String>) -> bool {
        if let Some(existing) = &self.downloaded_path {
            warn!(url = %self.absolute_url, path = %existing, "link already downloaded; keeping first path");
            return false;
        }
        self.downloaded_path = Some(path.into());
        true
    }

    /// Classifies the link by tag.
    #[must_use]
    pub fn role(&self) -> LinkRole {
        match self.tag.as_str() {
            "link" => LinkRole::Stylesheet,
            "iframe" => LinkRole::Iframe,
            "video" => LinkRole::Video,
            "audio" => LinkRole::Audio,
            "img" => LinkRole::Image,
            "source" | "track" => LinkRole::Source,
            _ => LinkRole::WebLink,
        }
    }
}
