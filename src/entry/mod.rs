//! Capturable entries, their parts, and discovered links.

mod link;
mod status;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use link::{Link, LinkRole};
pub use status::EntryStatus;

use crate::error::CaptureError;
use crate::extract::extract_links;

/// Identity of an entry: unique per `(id, content_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub id: String,
    pub content_type: String,
}

impl EntryKey {
    #[must_use]
    pub fn new(id: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_type: content_type.into(),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.content_type, self.id)
    }
}

/// What a part holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartKind {
    /// An HTML body, rewritten in place as links are downloaded.
    Html {
        html: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    /// An opaque pointer, downloaded as a single asset.
    Url { url: String },
}

/// One HTML blob or URL pointer owned by an [`Entry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub kind: PartKind,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Set once extraction has run, even if it found nothing.
    #[serde(default)]
    pub links_extracted: bool,
}

impl Part {
    /// HTML part with an optional base URL for relative references.
    #[must_use]
    pub fn html(html: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            kind: PartKind::Html {
                html: html.into(),
                base_url,
            },
            links: Vec::new(),
            links_extracted: false,
        }
    }

    /// URL pointer part.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            kind: PartKind::Url { url: url.into() },
            links: Vec::new(),
            links_extracted: false,
        }
    }

    /// Populates `links` on the first call; later calls leave them untouched.
    ///
    /// # Errors
    ///
    /// [`CaptureError::MarkupParse`] for an empty document and
    /// [`CaptureError::Cancelled`] when `token` fires mid-scan.
    pub fn ensure_links(&mut self, token: &CancellationToken) -> Result<(), CaptureError> {
        if self.links_extracted {
            debug!(links = self.links.len(), "links already extracted; reusing");
            return Ok(());
        }
        self.links = match &self.kind {
            PartKind::Html { html, base_url } => extract_links(html, base_url.as_deref(), token)?,
            PartKind::Url { url } => vec![Link::pointer(url.clone())],
        };
        self.links_extracted = true;
        Ok(())
    }

    /// The HTML body, if this is an HTML part.
    #[must_use]
    pub fn html_body(&self) -> Option<&str> {
        match &self.kind {
            PartKind::Html { html, .. } => Some(html),
            PartKind::Url { .. } => None,
        }
    }

    /// Replaces the HTML body. No-op for URL parts.
    pub fn set_html_body(&mut self, body: String) {
        if let PartKind::Html { html, .. } = &mut self.kind {
            *html = body;
        }
    }
}

/// One downloadable content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub content_type: String,
    pub parts: Vec<Part>,
    pub status: EntryStatus,
    #[serde(default)]
    pub progress: f64,
    /// Human-readable description of the error that failed the last run.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Entry {
    #[must_use]
    pub fn new(id: impl Into<String>, content_type: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            content_type: content_type.into(),
            parts,
            status: EntryStatus::Initialized,
            progress: 0.0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.id.clone(), self.content_type.clone())
    }

    /// Links across all parts, in part then discovery order.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.parts.iter().flat_map(|part| part.links.iter())
    }

    #[must_use]
    pub fn total_links(&self) -> usize {
        self.parts.iter().map(|part| part.links.len()).sum()
    }

    #[must_use]
    pub fn downloaded_links(&self) -> usize {
        self.links().filter(|link| link.is_downloaded()).count()
    }

    /// `processed / total` clamped to `[0, 1]`; 1.0 when there is nothing to fetch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_for(processed: usize, total: usize) -> f64 {
        if total == 0 {
            return 1.0;
        }
        (processed as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Status derived from link completion: `completed` when every part has
    /// been scanned and every link is on disk, `partial` otherwise.
    #[must_use]
    pub fn derived_status(&self) -> EntryStatus {
        let scanned = self.parts.iter().all(|part| part.links_extracted);
        if scanned && self.links().all(Link::is_downloaded) {
            EntryStatus::Completed
        } else {
            EntryStatus::Partial
        }
    }
}
