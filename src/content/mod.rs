//! Content types that can be captured for offline use.
//!
//! The pipeline never knows what an entry *is*; it talks to a
//! [`DownloadableContent`] value that supplies the entry, materializes its
//! parts, and decides which errors abort the capture.

mod static_content;
mod web_page;

pub use static_content::{ExternalTool, HtmlSnippet};
pub use web_page::WebPage;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, EntryKey};
use crate::error::{CaptureError, CaptureErrorKind};

/// Capability set every capturable content type provides.
#[async_trait]
pub trait DownloadableContent: Send + Sync {
    /// Identity of the entry this content produces.
    fn key(&self) -> EntryKey;

    /// Whether `entry` (after preparation) has anything to capture.
    fn can_download(&self, entry: &Entry) -> bool {
        !entry.parts.is_empty()
    }

    /// Materializes or refreshes the entry's parts before link work begins.
    ///
    /// May be network-bound. Must return (success or error) so the pipeline
    /// never stalls.
    async fn prepare_for_download(
        &self,
        entry: &mut Entry,
        token: &CancellationToken,
    ) -> Result<(), CaptureError>;

    /// Whether `error` aborts the whole entry instead of leaving one link behind.
    fn is_critical(&self, error: &CaptureError) -> bool {
        default_is_critical(error)
    }

    /// A fresh entry for this content.
    fn downloader_entry(&self) -> Entry;
}

/// Stylesheet, video-resolution and markup failures break the bundle's
/// rendering, so they abort by default; single-asset failures are tolerated.
#[must_use]
pub fn default_is_critical(error: &CaptureError) -> bool {
    matches!(
        error.kind(),
        CaptureErrorKind::Cancelled
            | CaptureErrorKind::CssParse
            | CaptureErrorKind::CssPersist
            | CaptureErrorKind::VideoResolution
            | CaptureErrorKind::MarkupParse
    )
}
