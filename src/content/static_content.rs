//! Content whose parts are already in hand.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::DownloadableContent;
use crate::entry::{Entry, EntryKey, Part};
use crate::error::CaptureError;

/// An HTML body captured as-is (page or module item content).
#[derive(Debug, Clone)]
pub struct HtmlSnippet {
    pub id: String,
    pub content_type: String,
    pub html: String,
    pub base_url: Option<String>,
}

impl HtmlSnippet {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        content_type: impl Into<String>,
        html: impl Into<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content_type: content_type.into(),
            html: html.into(),
            base_url,
        }
    }
}

#[async_trait]
impl DownloadableContent for HtmlSnippet {
    fn key(&self) -> EntryKey {
        EntryKey::new(self.id.clone(), self.content_type.clone())
    }

    async fn prepare_for_download(
        &self,
        entry: &mut Entry,
        _token: &CancellationToken,
    ) -> Result<(), CaptureError> {
        if entry.parts.is_empty() {
            entry.parts.push(Part::html(self.html.clone(), self.base_url.clone()));
        }
        Ok(())
    }

    fn downloader_entry(&self) -> Entry {
        Entry::new(
            self.id.clone(),
            self.content_type.clone(),
            vec![Part::html(self.html.clone(), self.base_url.clone())],
        )
    }
}

/// A third-party tool captured as its sessionless launch URL.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    pub id: String,
    pub launch_url: String,
}

impl ExternalTool {
    pub const CONTENT_TYPE: &'static str = "external_tool";

    #[must_use]
    pub fn new(id: impl Into<String>, launch_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            launch_url: launch_url.into(),
        }
    }
}

#[async_trait]
impl DownloadableContent for ExternalTool {
    fn key(&self) -> EntryKey {
        EntryKey::new(self.id.clone(), Self::CONTENT_TYPE)
    }

    async fn prepare_for_download(
        &self,
        entry: &mut Entry,
        _token: &CancellationToken,
    ) -> Result<(), CaptureError> {
        if entry.parts.is_empty() {
            entry.parts.push(Part::url(self.launch_url.clone()));
        }
        Ok(())
    }

    fn downloader_entry(&self) -> Entry {
        Entry::new(
            self.id.clone(),
            Self::CONTENT_TYPE,
            vec![Part::url(self.launch_url.clone())],
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entry::PartKind;

    #[tokio::test]
    async fn test_snippet_entry_has_html_part() {
        let snippet = HtmlSnippet::new("7", "module_item", "<p>hi</p>", None);
        let mut entry = snippet.downloader_entry();
        snippet
            .prepare_for_download(&mut entry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(entry.parts.len(), 1);
        assert_eq!(entry.key(), snippet.key());
        assert!(snippet.can_download(&entry));
    }

    #[tokio::test]
    async fn test_external_tool_restores_missing_part() {
        let tool = ExternalTool::new("3", "https://tool.test/launch");
        let mut entry = Entry::new("3", ExternalTool::CONTENT_TYPE, Vec::new());
        assert!(!tool.can_download(&entry));
        tool.prepare_for_download(&mut entry, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(&entry.parts[0].kind, PartKind::Url { url } if url == "https://tool.test/launch"));
    }
}
