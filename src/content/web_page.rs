//! A remote page captured from its live HTML.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::DownloadableContent;
use crate::download::HttpClient;
use crate::entry::{Entry, EntryKey, Part};
use crate::error::CaptureError;

/// A page fetched fresh when its capture starts.
///
/// Once any link has been downloaded the stored, partially rewritten HTML is
/// kept, so a resumed or retried capture never re-fetches finished work.
#[derive(Debug, Clone)]
pub struct WebPage {
    id: String,
    url: Url,
    client: HttpClient,
}

impl WebPage {
    pub const CONTENT_TYPE: &'static str = "web_page";

    /// Page at `url`, identified by the URL itself.
    #[must_use]
    pub fn new(url: Url, client: HttpClient) -> Self {
        Self {
            id: url.to_string(),
            url,
            client,
        }
    }

    /// Page with an explicit id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, url: Url, client: HttpClient) -> Self {
        Self {
            id: id.into(),
            url,
            client,
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DownloadableContent for WebPage {
    fn key(&self) -> EntryKey {
        EntryKey::new(self.id.clone(), Self::CONTENT_TYPE)
    }

    fn can_download(&self, entry: &Entry) -> bool {
        entry.parts.iter().any(|part| part.html_body().is_some())
    }

    #[instrument(skip(self, entry, token), fields(url = %self.url))]
    async fn prepare_for_download(
        &self,
        entry: &mut Entry,
        token: &CancellationToken,
    ) -> Result<(), CaptureError> {
        if entry.downloaded_links() > 0 {
            debug!("capture in progress; keeping stored HTML");
            return Ok(());
        }
        let html = self
            .client
            .fetch_text(&self.url, token)
            .await
            .map_err(|e| CaptureError::from_download(self.url.as_str(), e))?;
        info!(bytes = html.len(), "page HTML fetched");
        entry.parts = vec![Part::html(html, Some(self.url.to_string()))];
        Ok(())
    }

    fn downloader_entry(&self) -> Entry {
        Entry::new(self.id.clone(), Self::CONTENT_TYPE, Vec::new())
    }
}
