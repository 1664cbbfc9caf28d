//! Single-asset downloader: fetch, name, and move a URL into a bundle.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use super::error::DownloadError;
use super::filename::{derive_destination, extension_from_content_type, resolve_collision};
use crate::entry::Link;
use crate::error::CaptureError;

/// A body moved into place, with the response type it was served as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedAsset {
    pub path: PathBuf,
    /// `Content-Type` header value, if any.
    pub content_type: Option<String>,
}

impl DownloadedAsset {
    /// Served as `text/css` or saved as `*.css`.
    #[must_use]
    pub fn is_stylesheet(&self) -> bool {
        let served_as_css = self
            .content_type
            .as_deref()
            .and_then(extension_from_content_type)
            == Some("css");
        served_as_css
            || self
                .path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("css"))
    }
}

/// Fetches one URL at a time into a destination folder.
///
/// The destination path mirrors the URL (`<host>/<path>`), is disambiguated
/// with a timestamp when taken, and the body is moved (never copied) from
/// its temporary file into place.
#[derive(Debug, Clone)]
pub struct AssetDownloader {
    client: HttpClient,
}

impl AssetDownloader {
    /// Creates a downloader over `client`.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Returns the underlying HTTP client.
    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Downloads `url` under `destination` and returns the absolute file path.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::WrongUrl`] when `url` is not an absolute http(s) URL
    /// - [`CaptureError::DownloadFailed`] on transport, status, or disk errors
    /// - [`CaptureError::Cancelled`] when `token` fires
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf, CaptureError> {
        self.download_asset(url, destination, token)
            .await
            .map(|asset| asset.path)
    }

    /// Like [`download`](Self::download), also reporting the response `Content-Type`.
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download).
    #[instrument(skip(self, destination, token), fields(destination = %destination.display()))]
    pub async fn download_asset(
        &self,
        url: &str,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadedAsset, CaptureError> {
        let parsed = Url::parse(url).map_err(|_| CaptureError::wrong_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CaptureError::wrong_url(url));
        }
        if token.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        let fetched = self
            .client
            .download_to_temp(&parsed, destination, token)
            .await
            .map_err(|e| CaptureError::from_download(url, e))?;

        let target = resolve_collision(&derive_destination(destination, &parsed, &fetched.metadata));
        debug!(path = %target.display(), "resolved destination path");

        if let Some(parent) = target.parent()
            && let Err(error) = tokio::fs::create_dir_all(parent).await
        {
            remove_temp(&fetched.temp_path).await;
            return Err(CaptureError::from_download(url, DownloadError::io(parent, error)));
        }

        if let Err(error) = tokio::fs::rename(&fetched.temp_path, &target).await {
            remove_temp(&fetched.temp_path).await;
            return Err(CaptureError::from_download(url, DownloadError::io(target, error)));
        }

        info!(path = %target.display(), bytes = fetched.bytes, "asset downloaded");
        Ok(DownloadedAsset {
            path: target,
            content_type: fetched.metadata.content_type,
        })
    }

    /// Downloads `link` unless it already is, recording its path relative to `root`.
    ///
    /// An already-downloaded link returns its stored path without touching the
    /// network.
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download).
    pub async fn download_link(
        &self,
        link: &mut Link,
        root: &Path,
        token: &CancellationToken,
    ) -> Result<String, CaptureError> {
        if let Some(existing) = &link.downloaded_path {
            return Ok(existing.clone());
        }
        let path = self.download(link.source_url(), root, token).await?;
        let local = super::local_reference(root, &path);
        link.mark_downloaded(local.clone());
        Ok(local)
    }
}

async fn remove_temp(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %error, "failed to remove temp file");
    }
}
