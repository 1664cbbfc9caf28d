//! HTTP client wrapper for fetching assets and metadata documents.
//!
//! This module provides the `HttpClient` struct which streams response bodies
//! into temporary files inside a bundle root and fetches small JSON/text
//! documents for video-host resolution. Every request races the caller's
//! [`CancellationToken`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX,
};
use super::error::DownloadError;
use super::filename::{ResponseMetadata, parse_content_disposition, unix_millis};
use crate::user_agent;

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// HTTP client for streaming downloads and metadata fetches.
///
/// Created once and cloned freely; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// A response body written to a temporary file, not yet moved into place.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    /// Temporary file holding the body.
    pub temp_path: PathBuf,
    /// URL after redirects.
    pub final_url: Url,
    /// Headers relevant to naming the file.
    pub metadata: ResponseMetadata,
    /// Bytes written.
    pub bytes: u64,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default asset timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// Download clients keep a cookie jar, so a session cookie set by a page
    /// is sent along with its assets.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(
            Some(Arc::new(Jar::default())),
            connect_timeout_secs,
            read_timeout_secs,
            user_agent::default_download_user_agent(),
        )
        .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Creates a client for video-host metadata requests.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn for_resolvers(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(
            None,
            connect_timeout_secs,
            read_timeout_secs,
            user_agent::default_resolver_user_agent(),
        )
        .expect("failed to build resolver HTTP client with static configuration");
        Self { client }
    }

    /// Streams `url` into a fresh temporary file inside `temp_dir`.
    ///
    /// The caller decides the final name from [`FetchedFile::metadata`] and
    /// moves the file into place. On any error the temporary file is removed.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the request fails, the server answers with
    /// an error status, writing fails, or `token` is cancelled.
    #[instrument(skip(self, temp_dir, token), fields(url = %url))]
    pub async fn download_to_temp(
        &self,
        url: &Url,
        temp_dir: &Path,
        token: &CancellationToken,
    ) -> Result<FetchedFile, DownloadError> {
        let response = self.send(url, token).await?;
        let final_url = response.url().clone();
        let metadata = response_metadata(&response);

        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| DownloadError::io(temp_dir, e))?;
        let temp_path = temp_dir.join(format!(
            "{TEMP_FILE_PREFIX}{}-{}{TEMP_FILE_SUFFIX}",
            unix_millis(),
            TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = File::create(&temp_path)
            .await
            .map_err(|e| DownloadError::io(temp_path.clone(), e))?;

        let stream_result = stream_to_file(&mut file, response, url.as_str(), &temp_path, token).await;
        drop(file);
        let bytes = match stream_result {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %temp_path.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(error);
            }
        };

        debug!(bytes, content_type = ?metadata.content_type, "body written to temp file");
        Ok(FetchedFile {
            temp_path,
            final_url,
            metadata,
            bytes,
        })
    }

    /// Fetches `url` as text.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`download_to_temp`](Self::download_to_temp), minus disk IO.
    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn fetch_text(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<String, DownloadError> {
        let response = self.send(url, token).await?;
        tokio::select! {
            () = token.cancelled() => Err(DownloadError::cancelled(url.as_str())),
            body = response.text() => body.map_err(|e| DownloadError::from_reqwest(url.as_str(), e)),
        }
    }

    /// Fetches `url` and decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Decode`] when the body is not the expected document.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<T, DownloadError> {
        let body = self.fetch_text(url, token).await?;
        serde_json::from_str(&body).map_err(|e| DownloadError::decode(url.as_str(), e))
    }

    async fn send(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<reqwest::Response, DownloadError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url.as_str()));
        }
        if token.is_cancelled() {
            return Err(DownloadError::cancelled(url.as_str()));
        }

        let response = tokio::select! {
            () = token.cancelled() => return Err(DownloadError::cancelled(url.as_str())),
            sent = self.client.get(url.clone()).send() => {
                sent.map_err(|e| DownloadError::from_reqwest(url.as_str(), e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url.as_str(), status.as_u16()));
        }
        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    token: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    loop {
        let next = tokio::select! {
            () = token.cancelled() => return Err(DownloadError::cancelled(url)),
            next = stream.next() => next,
        };
        let Some(chunk_result) = next else {
            break;
        };
        let chunk = chunk_result.map_err(|e| DownloadError::from_reqwest(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}

fn response_metadata(response: &reqwest::Response) -> ResponseMetadata {
    let headers = response.headers();
    ResponseMetadata {
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string),
        suggested_filename: headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition),
    }
}

fn build_client(
    cookie_jar: Option<Arc<Jar>>,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
    user_agent: String,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(user_agent);
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    builder.build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_default_builds() {
        let _client = HttpClient::default();
        let _resolver = HttpClient::for_resolvers(5, 10);
    }

    #[tokio::test]
    async fn test_send_rejects_non_http_scheme() {
        let client = HttpClient::new();
        let token = CancellationToken::new();
        let url = Url::parse("ftp://example.com/a.png").unwrap();
        let result = client.fetch_text(&url, &token).await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_send_honours_pre_cancelled_token() {
        let client = HttpClient::new();
        let token = CancellationToken::new();
        token.cancel();
        let url = Url::parse("https://example.invalid/a.png").unwrap();
        let result = client.fetch_text(&url, &token).await;
        assert!(matches!(result, Err(DownloadError::Cancelled { .. })));
    }
}
