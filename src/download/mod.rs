//! Asset download layer: HTTP client, destination naming, and the asset downloader.
//!
//! # Features
//!
//! - Streaming downloads into a temporary file, then an atomic move into place
//! - Destination paths mirror the source URL (`<host>/<path>`)
//! - Filenames from Content-Disposition or a timestamp placeholder when the URL has none
//! - Media content types force `mp4` / `mp3` / `wav` extensions
//! - Collision avoidance: an existing file is never overwritten
//! - Cooperative cancellation through `CancellationToken`
//!
//! # Example
//!
//! ```no_run
//! use offline_core::download::{AssetDownloader, HttpClient};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = AssetDownloader::new(HttpClient::new());
//! let token = CancellationToken::new();
//! let path = downloader
//!     .download("https://example.com/img/logo.png", Path::new("./bundle"), &token)
//!     .await?;
//! println!("Downloaded: {}", path.display());
//! # Ok(())
//! # }
//! ```

mod asset;
mod client;
pub(crate) mod constants;
mod error;
pub mod filename;

use std::path::Path;

pub use asset::{AssetDownloader, DownloadedAsset};
pub use client::{FetchedFile, HttpClient};
pub use constants::{
    CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, RESOLVER_CONNECT_TIMEOUT_SECS,
    RESOLVER_READ_TIMEOUT_SECS,
};
pub use error::DownloadError;
pub use filename::{ResponseMetadata, derive_destination, relative_path, resolve_collision};

/// `/`-separated reference to `path` relative to the bundle `root`.
#[must_use]
pub fn local_reference(root: &Path, path: &Path) -> String {
    relative_path(root, path)
}
