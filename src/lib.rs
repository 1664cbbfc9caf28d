//! Offline content capture.
//!
//! Turns online content entries (web pages, HTML bodies, launch URLs) into
//! self-contained bundles on disk: every embedded asset is downloaded, the
//! HTML is rewritten to point at the local copies, stylesheets are followed
//! recursively and hosted videos are swapped for native players.
//!
//! # Architecture
//!
//! - [`entry`] - Entries, parts, links and the status lifecycle
//! - [`extract`] - Link discovery in HTML and CSS, stylesheet rewriting
//! - [`download`] - HTTP client and the asset downloader
//! - [`video`] - Pluggable resolvers from embed URLs to media files
//! - [`rewrite`] - Text-level HTML rewriting and native media markup
//! - [`content`] - Per-content-type capture capabilities
//! - [`pipeline`] - One entry's end-to-end capture run
//! - [`manager`] - Lifecycle, queueing and concurrency across entries
//! - [`storage`] - Keyed persistence of entry state

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod content;
pub mod download;
pub mod entry;
pub mod error;
pub mod extract;
pub mod manager;
pub mod pipeline;
pub mod rewrite;
pub mod storage;
mod user_agent;
pub mod video;

// Re-export commonly used types
pub use config::{CaptureConfig, ConfigError, DEFAULT_MAX_ACTIVE, ShellStylesheet};
pub use content::{DownloadableContent, ExternalTool, HtmlSnippet, WebPage};
pub use download::{AssetDownloader, DownloadError, HttpClient};
pub use entry::{Entry, EntryKey, EntryStatus, Link, LinkRole, Part};
pub use error::{CaptureError, CaptureErrorKind};
pub use manager::{DownloadEvent, DownloadManager, EntrySnapshot, ManagerError, StartOutcome};
pub use pipeline::{EntryPipeline, PipelineEvent, RunOutcome};
pub use storage::{MemoryStorage, SqliteStorage, StorageError, StorageGateway};
pub use video::{ResolverRegistry, VideoAsset, VideoResolver, build_default_resolver_registry};
