//! Capture error taxonomy shared by every stage of the pipeline.
//!
//! Subsystem errors ([`DownloadError`], [`ResolveError`]) keep transport
//! detail; this enum is what content types classify through
//! [`DownloadableContent::is_critical`](crate::content::DownloadableContent::is_critical).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::DownloadError;
use crate::extract::CssSyntaxError;
use crate::video::ResolveError;

/// Errors surfaced by extraction, download, rewriting, and resolution.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The HTML document could not be parsed into links.
    #[error("failed to parse markup: {reason}")]
    MarkupParse {
        /// What was wrong with the input.
        reason: String,
    },

    /// A reference could not be turned into a fetchable URL.
    #[error("wrong URL: {url}")]
    WrongUrl {
        /// The offending reference.
        url: String,
    },

    /// Fetching or storing an asset failed.
    #[error("download failed for {url}: {source}")]
    DownloadFailed {
        /// The asset URL.
        url: String,
        /// Transport or filesystem cause.
        #[source]
        source: DownloadError,
    },

    /// A stylesheet contained an unterminated or malformed reference.
    #[error("failed to parse stylesheet {path}: {source}")]
    CssParse {
        /// Local stylesheet path.
        path: PathBuf,
        /// Syntax detail.
        #[source]
        source: CssSyntaxError,
    },

    /// The rewritten stylesheet could not be written back.
    #[error("failed to persist stylesheet {path}: {source}")]
    CssPersist {
        /// Local stylesheet path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A video-host embed could not be resolved to a media URL.
    #[error("video resolution failed for {url}: {source}")]
    VideoResolution {
        /// The embed URL.
        url: String,
        /// Resolver cause.
        #[source]
        source: ResolveError,
    },

    /// No capability exists for this content or embed.
    #[error("unsupported content type: {detail}")]
    UnsupportedContentType {
        /// What could not be handled.
        detail: String,
    },

    /// The run was cancelled cooperatively.
    #[error("capture cancelled")]
    Cancelled,
}

/// Discriminant of [`CaptureError`], convenient for policy tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureErrorKind {
    MarkupParse,
    WrongUrl,
    DownloadFailed,
    CssParse,
    CssPersist,
    VideoResolution,
    UnsupportedContentType,
    Cancelled,
}

impl CaptureErrorKind {
    /// Returns the stable label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkupParse => "markup_parse",
            Self::WrongUrl => "wrong_url",
            Self::DownloadFailed => "download_failed",
            Self::CssParse => "css_parse",
            Self::CssPersist => "css_persist",
            Self::VideoResolution => "video_resolution",
            Self::UnsupportedContentType => "unsupported_content_type",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CaptureError {
    /// Returns the error's kind.
    #[must_use]
    pub fn kind(&self) -> CaptureErrorKind {
        match self {
            Self::MarkupParse { .. } => CaptureErrorKind::MarkupParse,
            Self::WrongUrl { .. } => CaptureErrorKind::WrongUrl,
            Self::DownloadFailed { .. } => CaptureErrorKind::DownloadFailed,
            Self::CssParse { .. } => CaptureErrorKind::CssParse,
            Self::CssPersist { .. } => CaptureErrorKind::CssPersist,
            Self::VideoResolution { .. } => CaptureErrorKind::VideoResolution,
            Self::UnsupportedContentType { .. } => CaptureErrorKind::UnsupportedContentType,
            Self::Cancelled => CaptureErrorKind::Cancelled,
        }
    }

    /// True for [`CaptureError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Creates a markup parse error.
    pub fn markup_parse(reason: impl Into<String>) -> Self {
        Self::MarkupParse {
            reason: reason.into(),
        }
    }

    /// Creates a wrong-URL error.
    pub fn wrong_url(url: impl Into<String>) -> Self {
        Self::WrongUrl { url: url.into() }
    }

    /// Creates an unsupported-content error.
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::UnsupportedContentType {
            detail: detail.into(),
        }
    }

    /// Folds a [`DownloadError`] into the taxonomy.
    ///
    /// Cancellation stays [`CaptureError::Cancelled`] and malformed URLs become
    /// [`CaptureError::WrongUrl`]; everything else is `DownloadFailed`.
    pub fn from_download(url: impl Into<String>, source: DownloadError) -> Self {
        match source {
            DownloadError::Cancelled { .. } => Self::Cancelled,
            DownloadError::InvalidUrl { url } => Self::WrongUrl { url },
            source => Self::DownloadFailed {
                url: url.into(),
                source,
            },
        }
    }

    /// Folds a [`ResolveError`] into the taxonomy, keeping cancellation distinct.
    pub fn from_resolve(url: impl Into<String>, source: ResolveError) -> Self {
        if source.is_cancelled() {
            Self::Cancelled
        } else {
            Self::VideoResolution {
                url: url.into(),
                source,
            }
        }
    }
}
