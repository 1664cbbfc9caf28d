//! Error types for video-host resolution.

use thiserror::Error;

use crate::download::DownloadError;

/// Errors raised while turning an embed into a playable media URL.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The metadata document could not be fetched or decoded.
    #[error("failed to fetch player metadata from {url}: {source}")]
    Fetch {
        /// Metadata URL.
        url: String,
        #[source]
        source: DownloadError,
    },

    /// The metadata document was missing a required field.
    #[error("invalid player metadata from {url}: {reason}")]
    InvalidMetadata {
        /// Metadata URL.
        url: String,
        /// What was missing or malformed.
        reason: String,
    },

    /// No rendition had an acceptable container.
    #[error("no playable rendition for {url}")]
    NoPlayableAsset {
        /// Embed URL.
        url: String,
    },

    /// The resolver was asked about an embed URL it does not understand.
    #[error("unrecognized embed URL: {url}")]
    UnrecognizedUrl {
        /// Embed URL.
        url: String,
    },

    /// Resolution was cancelled.
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Wraps a fetch failure, keeping cancellation distinct.
    pub fn fetch(url: impl Into<String>, source: DownloadError) -> Self {
        match source {
            DownloadError::Cancelled { .. } => Self::Cancelled,
            source => Self::Fetch {
                url: url.into(),
                source,
            },
        }
    }

    /// Creates an invalid-metadata error.
    pub fn invalid_metadata(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a no-playable-asset error.
    pub fn no_playable_asset(url: impl Into<String>) -> Self {
        Self::NoPlayableAsset { url: url.into() }
    }

    /// Creates an unrecognized-URL error.
    pub fn unrecognized(url: impl Into<String>) -> Self {
        Self::UnrecognizedUrl { url: url.into() }
    }

    /// True for [`ResolveError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
