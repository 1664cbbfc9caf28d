//! Runtime configuration for captures.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::{
    CONNECT_TIMEOUT_SECS, HttpClient, READ_TIMEOUT_SECS, RESOLVER_CONNECT_TIMEOUT_SECS,
    RESOLVER_READ_TIMEOUT_SECS,
};
use crate::entry::EntryKey;

/// Default cap on simultaneously running pipelines.
pub const DEFAULT_MAX_ACTIVE: usize = 3;

/// Accepted range for [`CaptureConfig::max_active`].
pub const MAX_ACTIVE_RANGE: RangeInclusive<usize> = 1..=32;

/// Accepted range for every timeout, in seconds.
pub const TIMEOUT_RANGE_SECS: RangeInclusive<u64> = 1..=3600;

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_active must be within {min}..={max}, got {value}")]
    MaxActive { value: usize, min: usize, max: usize },

    #[error("{field} must be within 1..=3600 seconds, got {value}")]
    Timeout { field: &'static str, value: u64 },

    #[error("shell stylesheet marker must not be empty")]
    EmptyShellMarker,
}

/// The app-bundled stylesheet copied into bundles instead of fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellStylesheet {
    /// URL fragment identifying the shell stylesheet.
    pub marker: String,
    /// Local file copied into each bundle.
    pub bundled_path: PathBuf,
}

/// Settings shared by the manager and every pipeline it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub max_active: usize,
    /// Bundles land in `<output_root>/<content_type>/<id>/`.
    pub output_root: PathBuf,
    pub shell_stylesheet: Option<ShellStylesheet>,
    pub download_connect_timeout_secs: u64,
    pub download_read_timeout_secs: u64,
    pub resolver_connect_timeout_secs: u64,
    pub resolver_read_timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            output_root: PathBuf::from("."),
            shell_stylesheet: None,
            download_connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            download_read_timeout_secs: READ_TIMEOUT_SECS,
            resolver_connect_timeout_secs: RESOLVER_CONNECT_TIMEOUT_SECS,
            resolver_read_timeout_secs: RESOLVER_READ_TIMEOUT_SECS,
        }
    }
}

impl CaptureConfig {
    /// Defaults with bundles written under `output_root`.
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    #[must_use]
    pub fn with_shell_stylesheet(mut self, marker: impl Into<String>, bundled_path: impl Into<PathBuf>) -> Self {
        self.shell_stylesheet = Some(ShellStylesheet {
            marker: marker.into(),
            bundled_path: bundled_path.into(),
        });
        self
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !MAX_ACTIVE_RANGE.contains(&self.max_active) {
            return Err(ConfigError::MaxActive {
                value: self.max_active,
                min: *MAX_ACTIVE_RANGE.start(),
                max: *MAX_ACTIVE_RANGE.end(),
            });
        }
        for (field, value) in [
            ("download_connect_timeout_secs", self.download_connect_timeout_secs),
            ("download_read_timeout_secs", self.download_read_timeout_secs),
            ("resolver_connect_timeout_secs", self.resolver_connect_timeout_secs),
            ("resolver_read_timeout_secs", self.resolver_read_timeout_secs),
        ] {
            if !TIMEOUT_RANGE_SECS.contains(&value) {
                return Err(ConfigError::Timeout { field, value });
            }
        }
        if self
            .shell_stylesheet
            .as_ref()
            .is_some_and(|shell| shell.marker.trim().is_empty())
        {
            return Err(ConfigError::EmptyShellMarker);
        }
        Ok(())
    }

    /// Bundle folder for one entry.
    ///
    /// Distinct keys always map to distinct folders.
    #[must_use]
    pub fn entry_root(&self, key: &EntryKey) -> PathBuf {
        self.output_root
            .join(folder_name(&key.content_type))
            .join(folder_name(&key.id))
    }

    /// Client for asset downloads.
    #[must_use]
    pub fn download_client(&self) -> HttpClient {
        HttpClient::new_with_timeouts(
            self.download_connect_timeout_secs,
            self.download_read_timeout_secs,
        )
    }

    /// Client for video-host metadata calls.
    #[must_use]
    pub fn resolver_client(&self) -> HttpClient {
        HttpClient::for_resolvers(
            self.resolver_connect_timeout_secs,
            self.resolver_read_timeout_secs,
        )
    }
}

/// Percent-encodes `raw` into a single path segment.
///
/// `.`-only names are escaped so they cannot mean "here" or "parent", and the
/// empty name becomes a lone `%`, which encoding never produces.
fn folder_name(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    if raw.chars().all(|c| c == '.') {
        return "%2E".repeat(raw.len());
    }
    urlencoding::encode(raw).into_owned()
}
