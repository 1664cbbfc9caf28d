//! Constants for the download module (timeouts, temp naming).

/// Default HTTP connect timeout for asset downloads (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout for asset downloads (5 minutes for large media).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default connect timeout for video-host metadata requests.
pub const RESOLVER_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout for video-host metadata requests.
pub const RESOLVER_READ_TIMEOUT_SECS: u64 = 30;

/// Prefix of in-flight temporary files inside a bundle root.
pub const TEMP_FILE_PREFIX: &str = ".offline-";

/// Suffix of in-flight temporary files inside a bundle root.
pub const TEMP_FILE_SUFFIX: &str = ".part";
