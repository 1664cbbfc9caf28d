//! Shared User-Agent strings for asset and resolver HTTP clients.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/nicksrandall/offline-capture";

/// Default User-Agent for asset requests.
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("offline-capture/{version} (offline-bundle; +{PROJECT_UA_URL})")
}

/// Default User-Agent for video-host metadata requests.
#[must_use]
pub(crate) fn default_resolver_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("offline-capture/{version} (media-resolver; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_format_consistency() {
        let download_ua = default_download_user_agent();
        let resolver_ua = default_resolver_user_agent();
        assert!(download_ua.contains(PROJECT_UA_URL));
        assert!(resolver_ua.contains(PROJECT_UA_URL));
        assert_eq!(
            Some(env!("CARGO_PKG_VERSION")),
            download_ua
                .strip_prefix("offline-capture/")
                .and_then(|s| s.split(' ').next()),
            "download UA must contain crate version"
        );
    }

    #[test]
    fn test_ua_format_keywords() {
        assert!(default_download_user_agent().contains("offline-bundle"));
        assert!(default_resolver_user_agent().contains("media-resolver"));
    }
}
