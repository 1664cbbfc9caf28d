//! Ordered collection of video resolvers.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{VideoAsset, VideoResolver};
use crate::entry::Link;
use crate::error::CaptureError;

/// Resolvers tried in registration order; the first capable one wins.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn VideoResolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field(
                "resolvers",
                &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ResolverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolver; earlier registrations take precedence.
    pub fn register(&mut self, resolver: Box<dyn VideoResolver>) {
        debug!(resolver = resolver.name(), "registered video resolver");
        self.resolvers.push(resolver);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// First resolver able to handle `link`.
    #[must_use]
    pub fn find(&self, link: &Link) -> Option<&dyn VideoResolver> {
        self.resolvers
            .iter()
            .find(|resolver| resolver.can_handle(link))
            .map(|resolver| &**resolver)
    }

    /// Resolves `link` with the first capable resolver.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::UnsupportedContentType`] when no resolver handles the URL
    /// - [`CaptureError::VideoResolution`] when the capable resolver fails
    /// - [`CaptureError::Cancelled`] when `token` fires
    pub async fn resolve(
        &self,
        link: &Link,
        token: &CancellationToken,
    ) -> Result<VideoAsset, CaptureError> {
        let url = link.source_url();
        let Some(resolver) = self.find(link) else {
            debug!(url, "no video resolver for embed");
            return Err(CaptureError::unsupported(format!("no video resolver for {url}")));
        };
        if token.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        match resolver.resolve(link, token).await {
            Ok(asset) => {
                info!(resolver = resolver.name(), url, media = %asset.url, "embed resolved");
                Ok(asset)
            }
            Err(error) => {
                warn!(resolver = resolver.name(), url, error = %error, "embed resolution failed");
                Err(CaptureError::from_resolve(url, error))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::CaptureErrorKind;
    use crate::video::ResolveError;

    struct FixedResolver {
        name: &'static str,
        host: &'static str,
        outcome: fn(&Link) -> Result<VideoAsset, ResolveError>,
    }

    #[async_trait]
    impl VideoResolver for FixedResolver {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, link: &Link) -> bool {
            link.source_url().contains(self.host)
        }

        async fn resolve(
            &self,
            link: &Link,
            _token: &CancellationToken,
        ) -> Result<VideoAsset, ResolveError> {
            (self.outcome)(link)
        }
    }

    fn registry() -> ResolverRegistry {
        let mut registry = ResolverRegistry::new();
        registry.register(Box::new(FixedResolver {
            name: "first",
            host: "videos.test",
            outcome: |_| Ok(VideoAsset::new("https://cdn.test/first.mp4")),
        }));
        registry.register(Box::new(FixedResolver {
            name: "second",
            host: "test",
            outcome: |link| Err(ResolveError::no_playable_asset(link.source_url())),
        }));
        registry
    }

    fn iframe(url: &str) -> Link {
        Link::new(url, url, "iframe", "src")
    }

    #[tokio::test]
    async fn test_first_capable_resolver_wins() {
        let asset = registry()
            .resolve(&iframe("https://videos.test/1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(asset.url, "https://cdn.test/first.mp4");
    }

    #[tokio::test]
    async fn test_resolver_failure_maps_to_video_resolution() {
        let err = registry()
            .resolve(&iframe("https://other.test/1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CaptureErrorKind::VideoResolution);
    }

    #[tokio::test]
    async fn test_no_capable_resolver_is_unsupported() {
        let err = registry()
            .resolve(&iframe("https://youtube.example/embed/x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CaptureErrorKind::UnsupportedContentType);
    }

    #[test]
    fn test_debug_lists_names() {
        let rendered = format!("{:?}", registry());
        assert!(rendered.contains("first"));
        assert_eq!(registry().len(), 2);
    }
}
