//! Per-entry capture pipeline.
//!
//! One run: preparation hook, link extraction (once per part), then every
//! not-yet-downloaded link in discovery order, rewriting markup as links land
//! on disk. The entry is persisted on every exit path so finished links
//! survive failures and cancellation.

mod edits;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use self::edits::{MarkupEdit, apply_edits};
use crate::config::ShellStylesheet;
use crate::content::DownloadableContent;
use crate::download::{AssetDownloader, DownloadError, local_reference};
use crate::entry::{Entry, EntryStatus, Link, LinkRole};
use crate::error::CaptureError;
use crate::extract::StylesheetRewriter;
use crate::rewrite::{LocalTrack, media_markup};
use crate::storage::{StorageGateway, save_entry};
use crate::video::{ResolverRegistry, is_video_candidate};

/// Progress reported while a pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineEvent {
    Status(EntryStatus),
    Progress(f64),
}

/// Summary of a run that reached the end of its link list.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// `completed` or `partial`.
    pub status: EntryStatus,
    pub total_links: usize,
    pub downloaded_links: usize,
    /// Human-readable descriptions of tolerated failures.
    pub tolerated: Vec<String>,
}

/// Collaborators shared by every pipeline a manager runs.
#[derive(Clone)]
pub struct PipelineServices {
    pub downloader: AssetDownloader,
    pub resolvers: Arc<ResolverRegistry>,
    pub storage: Arc<dyn StorageGateway>,
    pub shell_stylesheet: Option<ShellStylesheet>,
}

impl std::fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineServices")
            .field("resolvers", &self.resolvers)
            .field("shell_stylesheet", &self.shell_stylesheet)
            .finish_non_exhaustive()
    }
}

/// Runs one entry's capture into its bundle folder.
pub struct EntryPipeline {
    content: Arc<dyn DownloadableContent>,
    services: PipelineServices,
    root: PathBuf,
    token: CancellationToken,
}

impl EntryPipeline {
    #[must_use]
    pub fn new(
        content: Arc<dyn DownloadableContent>,
        services: PipelineServices,
        root: PathBuf,
        token: CancellationToken,
    ) -> Self {
        Self {
            content,
            services,
            root,
            token,
        }
    }

    /// Bundle folder this pipeline writes into.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs the capture and persists `entry` whatever the outcome.
    ///
    /// On success `entry.status` is the derived `completed`/`partial`; a
    /// cancelled run leaves it `paused`, any other error `failed` with
    /// `last_error` set.
    ///
    /// # Errors
    ///
    /// [`CaptureError::Cancelled`] when the token fires, or the first error the
    /// content type classifies as critical.
    #[instrument(skip_all, fields(entry_id = %entry.id, content_type = %entry.content_type))]
    pub async fn run(
        &self,
        entry: &mut Entry,
        on_event: &(dyn Fn(PipelineEvent) + Send + Sync),
    ) -> Result<RunOutcome, CaptureError> {
        let result = self.execute(entry, on_event).await;
        match &result {
            Ok(outcome) => {
                entry.status = outcome.status;
                entry.last_error = None;
                info!(
                    status = %outcome.status,
                    downloaded = outcome.downloaded_links,
                    total = outcome.total_links,
                    tolerated = outcome.tolerated.len(),
                    "capture finished"
                );
            }
            Err(error) if error.is_cancelled() => {
                entry.status = EntryStatus::Paused;
                info!(downloaded = entry.downloaded_links(), "capture cancelled");
            }
            Err(error) => {
                entry.status = EntryStatus::Failed;
                entry.last_error = Some(error.to_string());
                warn!(error = %error, kind = %error.kind(), "capture failed");
            }
        }

        if let Err(error) = save_entry(self.services.storage.as_ref(), entry).await {
            warn!(error = %error, "failed to persist entry state");
        }
        result
    }

    async fn execute(
        &self,
        entry: &mut Entry,
        on_event: &(dyn Fn(PipelineEvent) + Send + Sync),
    ) -> Result<RunOutcome, CaptureError> {
        entry.status = EntryStatus::Preparing;
        on_event(PipelineEvent::Status(EntryStatus::Preparing));

        tokio::select! {
            biased;
            () = self.token.cancelled() => return Err(CaptureError::Cancelled),
            prepared = self.content.prepare_for_download(entry, &self.token) => prepared?,
        }
        if !self.content.can_download(entry) {
            return Err(CaptureError::unsupported(format!(
                "{} has nothing to capture",
                entry.key()
            )));
        }

        let mut tolerated = Vec::new();
        for part in &mut entry.parts {
            if let Err(error) = part.ensure_links(&self.token) {
                self.tolerate(error, &mut tolerated)?;
            }
        }

        entry.status = EntryStatus::Active;
        on_event(PipelineEvent::Status(EntryStatus::Active));

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            CaptureError::from_download(
                self.root.display().to_string(),
                DownloadError::io(&self.root, e),
            )
        })?;

        let total = entry.total_links();
        let mut processed = 0;
        let mut known: HashMap<String, String> = entry
            .links()
            .filter_map(|link| {
                let path = link.downloaded_path.clone()?;
                Some((link.source_url().to_string(), path))
            })
            .collect();
        entry.progress = Entry::progress_for(entry.downloaded_links(), total);
        on_event(PipelineEvent::Progress(entry.progress));

        for part_index in 0..entry.parts.len() {
            for link_index in 0..entry.parts[part_index].links.len() {
                if self.token.is_cancelled() {
                    return Err(CaptureError::Cancelled);
                }
                let link = &mut entry.parts[part_index].links[link_index];
                if !link.is_downloaded() {
                    match self.process_link(link, &mut known).await {
                        Ok(edits) => apply_edits(&mut entry.parts[part_index], edits),
                        Err(error) => self.tolerate(error, &mut tolerated)?,
                    }
                }
                processed += 1;
                entry.progress = Entry::progress_for(processed, total);
                on_event(PipelineEvent::Progress(entry.progress));
            }
        }

        self.write_documents(entry).await?;

        let status = if tolerated.is_empty() {
            entry.derived_status()
        } else {
            EntryStatus::Partial
        };
        Ok(RunOutcome {
            status,
            total_links: total,
            downloaded_links: entry.downloaded_links(),
            tolerated,
        })
    }

    /// Passes tolerated errors through, returns critical ones.
    fn tolerate(&self, error: CaptureError, tolerated: &mut Vec<String>) -> Result<(), CaptureError> {
        if error.is_cancelled() || self.content.is_critical(&error) {
            return Err(error);
        }
        warn!(error = %error, kind = %error.kind(), "tolerated capture error");
        tolerated.push(error.to_string());
        Ok(())
    }

    async fn process_link(
        &self,
        link: &mut Link,
        known: &mut HashMap<String, String>,
    ) -> Result<Vec<MarkupEdit>, CaptureError> {
        if is_video_candidate(link) {
            return self.process_video(link).await;
        }

        let url = link.source_url().to_string();
        let local = if let Some(local) = known.get(&url) {
            debug!(url = %url, path = %local, "reusing asset downloaded for an earlier link");
            local.clone()
        } else if let Some(shell) = self.shell_match(link) {
            self.copy_shell_stylesheet(shell).await?
        } else {
            let asset = self
                .services
                .downloader
                .download_asset(&url, &self.root, &self.token)
                .await?;
            if asset.is_stylesheet() {
                StylesheetRewriter::new(&self.services.downloader, &self.root)
                    .rewrite(&asset.path, &url, &self.token)
                    .await?;
            }
            local_reference(&self.root, &asset.path)
        };

        known.insert(url, local.clone());
        link.mark_downloaded(local.clone());
        Ok(vec![MarkupEdit::Attribute {
            attribute: link.attribute.clone(),
            original: link.original_url.clone(),
            local,
        }])
    }

    async fn process_video(&self, link: &mut Link) -> Result<Vec<MarkupEdit>, CaptureError> {
        let asset = self.services.resolvers.resolve(link, &self.token).await?;
        link.extracted_url = Some(asset.url.clone());

        let media = self
            .services
            .downloader
            .download(&asset.url, &self.root, &self.token)
            .await?;
        let local_media = local_reference(&self.root, &media);

        let local_poster = match &asset.poster_url {
            Some(poster) => self.download_optional(poster).await?,
            None => None,
        };
        let mut local_tracks = Vec::with_capacity(asset.subtitles.len());
        for track in &asset.subtitles {
            if let Some(local) = self.download_optional(&track.url).await? {
                local_tracks.push((track, local));
            }
        }
        let tracks: Vec<LocalTrack<'_>> = local_tracks
            .into_iter()
            .map(|(track, local)| LocalTrack { track, local })
            .collect();

        let markup = media_markup(&asset, &local_media, local_poster.as_deref(), &tracks);

        link.video = Some(asset);
        link.mark_downloaded(local_media);
        Ok(vec![MarkupEdit::Element {
            tag: link.tag.clone(),
            original: link.original_url.clone(),
            markup,
        }])
    }

    /// Poster and caption downloads are best effort; only cancellation propagates.
    async fn download_optional(&self, url: &str) -> Result<Option<String>, CaptureError> {
        match self.services.downloader.download(url, &self.root, &self.token).await {
            Ok(path) => Ok(Some(local_reference(&self.root, &path))),
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) => {
                warn!(url, error = %error, "optional media asset skipped");
                Ok(None)
            }
        }
    }

    fn shell_match(&self, link: &Link) -> Option<&ShellStylesheet> {
        self.services
            .shell_stylesheet
            .as_ref()
            .filter(|shell| link.role() == LinkRole::Stylesheet && link.source_url().contains(&shell.marker))
    }

    async fn copy_shell_stylesheet(&self, shell: &ShellStylesheet) -> Result<String, CaptureError> {
        let file_name = shell
            .bundled_path
            .file_name()
            .map_or_else(|| "shell.css".into(), |name| name.to_os_string());
        let target = self.root.join(file_name);
        tokio::fs::copy(&shell.bundled_path, &target)
            .await
            .map_err(|source| CaptureError::CssPersist {
                path: target.clone(),
                source,
            })?;
        debug!(path = %target.display(), "shell stylesheet copied");
        Ok(local_reference(&self.root, &target))
    }

    /// Writes each HTML part: the first as `index.html`, later ones as `part_<n>.html`.
    async fn write_documents(&self, entry: &Entry) -> Result<(), CaptureError> {
        for (index, part) in entry.parts.iter().enumerate() {
            let Some(html) = part.html_body() else {
                continue;
            };
            let name = if index == 0 {
                "index.html".to_string()
            } else {
                format!("part_{index}.html")
            };
            let path = self.root.join(name);
            tokio::fs::write(&path, html).await.map_err(|e| {
                CaptureError::from_download(path.display().to_string(), DownloadError::io(&path, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use super::*;
    use crate::content::HtmlSnippet;
    use crate::download::HttpClient;
    use crate::entry::{EntryKey, Part};
    use crate::storage::MemoryStorage;

    fn services(storage: Arc<MemoryStorage>) -> PipelineServices {
        PipelineServices {
            downloader: AssetDownloader::new(HttpClient::new()),
            resolvers: Arc::new(ResolverRegistry::new()),
            storage,
            shell_stylesheet: None,
        }
    }

    struct Unprepared;

    #[async_trait]
    impl DownloadableContent for Unprepared {
        fn key(&self) -> EntryKey {
            EntryKey::new("u", "test")
        }

        async fn prepare_for_download(
            &self,
            _entry: &mut Entry,
            _token: &CancellationToken,
        ) -> Result<(), CaptureError> {
            Ok(())
        }

        fn downloader_entry(&self) -> Entry {
            Entry::new("u", "test", Vec::new())
        }
    }

    #[tokio::test]
    async fn test_entry_without_links_completes_and_writes_index() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let content = Arc::new(HtmlSnippet::new("1", "page", "<p>offline</p>", None));
        let mut entry = content.downloader_entry();
        let pipeline = EntryPipeline::new(
            content,
            services(storage.clone()),
            temp.path().join("page/1"),
            CancellationToken::new(),
        );

        let events = Mutex::new(Vec::new());
        let outcome = pipeline
            .run(&mut entry, &|event| events.lock().unwrap().push(event))
            .await
            .unwrap();

        assert_eq!(outcome.status, EntryStatus::Completed);
        assert!((entry.progress - 1.0).abs() < f64::EPSILON);
        let html = std::fs::read_to_string(temp.path().join("page/1/index.html")).unwrap();
        assert_eq!(html, "<p>offline</p>");
        assert!(storage.get("1", "page").is_some());
        let events = events.into_inner().unwrap();
        assert_eq!(events[0], PipelineEvent::Status(EntryStatus::Preparing));
        assert_eq!(events[1], PipelineEvent::Status(EntryStatus::Active));
    }

    #[tokio::test]
    async fn test_unparsable_base_url_leaves_entry_partial() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let content = Arc::new(HtmlSnippet::new(
            "3",
            "page",
            r#"<img src="a.png">"#,
            Some("not a url".to_string()),
        ));
        let mut entry = content.downloader_entry();
        let pipeline = EntryPipeline::new(
            content,
            services(storage.clone()),
            temp.path().join("page/3"),
            CancellationToken::new(),
        );

        let outcome = pipeline.run(&mut entry, &|_| {}).await.unwrap();

        assert_eq!(outcome.status, EntryStatus::Partial);
        assert_eq!(outcome.total_links, 0);
        assert_eq!(outcome.tolerated.len(), 1);
        assert!(outcome.tolerated[0].contains("not a url"));
        assert_eq!(entry.status, EntryStatus::Partial);
        assert!(!entry.parts[0].links_extracted);
        assert!(storage.get("3", "page").unwrap().contains("partial"));
    }

    #[tokio::test]
    async fn test_nothing_to_capture_fails_entry() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let content = Arc::new(Unprepared);
        let mut entry = content.downloader_entry();
        let pipeline = EntryPipeline::new(
            content,
            services(storage.clone()),
            temp.path().to_path_buf(),
            CancellationToken::new(),
        );

        let err = pipeline.run(&mut entry, &|_| {}).await.unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedContentType { .. }));
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(entry.last_error.is_some());
        assert!(storage.get("u", "test").unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_pauses() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let content = Arc::new(HtmlSnippet::new("2", "page", "<p>x</p>", None));
        let mut entry = Entry::new("2", "page", vec![Part::html("<p>x</p>", None)]);
        let token = CancellationToken::new();
        token.cancel();
        let pipeline =
            EntryPipeline::new(content, services(storage), temp.path().to_path_buf(), token);

        let err = pipeline.run(&mut entry, &|_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(entry.status, EntryStatus::Paused);
    }
}
