//! Lifecycle and concurrency control for capture pipelines.
//!
//! The manager owns every registered entry and at most `max_active` running
//! pipelines. Each pipeline runs on its own tokio task with its own
//! [`CancellationToken`]; pause and cancel only differ in the status the entry
//! lands in once the pipeline has unwound. Whenever a pipeline ends, queued
//! entries are started in registration order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_core::content::HtmlSnippet;
//! use offline_core::download::HttpClient;
//! use offline_core::manager::DownloadManager;
//! use offline_core::storage::MemoryStorage;
//! use offline_core::video::ResolverRegistry;
//! use offline_core::CaptureConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DownloadManager::new(
//!     CaptureConfig::new("bundles"),
//!     Arc::new(MemoryStorage::new()),
//!     ResolverRegistry::new(),
//!     HttpClient::new(),
//! )?;
//! manager.add_and_start(Arc::new(HtmlSnippet::new("1", "page", "<p>hi</p>", None)));
//! manager.wait_idle().await;
//! # Ok(())
//! # }
//! ```

mod events;

pub use events::{DownloadEvent, EVENT_CHANNEL_CAPACITY, EntrySnapshot};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{CaptureConfig, ConfigError};
use crate::content::DownloadableContent;
use crate::download::{AssetDownloader, HttpClient};
use crate::entry::{Entry, EntryKey, EntryStatus};
use crate::error::CaptureError;
use crate::pipeline::{EntryPipeline, PipelineEvent, PipelineServices, RunOutcome};
use crate::storage::{StorageError, StorageGateway, load_entries, save_entry};
use crate::video::ResolverRegistry;

/// Errors from manager operations that touch storage or disk.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to remove bundle {path}: {source}")]
    RemoveBundle {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of asking the manager to start an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A pipeline was spawned.
    Started,
    /// Every slot is taken; the entry starts when one frees up.
    Queued,
    AlreadyRunning,
    /// The entry's status does not allow starting.
    NotStartable(EntryStatus),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Pause,
    Cancel,
}

struct ActiveRun {
    token: CancellationToken,
    stop: Option<StopReason>,
    task: Option<JoinHandle<()>>,
}

struct Record {
    content: Arc<dyn DownloadableContent>,
    /// `None` while a pipeline owns the entry.
    entry: Option<Entry>,
    status: EntryStatus,
    progress: f64,
    last_error: Option<String>,
    queued: bool,
    run: Option<ActiveRun>,
}

impl Record {
    fn new(content: Arc<dyn DownloadableContent>, entry: Entry) -> Self {
        Self {
            content,
            status: entry.status,
            progress: entry.progress,
            last_error: entry.last_error.clone(),
            entry: Some(entry),
            queued: false,
            run: None,
        }
    }

    /// Applies a status decided by the manager to the idle entry.
    fn set_idle_status(&mut self, status: EntryStatus) -> Option<Entry> {
        self.status = status;
        let entry = self.entry.as_mut()?;
        entry.status = status;
        Some(entry.clone())
    }
}

#[derive(Default)]
struct ManagerState {
    /// Registration order, used to pick queued entries.
    order: Vec<EntryKey>,
    records: HashMap<EntryKey, Record>,
}

impl ManagerState {
    /// Pipelines holding a slot. `preparing` counts too, so `active` never exceeds the cap.
    fn running(&self) -> usize {
        self.records.values().filter(|record| record.run.is_some()).count()
    }
}

struct ManagerInner {
    config: CaptureConfig,
    services: PipelineServices,
    state: Mutex<ManagerState>,
    events: broadcast::Sender<DownloadEvent>,
    idle: Notify,
}

/// Registers entries and runs their pipelines under a concurrency cap.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("max_active", &self.inner.config.max_active)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Creates a manager; assets are fetched through `http`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` fails validation.
    pub fn new(
        config: CaptureConfig,
        storage: Arc<dyn StorageGateway>,
        resolvers: ResolverRegistry,
        http: HttpClient,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let services = PipelineServices {
            downloader: AssetDownloader::new(http),
            resolvers: Arc::new(resolvers),
            storage,
            shell_stylesheet: config.shell_stylesheet.clone(),
        };
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                services,
                state: Mutex::new(ManagerState::default()),
                events,
                idle: Notify::new(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    /// Registers `content` without starting it. Returns `false` if its key is
    /// already registered.
    pub fn register(&self, content: Arc<dyn DownloadableContent>) -> bool {
        let entry = content.downloader_entry();
        self.inner.insert(content, entry)
    }

    /// Registers `content` and starts it. Returns `false`, leaving the
    /// existing entry untouched, if its key is already registered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_and_start(&self, content: Arc<dyn DownloadableContent>) -> bool {
        let key = content.key();
        if !self.register(content) {
            debug!(key = %key, "entry already registered");
            return false;
        }
        self.start(&key);
        true
    }

    /// Starts an `initialized` or `paused` entry, or queues it when every
    /// slot is taken.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, key: &EntryKey) -> StartOutcome {
        let mut state = self.inner.lock();
        self.inner.start_locked(&mut state, key)
    }

    /// Same as [`start`](Self::start); reads better for paused entries.
    pub fn resume(&self, key: &EntryKey) -> StartOutcome {
        self.start(key)
    }

    /// Restarts a `failed` or `partial` entry. Links already on disk are kept.
    pub fn retry(&self, key: &EntryKey) -> StartOutcome {
        let mut state = self.inner.lock();
        let Some(record) = state.records.get_mut(key) else {
            return StartOutcome::Unknown;
        };
        if record.run.is_some() {
            return StartOutcome::AlreadyRunning;
        }
        if !matches!(record.status, EntryStatus::Failed | EntryStatus::Partial) {
            return StartOutcome::NotStartable(record.status);
        }
        record.last_error = None;
        if let Some(entry) = record.entry.as_mut() {
            entry.last_error = None;
        }
        record.set_idle_status(EntryStatus::Initialized);
        info!(key = %key, "retrying entry");
        self.inner.start_locked(&mut state, key)
    }

    /// Pauses a running or queued entry. Returns `false` when there was
    /// nothing to pause.
    pub async fn pause(&self, key: &EntryKey) -> bool {
        self.stop(key, StopReason::Pause, EntryStatus::Paused).await
    }

    /// Stops an entry and returns it to `initialized`; downloaded links and
    /// progress are kept.
    pub async fn cancel(&self, key: &EntryKey) -> bool {
        self.stop(key, StopReason::Cancel, EntryStatus::Initialized).await
    }

    async fn stop(&self, key: &EntryKey, reason: StopReason, idle_status: EntryStatus) -> bool {
        let persisted = {
            let mut state = self.inner.lock();
            let Some(record) = state.records.get_mut(key) else {
                return false;
            };
            if let Some(run) = record.run.as_mut() {
                debug!(key = %key, ?reason, "stopping pipeline");
                run.stop = Some(reason);
                run.token.cancel();
                return true;
            }
            let stoppable = match reason {
                StopReason::Pause => record.queued,
                StopReason::Cancel => {
                    record.queued
                        || matches!(record.status, EntryStatus::Paused | EntryStatus::Failed | EntryStatus::Partial)
                }
            };
            if !stoppable {
                return false;
            }
            record.queued = false;
            record.set_idle_status(idle_status)
        };

        if let Some(entry) = persisted {
            self.inner.persist(&entry).await;
        }
        self.inner.emit(DownloadEvent::StatusChanged {
            key: key.clone(),
            status: idle_status,
        });
        true
    }

    /// Cancels, unregisters and deletes the entry along with its bundle folder.
    /// Returns `false` for unknown keys.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the stored state or the folder cannot be
    /// removed. The entry is unregistered either way.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove(&self, key: &EntryKey) -> Result<bool, ManagerError> {
        let record = {
            let mut state = self.inner.lock();
            state.order.retain(|registered| registered != key);
            state.records.remove(key)
        };
        let Some(record) = record else {
            return Ok(false);
        };
        if let Some(mut run) = record.run {
            run.token.cancel();
            if let Some(task) = run.task.take() {
                if let Err(error) = task.await {
                    warn!(error = %error, "pipeline task ended abnormally");
                }
            }
        }

        self.inner
            .services
            .storage
            .delete(&key.id, &key.content_type)
            .await?;
        let root = self.inner.config.entry_root(key);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(ManagerError::RemoveBundle { path: root, source }),
        }
        info!("entry removed");
        Ok(true)
    }

    /// Re-registers persisted entries of `content_type`. `factory` rebuilds
    /// the content capability for a stored entry; entries it declines are
    /// skipped. Entries stored mid-run come back `paused`. Returns the number
    /// of entries registered.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the stored states cannot be read.
    pub async fn restore<F>(&self, content_type: &str, factory: F) -> Result<usize, StorageError>
    where
        F: Fn(&Entry) -> Option<Arc<dyn DownloadableContent>>,
    {
        let entries = load_entries(self.inner.services.storage.as_ref(), content_type).await?;
        let mut restored = 0;
        for mut entry in entries {
            if entry.status.is_running() {
                entry.status = EntryStatus::Paused;
            }
            let Some(content) = factory(&entry) else {
                warn!(key = %entry.key(), "no content capability for stored entry");
                continue;
            };
            if self.inner.insert(content, entry) {
                restored += 1;
            }
        }
        info!(content_type, restored, "entries restored");
        Ok(restored)
    }

    #[must_use]
    pub fn status(&self, key: &EntryKey) -> Option<EntryStatus> {
        self.inner.lock().records.get(key).map(|record| record.status)
    }

    #[must_use]
    pub fn progress(&self, key: &EntryKey) -> Option<f64> {
        self.inner.lock().records.get(key).map(|record| record.progress)
    }

    /// Snapshots of every registered entry, in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        let state = self.inner.lock();
        state
            .order
            .iter()
            .filter_map(|key| {
                let record = state.records.get(key)?;
                Some(EntrySnapshot {
                    key: key.clone(),
                    status: record.status,
                    progress: record.progress,
                    last_error: record.last_error.clone(),
                    queued: record.queued,
                })
            })
            .collect()
    }

    /// A copy of the entry, or `None` while a pipeline owns it.
    #[must_use]
    pub fn entry(&self, key: &EntryKey) -> Option<Entry> {
        self.inner.lock().records.get(key)?.entry.clone()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.lock().running()
    }

    /// Resolves once no pipeline is running and nothing is queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Pauses every running entry and waits for the pipelines to unwind.
    pub async fn close(&self) {
        {
            let mut state = self.inner.lock();
            for record in state.records.values_mut() {
                record.queued = false;
                if let Some(run) = record.run.as_mut() {
                    run.stop = Some(StopReason::Pause);
                    run.token.cancel();
                }
            }
        }
        self.wait_idle().await;
        debug!("download manager closed");
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DownloadEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn persist(&self, entry: &Entry) {
        if let Err(error) = save_entry(self.services.storage.as_ref(), entry).await {
            warn!(key = %entry.key(), error = %error, "failed to persist entry state");
        }
    }

    fn insert(&self, content: Arc<dyn DownloadableContent>, entry: Entry) -> bool {
        let key = entry.key();
        let mut state = self.lock();
        if state.records.contains_key(&key) {
            return false;
        }
        state.order.push(key.clone());
        state.records.insert(key, Record::new(content, entry));
        true
    }

    fn start_locked(self: &Arc<Self>, state: &mut ManagerState, key: &EntryKey) -> StartOutcome {
        let running = state.running();
        let Some(record) = state.records.get_mut(key) else {
            return StartOutcome::Unknown;
        };
        if record.run.is_some() {
            return StartOutcome::AlreadyRunning;
        }
        if !record.status.can_start() {
            return StartOutcome::NotStartable(record.status);
        }
        if running >= self.config.max_active {
            debug!(key = %key, running, "all slots busy, entry queued");
            record.queued = true;
            return StartOutcome::Queued;
        }
        let Some(entry) = record.entry.take() else {
            return StartOutcome::AlreadyRunning;
        };

        let token = CancellationToken::new();
        record.queued = false;
        record.status = EntryStatus::Preparing;
        let task = tokio::spawn(Arc::clone(self).run_entry(
            key.clone(),
            Arc::clone(&record.content),
            entry,
            token.clone(),
        ));
        record.run = Some(ActiveRun {
            token,
            stop: None,
            task: Some(task),
        });
        info!(key = %key, "pipeline started");
        StartOutcome::Started
    }

    /// Starts queued entries in registration order until the slots are full.
    fn start_queued(self: &Arc<Self>, state: &mut ManagerState) {
        let queued: Vec<EntryKey> = state
            .order
            .iter()
            .filter(|key| state.records.get(*key).is_some_and(|record| record.queued))
            .cloned()
            .collect();
        for key in queued {
            if self.start_locked(state, &key) == StartOutcome::Queued {
                break;
            }
        }
    }

    async fn run_entry(
        self: Arc<Self>,
        key: EntryKey,
        content: Arc<dyn DownloadableContent>,
        mut entry: Entry,
        token: CancellationToken,
    ) {
        let pipeline = EntryPipeline::new(
            content,
            self.services.clone(),
            self.config.entry_root(&key),
            token,
        );
        let observer = Arc::clone(&self);
        let observed_key = key.clone();
        let on_event = move |event: PipelineEvent| observer.on_pipeline_event(&observed_key, event);
        let result = pipeline.run(&mut entry, &on_event).await;
        self.finish(key, entry, result).await;
    }

    fn on_pipeline_event(&self, key: &EntryKey, event: PipelineEvent) {
        {
            let mut state = self.lock();
            if let Some(record) = state.records.get_mut(key) {
                match event {
                    PipelineEvent::Status(status) => record.status = status,
                    PipelineEvent::Progress(progress) => record.progress = progress,
                }
            }
        }
        self.emit(match event {
            PipelineEvent::Status(status) => DownloadEvent::StatusChanged {
                key: key.clone(),
                status,
            },
            PipelineEvent::Progress(progress) => DownloadEvent::ProgressChanged {
                key: key.clone(),
                progress,
            },
        });
    }

    /// Settles the entry once its pipeline has returned.
    ///
    /// The slot is only released after a cancelled entry has been stored as
    /// `initialized`, so `wait_idle` never observes a stale stored state.
    async fn finish(
        self: Arc<Self>,
        key: EntryKey,
        mut entry: Entry,
        result: Result<RunOutcome, CaptureError>,
    ) {
        let cancelled = matches!(&result, Err(error) if error.is_cancelled());
        let stop = self
            .lock()
            .records
            .get(&key)
            .and_then(|record| record.run.as_ref())
            .and_then(|run| run.stop);
        if cancelled && stop == Some(StopReason::Cancel) {
            entry.status = EntryStatus::Initialized;
            self.persist(&entry).await;
        }

        let mut events = Vec::new();
        {
            let mut state = self.lock();
            if let Some(record) = state.records.get_mut(&key) {
                record.run = None;
                record.status = entry.status;
                record.progress = entry.progress;
                record.last_error.clone_from(&entry.last_error);
                events.push(DownloadEvent::StatusChanged {
                    key: key.clone(),
                    status: entry.status,
                });
                if let Err(error) = &result {
                    if !cancelled {
                        events.push(DownloadEvent::Failed {
                            key: key.clone(),
                            message: error.to_string(),
                        });
                    }
                }
                record.entry = Some(entry);
            }
            self.start_queued(&mut state);
        }

        for event in events {
            self.emit(event);
        }
        self.idle.notify_waiters();
    }
}
