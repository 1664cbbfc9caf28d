//! Notifications broadcast by the download manager.

use crate::entry::{EntryKey, EntryStatus};

/// Capacity of the manager's broadcast channel; slow subscribers lag.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A change in one entry's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    StatusChanged { key: EntryKey, status: EntryStatus },
    ProgressChanged { key: EntryKey, progress: f64 },
    /// Sent alongside the `failed` status change.
    Failed { key: EntryKey, message: String },
}

impl DownloadEvent {
    #[must_use]
    pub fn key(&self) -> &EntryKey {
        match self {
            Self::StatusChanged { key, .. }
            | Self::ProgressChanged { key, .. }
            | Self::Failed { key, .. } => key,
        }
    }
}

/// Point-in-time view of a registered entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    pub key: EntryKey,
    pub status: EntryStatus,
    pub progress: f64,
    pub last_error: Option<String>,
    /// Waiting for a free slot.
    pub queued: bool,
}
