//! Keyed persistence of entry state.
//!
//! The pipeline treats storage as opaque JSON in, JSON out, keyed by
//! `(id, content_type)`. Implementations serialize their own writes.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::entry::Entry;

/// Storage-related errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Query or connection failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Entry state could not be encoded or decoded.
    #[error("invalid entry state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Generic keyed persistence used by the pipeline and manager.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Inserts or replaces the state stored under `(id, content_type)`.
    async fn save(&self, id: &str, content_type: &str, state: &str) -> Result<(), StorageError>;

    /// Every state stored for `content_type`, oldest registration first.
    async fn load_all(&self, content_type: &str) -> Result<Vec<String>, StorageError>;

    /// Removes the state under `(id, content_type)`; missing keys are not an error.
    async fn delete(&self, id: &str, content_type: &str) -> Result<(), StorageError>;
}

/// Serializes and saves `entry`.
///
/// # Errors
///
/// Returns [`StorageError`] when encoding or the write fails.
pub async fn save_entry(storage: &dyn StorageGateway, entry: &Entry) -> Result<(), StorageError> {
    let state = serde_json::to_string(entry)?;
    storage.save(&entry.id, &entry.content_type, &state).await
}

/// Loads every decodable entry of `content_type`; undecodable rows are skipped.
///
/// # Errors
///
/// Returns [`StorageError`] when the read fails.
pub async fn load_entries(
    storage: &dyn StorageGateway,
    content_type: &str,
) -> Result<Vec<Entry>, StorageError> {
    let states = storage.load_all(content_type).await?;
    let mut entries = Vec::with_capacity(states.len());
    for state in states {
        match serde_json::from_str::<Entry>(&state) {
            Ok(entry) => entries.push(entry),
            Err(error) => warn!(content_type, error = %error, "skipping undecodable entry state"),
        }
    }
    Ok(entries)
}
