//! In-process storage gateway.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StorageError, StorageGateway};

/// `dashmap`-backed storage for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: DashMap<(String, String), (u64, String)>,
    sequence: AtomicU64,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored states across all content types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stored state for one key.
    #[must_use]
    pub fn get(&self, id: &str, content_type: &str) -> Option<String> {
        self.rows
            .get(&(id.to_string(), content_type.to_string()))
            .map(|row| row.1.clone())
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    async fn save(&self, id: &str, content_type: &str, state: &str) -> Result<(), StorageError> {
        let key = (id.to_string(), content_type.to_string());
        let mut row = self
            .rows
            .entry(key)
            .or_insert_with(|| (self.sequence.fetch_add(1, Ordering::Relaxed), String::new()));
        row.1 = state.to_string();
        Ok(())
    }

    async fn load_all(&self, content_type: &str) -> Result<Vec<String>, StorageError> {
        let mut rows: Vec<(u64, String)> = self
            .rows
            .iter()
            .filter(|row| row.key().1 == content_type)
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by_key(|(sequence, _)| *sequence);
        Ok(rows.into_iter().map(|(_, state)| state).collect())
    }

    async fn delete(&self, id: &str, content_type: &str) -> Result<(), StorageError> {
        self.rows.remove(&(id.to_string(), content_type.to_string()));
        Ok(())
    }
}
