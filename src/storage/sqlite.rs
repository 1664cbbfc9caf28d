//! SQLite-backed storage gateway.
//!
//! - Connection pool management
//! - WAL mode for concurrent reads
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use offline_core::storage::{SqliteStorage, StorageGateway};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = SqliteStorage::new(Path::new("offline.db")).await?;
//! storage.save("42", "web_page", "{}").await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

use super::{StorageError, StorageGateway};

/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connections wait this long before returning `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Entry state persisted in the `offline_entries` table.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Opens (creating if needed) the database at `db_path` and migrates it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Database` if the connection fails,
    /// or `StorageError::Migration` if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, StorageError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database living as long as its single connection.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns `true` if WAL mode is active.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Database` if the query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, StorageError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Closes all pooled connections.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StorageGateway for SqliteStorage {
    #[instrument(skip(self, state), fields(state_len = state.len()))]
    async fn save(&self, id: &str, content_type: &str, state: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO offline_entries (id, content_type, state) VALUES (?, ?, ?)
             ON CONFLICT (id, content_type)
             DO UPDATE SET state = excluded.state, updated_at = datetime('now')",
        )
        .bind(id)
        .bind(content_type)
        .bind(state)
        .execute(&self.pool)
        .await?;
        debug!("entry state saved");
        Ok(())
    }

    async fn load_all(&self, content_type: &str) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT state FROM offline_entries WHERE content_type = ? ORDER BY rowid",
        )
        .bind(content_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(state,)| state).collect())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str, content_type: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM offline_entries WHERE id = ? AND content_type = ?")
            .bind(id)
            .bind(content_type)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_save_upserts() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        storage.save("1", "page", "{\"v\":1}").await.unwrap();
        storage.save("2", "page", "{\"v\":2}").await.unwrap();
        storage.save("1", "page", "{\"v\":3}").await.unwrap();
        storage.save("1", "tool", "{\"v\":4}").await.unwrap();

        let states = storage.load_all("page").await.unwrap();
        assert_eq!(states, vec!["{\"v\":3}", "{\"v\":2}"]);
    }

    #[tokio::test]
    async fn test_delete_is_keyed_by_type() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        storage.save("1", "page", "a").await.unwrap();
        storage.save("1", "tool", "b").await.unwrap();
        storage.delete("1", "page").await.unwrap();
        storage.delete("missing", "page").await.unwrap();

        assert!(storage.load_all("page").await.unwrap().is_empty());
        assert_eq!(storage.load_all("tool").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_file_database_uses_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new(&temp_dir.path().join("state.db"))
            .await
            .unwrap();
        assert!(storage.is_wal_enabled().await.unwrap());
        storage.close().await;
    }
}
