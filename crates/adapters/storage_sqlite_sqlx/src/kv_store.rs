//! `SQLite` implementation of [`KeyValueStore`].

use sqlx::SqlitePool;

use mimic_app::ports::KeyValueStore;
use mimic_domain::error::MimicError;
use mimic_domain::time::now;

use crate::error::StorageError;

const SELECT: &str = "SELECT value FROM kv_store WHERE key = ?";

const UPSERT: &str = r"
    INSERT INTO kv_store (key, value, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
";

const DELETE: &str = "DELETE FROM kv_store WHERE key = ?";

/// `SQLite`-backed key-value store. One row per key.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Create a new store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MimicError> {
        let row: Option<(String,)> = sqlx::query_as(SELECT)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), MimicError> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn unset(&self, key: &str) -> Result<(), MimicError> {
        sqlx::query(DELETE)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}
