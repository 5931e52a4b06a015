//! Opening the mimic database.
//!
//! A single `kv_store` table backs every persisted blob (histories, the
//! tracked-device registry and the replay flags). The schema ships with the
//! binary and is brought up to date each time the database is opened.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;

use crate::error::StorageError;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Where the database lives.
#[derive(Debug, Clone)]
pub struct Config {
    /// `sqlite:mimic.db` for a file next to the daemon, `sqlite::memory:` in tests.
    pub database_url: String,
}

impl Config {
    /// Open the database, creating the file on first start, and apply any
    /// migration it has not seen yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the URL is invalid, the file cannot be
    /// opened or a migration fails.
    pub async fn build(self) -> Result<Database, StorageError> {
        let options = SqliteConnectOptions::from_str(&self.database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        MIGRATOR.run(&pool).await?;
        Ok(Database { pool })
    }
}

/// Open mimic database; clones share the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for in-flight writes and close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_TABLES: &str = "SELECT name FROM sqlite_master \
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' \
        ORDER BY name";

    #[tokio::test]
    async fn should_create_only_kv_store_table() {
        let db = Config {
            database_url: "sqlite::memory:".to_string(),
        }
        .build()
        .await
        .unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(USER_TABLES)
            .fetch_all(db.pool())
            .await
            .unwrap();

        let names: Vec<&str> = tables.iter().map(|row| row.0.as_str()).collect();
        assert_eq!(names, vec!["kv_store"]);
    }
}
