//! Local configuration store
//!
//! A small SQLite key/value store that exists independently of the main
//! database engine. It holds the `database:*` bootstrap settings and is the
//! one piece of storage the service can always reach, so administrators can
//! repair a broken engine selection.
//!
//! The store initializes itself on first access: the file, its directory and
//! its schema are created when missing. After [`LocalConfigStore::close`] the
//! next access opens it again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::settings::{KEY_CONNECTION_STRING, KEY_PREFIX, StorageSettings};
use crate::error::{Error, Result};

/// Schema version of the store itself, tracked with `PRAGMA user_version`
const STORE_SCHEMA_VERSION: i64 = 1;

const STORE_SCHEMA_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS configuration_entries (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

const MEMORY_PATH: &str = ":memory:";

/// A persisted setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Lazily opened key/value store backed by its own SQLite file
#[derive(Debug, Clone)]
pub struct LocalConfigStore {
    path: PathBuf,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl LocalConfigStore {
    /// Create a handle to the store at `path`; nothing touches disk until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Default::default(),
        }
    }

    /// Create an in-memory store (useful for testing)
    pub fn in_memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    /// Create the file and schema if needed
    ///
    /// Fails with [`Error::ConfigurationStoreUnavailable`] when the physical
    /// store cannot be created.
    pub async fn initialize(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    async fn pool(&self) -> Result<SqlitePool> {
        let mut slot = self.pool.lock().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let pool = self.open().await.map_err(|e| {
            Error::ConfigurationStoreUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    async fn open(&self) -> Result<SqlitePool> {
        let (options, max_connections) = if self.is_memory() {
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5));
            (options, 2)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        migrate_store(&pool).await?;

        tracing::debug!(path = %self.path.display(), "Local configuration store ready");
        Ok(pool)
    }

    /// Get a single value
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM configuration_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool().await?)
            .await?;

        Ok(row.map(|r| r.get("value")))
    }

    /// Get every entry whose key starts with `prefix`
    pub async fn get_all(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query(
            "SELECT key, value FROM configuration_entries WHERE substr(key, 1, ?) = ? ORDER BY key",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&self.pool().await?)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    /// Insert or update a value in place
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::InvalidInput("configuration key cannot be empty".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO configuration_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool().await?)
        .await?;

        Ok(())
    }

    /// Delete a value; returns whether it existed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM configuration_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool().await?)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List all entries ordered by key
    pub async fn list(&self) -> Result<Vec<ConfigurationEntry>> {
        let rows = sqlx::query(
            "SELECT key, value, updated_at FROM configuration_entries ORDER BY key",
        )
        .fetch_all(&self.pool().await?)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<ConfigurationEntry> {
                Ok(ConfigurationEntry {
                    key: r.try_get("key")?,
                    value: r.try_get("value")?,
                    updated_at: r.try_get("updated_at")?,
                })
            })
            .collect()
    }

    /// Read the storage settings snapshot used by the bootstrapper
    pub async fn load_storage_settings(&self) -> Result<StorageSettings> {
        let mut entries = self.get_all(KEY_PREFIX).await?;
        if let Some(full) = self.get(KEY_CONNECTION_STRING).await? {
            entries.insert(KEY_CONNECTION_STRING.to_string(), full);
        }
        Ok(StorageSettings::from_entries(entries))
    }

    /// Whether a pool is currently open
    pub async fn is_open(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// Close the underlying pool, if it is open
    pub async fn close(&self) {
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
        }
    }
}

async fn migrate_store(pool: &SqlitePool) -> Result<()> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    if version < 1 {
        tracing::info!("Creating local configuration store schema");
        sqlx::raw_sql(STORE_SCHEMA_V1).execute(pool).await?;
    }

    if version < STORE_SCHEMA_VERSION {
        sqlx::raw_sql(&format!("PRAGMA user_version = {}", STORE_SCHEMA_VERSION))
            .execute(pool)
            .await?;
    }

    Ok(())
}
