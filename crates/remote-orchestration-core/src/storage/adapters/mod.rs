//! Engine adapters
//!
//! One module per engine. Server engines are compiled only with their Cargo
//! feature; no SQL Server adapter ships in this build.

mod sqlite;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "mysql")]
mod mysql;

pub use sqlite::SqliteAdapter;
#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;
#[cfg(feature = "mysql")]
pub use mysql::MySqlAdapter;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::engine::EngineKind;
use crate::config::AppConfig;
use crate::error::Error;

/// Settings shared by all adapters, taken from the application config
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Base directory for relative embedded database paths
    pub data_dir: PathBuf,
    pub acquire_timeout: Duration,
    /// Pool size for server engines
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl AdapterOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            data_dir: config.data_dir(),
            acquire_timeout: config.storage.acquire_timeout(),
            max_connections: config.storage.max_connections,
            busy_timeout: config.storage.busy_timeout(),
        }
    }

    /// Defaults with an explicit data directory (useful for testing)
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let defaults = AppConfig::default();
        Self {
            data_dir: data_dir.into(),
            acquire_timeout: defaults.storage.acquire_timeout(),
            max_connections: defaults.storage.max_connections,
            busy_timeout: defaults.storage.busy_timeout(),
        }
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Resolve an embedded database path against the data directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

pub(crate) fn connectivity(kind: EngineKind, err: impl std::fmt::Display) -> Error {
    Error::ConnectivityFailure(format!("{kind}: {err}"))
}

/// Bound an engine round-trip by the acquire timeout
pub(crate) async fn within<T, F>(kind: EngineKind, timeout: Duration, fut: F) -> crate::Result<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    bounded(kind, timeout, fut)
        .await?
        .map_err(|e| connectivity(kind, e))
}

/// Like [`within`] but hands back the driver error for inspection
async fn bounded<T, F>(
    kind: EngineKind,
    timeout: Duration,
    fut: F,
) -> crate::Result<Result<T, sqlx::Error>>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        connectivity(
            kind,
            format!("no response within {} ms", timeout.as_millis()),
        )
    })
}

/// Open the target database, creating it only if the server reports it missing
///
/// Accounts that may use but not create databases never reach `provision`
/// once the database exists. After provisioning the target is opened again.
pub(crate) async fn open_or_provision<T, O, OF, P, PF>(
    kind: EngineKind,
    timeout: Duration,
    database: Option<&str>,
    is_missing_database: fn(&sqlx::Error) -> bool,
    open: O,
    provision: P,
) -> crate::Result<T>
where
    O: Fn() -> OF,
    OF: Future<Output = Result<T, sqlx::Error>>,
    P: FnOnce() -> PF,
    PF: Future<Output = Result<(), sqlx::Error>>,
{
    let err = match bounded(kind, timeout, open()).await? {
        Ok(target) => return Ok(target),
        Err(e) => e,
    };

    match database {
        Some(database) if is_missing_database(&err) => {
            tracing::info!(engine = %kind, database, "Creating database");
            within(kind, timeout, provision()).await?;
            within(kind, timeout, open()).await
        }
        _ => Err(connectivity(kind, err)),
    }
}
