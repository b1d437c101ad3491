//! Embedded SQLite adapter
//!
//! Pooling is disabled unless the connection string asks for it, so all
//! callers share one connection. Writers that still collide wait up to the
//! busy timeout and then surface [`crate::Error::DatabaseBusy`].

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use super::{AdapterOptions, connectivity, within};
use crate::error::Result;
use crate::storage::connection_string::{ConnectionString, is_url};
use crate::storage::engine::EngineKind;
use crate::storage::handle::DataAccessHandle;
use crate::storage::registry::EngineAdapter;

const DATA_SOURCE_KEYS: [&str; 3] = ["data source", "datasource", "filename"];

#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    options: AdapterOptions,
}

impl SqliteAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self { options }
    }

    /// Translate a connection string into driver options and a pool size
    fn connect_options(&self, connection_string: &str) -> Result<(SqliteConnectOptions, u32)> {
        if is_url(connection_string) {
            let options = SqliteConnectOptions::from_str(connection_string)
                .map_err(|e| connectivity(EngineKind::Sqlite, e))?
                .create_if_missing(true)
                .busy_timeout(self.options.busy_timeout);
            return Ok((options, 1));
        }

        let cs = ConnectionString::parse(connection_string)?;
        let data_source = cs.require(&DATA_SOURCE_KEYS)?;
        let pooling = cs.flag(&["pooling"]).unwrap_or(false);
        let shared_cache = cs
            .get(&["cache"])
            .map(|v| v.eq_ignore_ascii_case("shared"))
            .unwrap_or(true);

        let options = if data_source == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| connectivity(EngineKind::Sqlite, e))?
        } else {
            let path = self.options.resolve_path(data_source);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    connectivity(
                        EngineKind::Sqlite,
                        format!("cannot create {}: {}", parent.display(), e),
                    )
                })?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .shared_cache(shared_cache)
        };

        let max_connections = if pooling {
            self.options.max_connections
        } else {
            1
        };

        Ok((
            options
                .foreign_keys(true)
                .busy_timeout(self.options.busy_timeout),
            max_connections,
        ))
    }
}

#[async_trait]
impl EngineAdapter for SqliteAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn connect(&self, connection_string: &str) -> Result<DataAccessHandle> {
        let (options, max_connections) = self.connect_options(connection_string)?;

        let pool = within(
            EngineKind::Sqlite,
            self.options.acquire_timeout,
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(self.options.acquire_timeout)
                .connect_with(options),
        )
        .await?;

        tracing::debug!(max_connections, "SQLite pool opened");
        Ok(DataAccessHandle::Sqlite(pool))
    }
}
