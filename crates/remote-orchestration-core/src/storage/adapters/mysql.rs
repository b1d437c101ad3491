//! MySQL adapter

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use std::str::FromStr;

use super::{AdapterOptions, connectivity, open_or_provision};
use crate::error::Result;
use crate::storage::connection_string::{ConnectionString, is_url};
use crate::storage::engine::EngineKind;
use crate::storage::handle::DataAccessHandle;
use crate::storage::registry::EngineAdapter;

/// ER_BAD_DB_ERROR; its SQLSTATE 42000 is shared with syntax and access errors
const UNKNOWN_DATABASE: u16 = 1049;

fn is_missing_database(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|e| e.number() == UNKNOWN_DATABASE),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct MySqlAdapter {
    options: AdapterOptions,
}

/// Server options without a database, and the database to use
struct Target {
    server: MySqlConnectOptions,
    database: Option<String>,
}

impl MySqlAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self { options }
    }

    fn target(connection_string: &str) -> Result<Target> {
        if is_url(connection_string) {
            let server = MySqlConnectOptions::from_str(connection_string)
                .map_err(|e| connectivity(EngineKind::MySql, e))?;
            return Ok(Target {
                server,
                database: None,
            });
        }

        let cs = ConnectionString::parse(connection_string)?;
        let mut server = MySqlConnectOptions::new()
            .host(cs.require(&["server", "host"])?)
            .username(cs.get(&["user", "user id", "uid", "username"]).unwrap_or("root"))
            .password(cs.get(&["password", "pwd"]).unwrap_or(""));
        if let Some(port) = cs.port(&["port"])? {
            server = server.port(port);
        }

        Ok(Target {
            server,
            database: Some(cs.require(&["database", "initial catalog"])?.to_string()),
        })
    }

    async fn open(&self, options: MySqlConnectOptions) -> std::result::Result<MySqlPool, sqlx::Error> {
        MySqlPoolOptions::new()
            .max_connections(self.options.max_connections)
            .acquire_timeout(self.options.acquire_timeout)
            .connect_with(options)
            .await
    }

    /// Create the target database over a server-level connection
    async fn create_database(
        &self,
        server: &MySqlConnectOptions,
        database: &str,
    ) -> std::result::Result<(), sqlx::Error> {
        let admin = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.options.acquire_timeout)
            .connect_with(server.clone())
            .await?;

        let statement = format!(
            "CREATE DATABASE IF NOT EXISTS `{}`",
            database.replace('`', "``")
        );
        let created = sqlx::raw_sql(&statement).execute(&admin).await;
        admin.close().await;

        created.map(|_| ())
    }
}

#[async_trait]
impl EngineAdapter for MySqlAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::MySql
    }

    async fn connect(&self, connection_string: &str) -> Result<DataAccessHandle> {
        let Target { server, database } = Self::target(connection_string)?;
        let options = match database.as_deref() {
            Some(database) => server.clone().database(database),
            None => server.clone(),
        };

        let pool = open_or_provision(
            EngineKind::MySql,
            self.options.acquire_timeout,
            database.as_deref(),
            is_missing_database,
            || self.open(options.clone()),
            || self.create_database(&server, database.as_deref().unwrap_or_default()),
        )
        .await?;

        Ok(DataAccessHandle::MySql(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::error::test_support::database_error;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_target_from_built_string() {
        let target = MySqlAdapter::target(
            "Server=db2;Port=3307;Database=RemoteOrchestration;User=root;Password=",
        )
        .unwrap();
        assert_eq!(target.database.as_deref(), Some("RemoteOrchestration"));
    }

    #[test]
    fn test_missing_database_is_invalid() {
        let err = MySqlAdapter::target("Server=db2;User=root").err().unwrap();
        assert!(matches!(err, Error::InvalidConnectionString(_)));
    }

    #[test]
    fn test_generic_sqlstate_does_not_trigger_provisioning() {
        // access denied and syntax errors share 42000 with unknown database
        assert!(!is_missing_database(&database_error("42000")));
        assert!(!is_missing_database(&database_error("1049")));
        assert!(!is_missing_database(&sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connectivity_failure() {
        let tmp = TempDir::new().unwrap();
        let adapter = MySqlAdapter::new(
            AdapterOptions::with_data_dir(tmp.path()).acquire_timeout(Duration::from_secs(2)),
        );

        let err = adapter
            .connect("Server=127.0.0.1;Port=1;Database=ros;User=root;Password=")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectivityFailure(_)));
    }
}
