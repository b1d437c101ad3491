//! PostgreSQL adapter

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;

use super::{AdapterOptions, connectivity, open_or_provision};
use crate::error::Result;
use crate::storage::connection_string::{ConnectionString, is_url};
use crate::storage::engine::EngineKind;
use crate::storage::handle::DataAccessHandle;
use crate::storage::registry::EngineAdapter;

/// Database every PostgreSQL server has, used to create the target
const MAINTENANCE_DATABASE: &str = "postgres";

/// invalid_catalog_name: the target database does not exist
const MISSING_DATABASE: &str = "3D000";

/// duplicate_database: another process created it first
const DUPLICATE_DATABASE: &str = "42P04";

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(code))
}

fn is_missing_database(err: &sqlx::Error) -> bool {
    has_code(err, MISSING_DATABASE)
}

#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    options: AdapterOptions,
}

impl PostgresAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self { options }
    }

    /// Driver options plus the database name to provision, if known
    fn connect_options(connection_string: &str) -> Result<(PgConnectOptions, Option<String>)> {
        if is_url(connection_string) {
            let options = PgConnectOptions::from_str(connection_string)
                .map_err(|e| connectivity(EngineKind::Postgres, e))?;
            return Ok((options, None));
        }

        let cs = ConnectionString::parse(connection_string)?;
        let host = cs.require(&["host", "server"])?;
        let database = cs.require(&["database", "initial catalog"])?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .database(database)
            .username(cs.get(&["username", "user id", "user", "uid"]).unwrap_or("postgres"))
            .password(cs.get(&["password", "pwd"]).unwrap_or(""));
        if let Some(port) = cs.port(&["port"])? {
            options = options.port(port);
        }

        Ok((options, Some(database.to_string())))
    }

    async fn open(&self, options: PgConnectOptions) -> std::result::Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.options.max_connections)
            .acquire_timeout(self.options.acquire_timeout)
            .connect_with(options)
            .await
    }

    /// Create the target database from the maintenance database
    async fn create_database(
        &self,
        options: &PgConnectOptions,
        database: &str,
    ) -> std::result::Result<(), sqlx::Error> {
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.options.acquire_timeout)
            .connect_with(options.clone().database(MAINTENANCE_DATABASE))
            .await?;

        let statement = format!("CREATE DATABASE \"{}\"", database.replace('"', "\"\""));
        let created = sqlx::raw_sql(&statement).execute(&admin).await;
        admin.close().await;

        match created {
            Err(e) if !has_code(&e, DUPLICATE_DATABASE) => Err(e),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn connect(&self, connection_string: &str) -> Result<DataAccessHandle> {
        let (options, database) = Self::connect_options(connection_string)?;

        let pool = open_or_provision(
            EngineKind::Postgres,
            self.options.acquire_timeout,
            database.as_deref(),
            is_missing_database,
            || self.open(options.clone()),
            || self.create_database(&options, database.as_deref().unwrap_or_default()),
        )
        .await?;

        Ok(DataAccessHandle::Postgres(pool))
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
    fn test_options_from_built_string() {
        let (options, database) = PostgresAdapter::connect_options(
            "Host=db1;Port=6543;Database=ros;Username=postgres;Password=",
        )
        .unwrap();

        assert_eq!(database.as_deref(), Some("ros"));
        assert_eq!(options.get_host(), "db1");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("ros"));
    }

    #[test]
    fn test_url_override_skips_provisioning() {
        let (_, database) =
            PostgresAdapter::connect_options("postgres://u:p@db1:5432/ros").unwrap();
        assert!(database.is_none());
    }

    #[test]
    fn test_bad_port_is_invalid() {
        let err = PostgresAdapter::connect_options("Host=db1;Port=x;Database=ros").unwrap_err();
        assert!(matches!(err, Error::InvalidConnectionString(_)));
    }

    #[test]
    fn test_only_invalid_catalog_triggers_provisioning() {
        assert!(is_missing_database(&database_error("3D000")));
        // insufficient_privilege, invalid_password
        assert!(!is_missing_database(&database_error("42501")));
        assert!(!is_missing_database(&database_error("28P01")));
        assert!(!is_missing_database(&sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connectivity_failure() {
        let tmp = TempDir::new().unwrap();
        let adapter = PostgresAdapter::new(
            AdapterOptions::with_data_dir(tmp.path()).acquire_timeout(Duration::from_secs(2)),
        );

        let err = adapter
            .connect("Host=127.0.0.1;Port=1;Database=ros;Username=postgres;Password=")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectivityFailure(_)));
    }
}
