//! Error types for Remote Orchestration

use thiserror::Error;

/// Result type alias using the crate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result codes that mean another connection holds the lock
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Remote Orchestration error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Bootstrap errors (E100-E199)
    #[error(
        "Configuration store unavailable: {0}. Check that the data directory is writable."
    )]
    ConfigurationStoreUnavailable(String),

    #[error("Unresolvable engine setting '{0}'. Expected one of: sqlite, sqlserver, postgresql, mysql.")]
    UnresolvableEngineSetting(String),

    #[error("No adapter for the '{0}' engine is linked into this build.")]
    EngineAdapterUnavailable(String),

    #[error("Connectivity failure: {0}")]
    ConnectivityFailure(String),

    #[error("Migration failed: {0}")]
    MigrationFailure(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    #[error("Database is busy: {0}. Retry the operation.")]
    DatabaseBusy(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u128),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            Self::DatabaseBusy(err.to_string())
        } else {
            Self::DatabaseError(err)
        }
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => is_lock_conflict(db_err.as_ref()),
        _ => false,
    }
}

/// Lock conflicts per engine; any other database error is not retryable
fn is_lock_conflict(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    if db_err.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
        return db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false);
    }

    #[cfg(feature = "postgres")]
    if let Some(pg_err) = db_err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        // serialization_failure, deadlock_detected, lock_not_available
        return matches!(pg_err.code(), "40001" | "40P01" | "55P03");
    }

    #[cfg(feature = "mysql")]
    if let Some(mysql_err) = db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
        // ER_LOCK_WAIT_TIMEOUT, ER_LOCK_DEADLOCK
        return matches!(mysql_err.number(), 1205 | 1213);
    }

    false
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigurationStoreUnavailable(_) => "E100",
            Self::UnresolvableEngineSetting(_) => "E101",
            Self::EngineAdapterUnavailable(_) => "E102",
            Self::ConnectivityFailure(_) => "E103",
            Self::MigrationFailure(_) => "E104",
            Self::InvalidConnectionString(_) => "E105",
            Self::DatabaseError(_) => "E400",
            Self::DatabaseBusy(_) => "E401",
            Self::Timeout(_) => "E402",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseBusy(_) | Self::Timeout(_))
    }

    /// Whether this error must abort process startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationStoreUnavailable(_) | Self::ConnectivityFailure(_)
        )
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ConfigurationStoreUnavailable(_) => {
                Some("remote-orchestration config get paths.data_dir".to_string())
            }
            Self::UnresolvableEngineSetting(_) => {
                Some("remote-orchestration store set database:type sqlite".to_string())
            }
            Self::EngineAdapterUnavailable(_) => Some("remote-orchestration engines".to_string()),
            Self::ConnectivityFailure(_) => Some("remote-orchestration doctor".to_string()),
            Self::DatabaseBusy(_) => Some("Retry the operation".to_string()),
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::database_error;

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = Error::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, Error::DatabaseBusy(_)));
        assert!(err.is_retryable());
        assert_eq!(err.code(), "E401");
    }

    #[test]
    fn test_numeric_server_codes_are_not_busy() {
        // 42501 & 0xff and "5" both look like SQLITE_BUSY when masked
        for code in ["42501", "5", "6"] {
            let err = Error::from(database_error(code));
            assert!(matches!(err, Error::DatabaseError(_)), "code {code}");
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_sqlite_write_lock_conflict_is_busy() {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::time::Duration;

        let tmp = tempfile::TempDir::new().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(tmp.path().join("locked.db"))
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(50));

        let holder = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .unwrap();
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::raw_sql("CREATE TABLE t (v INTEGER)")
            .execute(&holder)
            .await
            .unwrap();
        let mut conn = holder.acquire().await.unwrap();
        sqlx::raw_sql("BEGIN IMMEDIATE; INSERT INTO t VALUES (1);")
            .execute(&mut *conn)
            .await
            .unwrap();

        let err = sqlx::query("INSERT INTO t VALUES (2)")
            .execute(&writer)
            .await
            .map_err(Error::from)
            .unwrap_err();
        assert!(matches!(err, Error::DatabaseBusy(_)), "{err}");
        assert!(err.is_retryable());
        assert_eq!(err.code(), "E401");

        sqlx::raw_sql("ROLLBACK").execute(&mut *conn).await.unwrap();
        drop(conn);
        writer.close().await;
        holder.close().await;
    }

    #[test]
    fn test_row_not_found_is_not_retryable() {
        let err = Error::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, Error::DatabaseError(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fatal_taxonomy() {
        assert!(Error::ConfigurationStoreUnavailable("disk".into()).is_fatal());
        assert!(Error::ConnectivityFailure("down".into()).is_fatal());
        assert!(!Error::EngineAdapterUnavailable("sqlserver".into()).is_fatal());
        assert!(!Error::UnresolvableEngineSetting("oracle".into()).is_fatal());
        assert!(!Error::MigrationFailure("locked".into()).is_fatal());
    }

    #[test]
    fn test_suggestions() {
        let err = Error::UnresolvableEngineSetting("oracle".into());
        assert_eq!(
            err.suggestion().as_deref(),
            Some("remote-orchestration store set database:type sqlite")
        );
        assert!(Error::Other("x".into()).suggestion().is_none());
    }
}
