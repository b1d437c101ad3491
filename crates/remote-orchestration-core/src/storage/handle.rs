//! Engine-bound data access handle
//!
//! The handle wraps the connection pool of whichever engine the bootstrapper
//! resolved. It is cheap to clone and shared by every service for the life of
//! the process. Variants for server engines only exist when their Cargo
//! feature is enabled.

use sqlx::sqlite::SqlitePool;
use std::future::Future;
use std::time::Duration;

use super::engine::EngineKind;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum DataAccessHandle {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),
    #[cfg(feature = "mysql")]
    MySql(sqlx::MySqlPool),
}

impl DataAccessHandle {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Sqlite(_) => EngineKind::Sqlite,
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => EngineKind::Postgres,
            #[cfg(feature = "mysql")]
            Self::MySql(_) => EngineKind::MySql,
        }
    }

    /// The SQLite pool, when the embedded engine is active
    pub fn as_sqlite(&self) -> Option<&SqlitePool> {
        match self {
            Self::Sqlite(pool) => Some(pool),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Run a script of one or more statements without bind parameters
    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        match self {
            Self::Sqlite(pool) => {
                sqlx::raw_sql(sql).execute(pool).await?;
            }
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => {
                sqlx::raw_sql(sql).execute(pool).await?;
            }
            #[cfg(feature = "mysql")]
            Self::MySql(pool) => {
                sqlx::raw_sql(sql).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Run a query returning a single nullable integer
    pub async fn fetch_optional_i64(&self, sql: &str) -> Result<Option<i64>> {
        let value = match self {
            Self::Sqlite(pool) => sqlx::query_scalar::<_, Option<i64>>(sql)
                .fetch_one(pool)
                .await?,
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => sqlx::query_scalar::<_, Option<i64>>(sql)
                .fetch_one(pool)
                .await?,
            #[cfg(feature = "mysql")]
            Self::MySql(pool) => sqlx::query_scalar::<_, Option<i64>>(sql)
                .fetch_one(pool)
                .await?,
        };
        Ok(value)
    }

    /// Record an applied migration version
    pub(crate) async fn insert_migration(&self, version: i64, description: &str) -> Result<()> {
        match self {
            Self::Sqlite(pool) => {
                sqlx::query("INSERT INTO _migrations (version, description) VALUES (?, ?)")
                    .bind(version)
                    .bind(description)
                    .execute(pool)
                    .await?;
            }
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => {
                sqlx::query("INSERT INTO _migrations (version, description) VALUES ($1, $2)")
                    .bind(version)
                    .bind(description)
                    .execute(pool)
                    .await?;
            }
            #[cfg(feature = "mysql")]
            Self::MySql(pool) => {
                sqlx::query("INSERT INTO _migrations (version, description) VALUES (?, ?)")
                    .bind(version)
                    .bind(description)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Check that the engine answers a trivial query
    pub async fn health_check(&self) -> Result<()> {
        self.execute_script("SELECT 1").await
    }

    /// Run a downstream operation under a caller-supplied deadline
    pub async fn with_timeout<T, F>(&self, timeout: Duration, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(timeout, operation)
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis()))?
    }

    /// Close the pool; outstanding clones stop working
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => pool.close().await,
            #[cfg(feature = "mysql")]
            Self::MySql(pool) => pool.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_handle() -> DataAccessHandle {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");
        DataAccessHandle::Sqlite(pool)
    }

    #[tokio::test]
    async fn test_health_check() {
        let handle = memory_handle().await;
        assert_eq!(handle.kind(), EngineKind::Sqlite);
        handle.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_optional_null() {
        let handle = memory_handle().await;
        handle
            .execute_script("CREATE TABLE t (v INTEGER); ")
            .await
            .unwrap();
        assert_eq!(
            handle.fetch_optional_i64("SELECT MAX(v) FROM t").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let handle = memory_handle().await;
        let result: Result<()> = handle
            .with_timeout(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Timeout(10)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let handle = memory_handle().await;
        let pool = handle.as_sqlite().unwrap().clone();
        let value = handle
            .with_timeout(Duration::from_secs(5), async move {
                let v: i64 = sqlx::query_scalar("SELECT 41 + 1").fetch_one(&pool).await?;
                Ok(v)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }
}
