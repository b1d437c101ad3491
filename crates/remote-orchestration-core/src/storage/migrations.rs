//! Main store migrations
//!
//! This module manages schema migrations for the main store. Each migration
//! carries DDL for every linked dialect; versions are tracked in the
//! `_migrations` table and applied in order at startup.

use super::engine::EngineKind;
use super::handle::DataAccessHandle;
use crate::error::{Error, Result};

const CREATE_MIGRATIONS_TABLE_SQLITE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

const CREATE_MIGRATIONS_TABLE_POSTGRES: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version BIGINT PRIMARY KEY NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
"#;

const CREATE_MIGRATIONS_TABLE_MYSQL: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version BIGINT PRIMARY KEY NOT NULL,
        description VARCHAR(255) NOT NULL DEFAULT '',
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    ) ENGINE=InnoDB;
"#;

/// Migration 1: hosts, remotes, tags, users and their links
const V1_SQLITE: &str = r#"
    CREATE TABLE IF NOT EXISTS hosts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        url TEXT NOT NULL DEFAULT '',
        environment TEXT NOT NULL DEFAULT 'development',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS remotes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        scope TEXT NOT NULL DEFAULT '',
        description TEXT,
        url TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        display_name TEXT,
        role TEXT NOT NULL DEFAULT 'viewer' CHECK (role IN ('viewer', 'editor', 'admin')),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS host_remotes (
        host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        remote_id INTEGER NOT NULL REFERENCES remotes(id) ON DELETE CASCADE,
        PRIMARY KEY (host_id, remote_id)
    );

    CREATE TABLE IF NOT EXISTS remote_tags (
        remote_id INTEGER NOT NULL REFERENCES remotes(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (remote_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS host_tags (
        host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (host_id, tag_id)
    );

    CREATE INDEX IF NOT EXISTS idx_host_remotes_remote_id ON host_remotes(remote_id);
"#;

const V1_POSTGRES: &str = r#"
    CREATE TABLE IF NOT EXISTS hosts (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        url TEXT NOT NULL DEFAULT '',
        environment TEXT NOT NULL DEFAULT 'development',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS remotes (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        scope TEXT NOT NULL DEFAULT '',
        description TEXT,
        url TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS tags (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        display_name TEXT,
        role TEXT NOT NULL DEFAULT 'viewer' CHECK (role IN ('viewer', 'editor', 'admin')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS host_remotes (
        host_id BIGINT NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        remote_id BIGINT NOT NULL REFERENCES remotes(id) ON DELETE CASCADE,
        PRIMARY KEY (host_id, remote_id)
    );

    CREATE TABLE IF NOT EXISTS remote_tags (
        remote_id BIGINT NOT NULL REFERENCES remotes(id) ON DELETE CASCADE,
        tag_id BIGINT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (remote_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS host_tags (
        host_id BIGINT NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        tag_id BIGINT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (host_id, tag_id)
    );

    CREATE INDEX IF NOT EXISTS idx_host_remotes_remote_id ON host_remotes(remote_id);
"#;

const V1_MYSQL: &str = r#"
    CREATE TABLE IF NOT EXISTS hosts (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        description TEXT,
        url VARCHAR(2048) NOT NULL DEFAULT '',
        environment VARCHAR(64) NOT NULL DEFAULT 'development',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
    ) ENGINE=InnoDB;

    CREATE TABLE IF NOT EXISTS remotes (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        scope VARCHAR(255) NOT NULL DEFAULT '',
        description TEXT,
        url VARCHAR(2048) NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
    ) ENGINE=InnoDB;

    CREATE TABLE IF NOT EXISTS tags (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE
    ) ENGINE=InnoDB;

    CREATE TABLE IF NOT EXISTS users (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        email VARCHAR(255) NOT NULL UNIQUE,
        display_name VARCHAR(255),
        role VARCHAR(16) NOT NULL DEFAULT 'viewer',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    ) ENGINE=InnoDB;

    CREATE TABLE IF NOT EXISTS host_remotes (
        host_id BIGINT NOT NULL,
        remote_id BIGINT NOT NULL,
        PRIMARY KEY (host_id, remote_id),
        FOREIGN KEY (host_id) REFERENCES hosts(id) ON DELETE CASCADE,
        FOREIGN KEY (remote_id) REFERENCES remotes(id) ON DELETE CASCADE
    ) ENGINE=InnoDB;

    CREATE TABLE IF NOT EXISTS remote_tags (
        remote_id BIGINT NOT NULL,
        tag_id BIGINT NOT NULL,
        PRIMARY KEY (remote_id, tag_id),
        FOREIGN KEY (remote_id) REFERENCES remotes(id) ON DELETE CASCADE,
        FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
    ) ENGINE=InnoDB;

    CREATE TABLE IF NOT EXISTS host_tags (
        host_id BIGINT NOT NULL,
        tag_id BIGINT NOT NULL,
        PRIMARY KEY (host_id, tag_id),
        FOREIGN KEY (host_id) REFERENCES hosts(id) ON DELETE CASCADE,
        FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
    ) ENGINE=InnoDB;
"#;

/// Migration 2: published versions of each remote
const V2_SQLITE: &str = r#"
    CREATE TABLE IF NOT EXISTS remote_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        remote_id INTEGER NOT NULL REFERENCES remotes(id) ON DELETE CASCADE,
        version TEXT NOT NULL,
        entry_url TEXT NOT NULL,
        is_current INTEGER NOT NULL DEFAULT 0,
        published_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (remote_id, version)
    );

    CREATE INDEX IF NOT EXISTS idx_remote_versions_remote_id ON remote_versions(remote_id);
"#;

const V2_POSTGRES: &str = r#"
    CREATE TABLE IF NOT EXISTS remote_versions (
        id BIGSERIAL PRIMARY KEY,
        remote_id BIGINT NOT NULL REFERENCES remotes(id) ON DELETE CASCADE,
        version TEXT NOT NULL,
        entry_url TEXT NOT NULL,
        is_current BOOLEAN NOT NULL DEFAULT FALSE,
        published_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (remote_id, version)
    );

    CREATE INDEX IF NOT EXISTS idx_remote_versions_remote_id ON remote_versions(remote_id);
"#;

const V2_MYSQL: &str = r#"
    CREATE TABLE IF NOT EXISTS remote_versions (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        remote_id BIGINT NOT NULL,
        version VARCHAR(64) NOT NULL,
        entry_url VARCHAR(2048) NOT NULL,
        is_current BOOLEAN NOT NULL DEFAULT FALSE,
        published_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (remote_id, version),
        FOREIGN KEY (remote_id) REFERENCES remotes(id) ON DELETE CASCADE
    ) ENGINE=InnoDB;
"#;

/// One schema step with DDL per dialect
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sqlite: &'static str,
    pub postgres: &'static str,
    pub mysql: &'static str,
}

impl Migration {
    pub fn sql_for(&self, kind: EngineKind) -> Option<&'static str> {
        match kind {
            EngineKind::Sqlite => Some(self.sqlite),
            EngineKind::Postgres => Some(self.postgres),
            EngineKind::MySql => Some(self.mysql),
            EngineKind::SqlServer => None,
        }
    }
}

/// All migrations, in version order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Hosts, remotes, tags and users",
        sqlite: V1_SQLITE,
        postgres: V1_POSTGRES,
        mysql: V1_MYSQL,
    },
    Migration {
        version: 2,
        description: "Remote versions",
        sqlite: V2_SQLITE,
        postgres: V2_POSTGRES,
        mysql: V2_MYSQL,
    },
];

/// Current schema version
pub const CURRENT_VERSION: i64 = 2;

fn migrations_table_sql(kind: EngineKind) -> Result<&'static str> {
    match kind {
        EngineKind::Sqlite => Ok(CREATE_MIGRATIONS_TABLE_SQLITE),
        EngineKind::Postgres => Ok(CREATE_MIGRATIONS_TABLE_POSTGRES),
        EngineKind::MySql => Ok(CREATE_MIGRATIONS_TABLE_MYSQL),
        EngineKind::SqlServer => Err(Error::EngineAdapterUnavailable(kind.to_string())),
    }
}

/// Make sure migration bookkeeping exists; returns true on a first-ever run
pub async fn ensure_schema(handle: &DataAccessHandle) -> Result<bool> {
    handle
        .execute_script(migrations_table_sql(handle.kind())?)
        .await?;
    let first_run = get_current_version(handle).await? == 0;
    if first_run {
        tracing::info!(engine = %handle.kind(), "Empty target, creating schema");
    }
    Ok(first_run)
}

/// Get the current schema version from the database
async fn get_current_version(handle: &DataAccessHandle) -> Result<i64> {
    let version = handle
        .fetch_optional_i64("SELECT MAX(version) FROM _migrations")
        .await?;
    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
pub async fn run_migrations(handle: &DataAccessHandle) -> Result<()> {
    run_migrations_with(handle, MIGRATIONS).await
}

/// Run pending migrations from an explicit list
pub async fn run_migrations_with(handle: &DataAccessHandle, migrations: &[Migration]) -> Result<()> {
    ensure_schema(handle).await?;
    let current_version = get_current_version(handle).await?;
    let target_version = migrations.iter().map(|m| m.version).max().unwrap_or(0);

    tracing::info!(
        current_version = current_version,
        target_version = target_version,
        "Checking database migrations"
    );

    if current_version >= target_version {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    for migration in migrations.iter().filter(|m| m.version > current_version) {
        tracing::info!(
            "Applying migration v{}: {}",
            migration.version,
            migration.description
        );
        let sql = migration
            .sql_for(handle.kind())
            .ok_or_else(|| Error::EngineAdapterUnavailable(handle.kind().to_string()))?;

        handle.execute_script(sql).await.map_err(|e| {
            Error::MigrationFailure(format!("v{} ({}): {}", migration.version, migration.description, e))
        })?;
        handle
            .insert_migration(migration.version, migration.description)
            .await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(handle: &DataAccessHandle) -> Result<bool> {
    Ok(migration_status(handle).await?.needs_migration)
}

/// Get migration status information
pub async fn migration_status(handle: &DataAccessHandle) -> Result<MigrationStatus> {
    ensure_schema(handle).await?;
    let current_version = get_current_version(handle).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i64,
    /// Target schema version (latest)
    pub target_version: i64,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_handle() -> DataAccessHandle {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");
        DataAccessHandle::Sqlite(pool)
    }

    #[test]
    fn test_current_version_matches_list() {
        assert_eq!(MIGRATIONS.last().unwrap().version, CURRENT_VERSION);
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let handle = create_test_handle().await;

        // Should start with no migrations
        let status = migration_status(&handle).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&handle).await.unwrap();

        let status = migration_status(&handle).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let handle = create_test_handle().await;

        run_migrations(&handle).await.unwrap();
        run_migrations(&handle).await.unwrap();

        let status = migration_status(&handle).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!needs_migration(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_schema_detects_first_run() {
        let handle = create_test_handle().await;
        assert!(ensure_schema(&handle).await.unwrap());

        run_migrations(&handle).await.unwrap();
        assert!(!ensure_schema(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_tables_created() {
        let handle = create_test_handle().await;
        run_migrations(&handle).await.unwrap();
        let pool = handle.as_sqlite().unwrap();

        let tables = [
            "hosts",
            "remotes",
            "tags",
            "users",
            "host_remotes",
            "remote_tags",
            "host_tags",
            "remote_versions",
        ];

        for table in tables {
            let result: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_broken_migration_reports_failure_and_keeps_progress() {
        let handle = create_test_handle().await;
        let broken = [
            MIGRATIONS[0],
            Migration {
                version: 2,
                description: "Broken",
                sqlite: "CREATE TABLE (",
                postgres: "",
                mysql: "",
            },
        ];

        let err = run_migrations_with(&handle, &broken).await.unwrap_err();
        assert!(matches!(err, Error::MigrationFailure(ref m) if m.starts_with("v2")));

        let status = migration_status(&handle).await.unwrap();
        assert_eq!(status.current_version, 1);
    }
}
