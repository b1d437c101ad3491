//! Storage bootstrap
//!
//! Runs once at startup, before any request is served:
//!
//! 1. read `database:*` settings from the local configuration store
//! 2. resolve the engine kind (unset or unknown falls back to SQLite)
//! 3. build the connection string
//! 4. acquire a handle; on failure retry once against the embedded default
//! 5. ensure migration bookkeeping exists
//! 6. apply pending migrations (failure is logged, not fatal)
//! 7. ready
//!
//! Only two conditions abort startup: the local store cannot be created, or
//! neither the configured engine nor the embedded fallback can be opened.

use serde::Serialize;

use super::adapters::AdapterOptions;
use super::connection_string::ConnectionDescriptor;
use super::engine::EngineKind;
use super::handle::DataAccessHandle;
use super::local_store::LocalConfigStore;
use super::migrations::{self, MIGRATIONS, Migration, MigrationStatus};
use super::registry::EngineRegistry;
use super::settings::StorageSettings;
use crate::config::AppConfig;
use crate::error::{Error, Result};

/// Steps of the bootstrap state machine, recorded in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "engine", rename_all = "snake_case")]
pub enum BootstrapState {
    ReadSettings,
    ResolveEngine,
    ResolvedDefault,
    ResolvedEngine(EngineKind),
    BuildConnectionString,
    AcquireHandle,
    EnsureSchema,
    Migrate,
    Ready,
}

/// What happened during bootstrap
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub trail: Vec<BootstrapState>,
    /// Raw `database:type` value, if one was set
    pub configured_engine: Option<String>,
    /// The configured engine could not be used and SQLite took over
    pub fell_back: bool,
    /// The target had no schema before this startup
    pub first_run: bool,
    pub warnings: Vec<String>,
    pub migration: Option<MigrationStatus>,
}

impl BootstrapReport {
    fn enter(&mut self, state: BootstrapState) {
        tracing::debug!(?state, "Bootstrap transition");
        self.trail.push(state);
    }

    fn warn(&mut self, warning: String) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn reached_ready(&self) -> bool {
        self.trail.last() == Some(&BootstrapState::Ready)
    }
}

/// Ready-to-use storage published to the rest of the application
#[derive(Debug, Clone)]
pub struct Storage {
    pub handle: DataAccessHandle,
    pub descriptor: ConnectionDescriptor,
    pub report: BootstrapReport,
}

impl Storage {
    pub fn kind(&self) -> EngineKind {
        self.handle.kind()
    }

    pub async fn close(&self) {
        self.handle.close().await;
    }
}

#[derive(Debug)]
pub struct StorageBootstrapper {
    store: LocalConfigStore,
    registry: EngineRegistry,
    migrations: Vec<Migration>,
}

impl StorageBootstrapper {
    pub fn new(store: LocalConfigStore, registry: EngineRegistry) -> Self {
        Self {
            store,
            registry,
            migrations: MIGRATIONS.to_vec(),
        }
    }

    /// Bootstrapper for the store and adapters described by the app config
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            LocalConfigStore::new(config.local_store_path()),
            EngineRegistry::linked(AdapterOptions::from_config(config)),
        )
    }

    /// Replace the migration list
    pub fn with_migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn store(&self) -> &LocalConfigStore {
        &self.store
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Read the settings snapshot; an unreadable store yields `None`
    ///
    /// The store is closed afterwards since bootstrap reads it only once.
    async fn read_settings(&self, report: &mut BootstrapReport) -> Option<StorageSettings> {
        report.enter(BootstrapState::ReadSettings);
        let settings = match self.store.load_storage_settings().await {
            Ok(settings) => Some(settings),
            Err(e) => {
                report.warn(format!(
                    "Could not read storage settings, using embedded defaults: {}",
                    e
                ));
                None
            }
        };
        self.store.close().await;
        settings
    }

    /// Resolve the descriptor to try first
    fn resolve(
        &self,
        settings: Option<&StorageSettings>,
        report: &mut BootstrapReport,
    ) -> ConnectionDescriptor {
        report.enter(BootstrapState::ResolveEngine);
        report.configured_engine = settings
            .and_then(|s| s.engine_setting())
            .map(str::to_string);

        let resolved = match (settings, report.configured_engine.clone()) {
            (Some(settings), Some(raw)) => match raw.parse::<EngineKind>() {
                Ok(kind) => Some((kind, settings)),
                Err(e) => {
                    report.warn(format!("{}; using embedded defaults", e));
                    None
                }
            },
            _ => None,
        };

        match resolved {
            Some((kind, settings)) => {
                report.enter(BootstrapState::ResolvedEngine(kind));
                report.enter(BootstrapState::BuildConnectionString);
                ConnectionDescriptor::resolve(kind, settings)
            }
            None => default_descriptor(report),
        }
    }

    /// The descriptor the next startup would try first, without connecting
    pub async fn plan(&self) -> Result<ConnectionDescriptor> {
        self.store.initialize().await?;
        let mut report = BootstrapReport::default();
        let settings = self.read_settings(&mut report).await;
        Ok(self.resolve(settings.as_ref(), &mut report))
    }

    /// Resolve, open and migrate the main store
    pub async fn acquire_storage(&self) -> Result<Storage> {
        self.store.initialize().await?;

        let mut report = BootstrapReport::default();
        let settings = self.read_settings(&mut report).await;
        let descriptor = self.resolve(settings.as_ref(), &mut report);

        report.enter(BootstrapState::AcquireHandle);
        let (handle, descriptor) = match self.registry.connect(&descriptor).await {
            Ok(handle) => (handle, descriptor),
            Err(first) if descriptor.is_embedded_default() => {
                return Err(Error::ConnectivityFailure(format!(
                    "embedded default store unusable: {}",
                    first
                )));
            }
            Err(first) => {
                report.fell_back = true;
                report.warn(format!(
                    "Storage engine '{}' unusable ({}); falling back to embedded SQLite",
                    descriptor.kind, first
                ));

                let fallback = default_descriptor(&mut report);
                report.enter(BootstrapState::AcquireHandle);
                match self.registry.connect(&fallback).await {
                    Ok(handle) => (handle, fallback),
                    Err(second) => {
                        return Err(Error::ConnectivityFailure(format!(
                            "{} engine failed ({}), embedded fallback failed ({})",
                            descriptor.kind, first, second
                        )));
                    }
                }
            }
        };

        report.enter(BootstrapState::EnsureSchema);
        match migrations::ensure_schema(&handle).await {
            Ok(first_run) => report.first_run = first_run,
            Err(e) => report.warn(format!("Could not verify schema: {}", e)),
        }

        report.enter(BootstrapState::Migrate);
        if let Err(e) = migrations::run_migrations_with(&handle, &self.migrations).await {
            let e = match e {
                Error::MigrationFailure(_) => e,
                other => Error::MigrationFailure(other.to_string()),
            };
            report.warn(format!("{}; continuing with the existing schema", e));
        }
        report.migration = migrations::migration_status(&handle).await.ok();

        report.enter(BootstrapState::Ready);
        tracing::info!(
            engine = %descriptor.kind,
            connection = %descriptor.redacted(),
            fell_back = report.fell_back,
            warnings = report.warnings.len(),
            "Storage ready"
        );

        Ok(Storage {
            handle,
            descriptor,
            report,
        })
    }
}

fn default_descriptor(report: &mut BootstrapReport) -> ConnectionDescriptor {
    report.enter(BootstrapState::ResolvedDefault);
    report.enter(BootstrapState::BuildConnectionString);
    ConnectionDescriptor::embedded_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::{DEFAULT_FILENAME, KEY_FILENAME, KEY_TYPE};
    use tempfile::TempDir;

    fn bootstrapper(tmp: &TempDir) -> StorageBootstrapper {
        StorageBootstrapper::new(
            LocalConfigStore::new(tmp.path().join("settings.db")),
            EngineRegistry::linked(AdapterOptions::with_data_dir(tmp.path())),
        )
    }

    #[tokio::test]
    async fn test_first_run_reaches_ready_on_embedded_default() {
        let tmp = TempDir::new().unwrap();
        let storage = bootstrapper(&tmp).acquire_storage().await.unwrap();

        assert_eq!(storage.kind(), EngineKind::Sqlite);
        assert!(storage.descriptor.is_embedded_default());
        assert!(storage.report.reached_ready());
        assert!(storage.report.first_run);
        assert!(!storage.report.fell_back);
        assert!(storage.report.warnings.is_empty());
        assert!(storage.report.trail.contains(&BootstrapState::ResolvedDefault));
        assert!(tmp.path().join(DEFAULT_FILENAME).exists());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_unknown_engine_resolves_default() {
        let tmp = TempDir::new().unwrap();
        let boot = bootstrapper(&tmp);
        boot.store().set(KEY_TYPE, "oracle").await.unwrap();
        boot.store().set(KEY_FILENAME, "ignored.db").await.unwrap();

        let storage = boot.acquire_storage().await.unwrap();
        assert!(storage.descriptor.is_embedded_default());
        assert_eq!(storage.report.configured_engine.as_deref(), Some("oracle"));
        assert_eq!(storage.report.warnings.len(), 1);
        assert!(!tmp.path().join("ignored.db").exists());
        storage.close().await;
    }

    #[tokio::test]
    async fn test_configured_sqlite_file_honored() {
        let tmp = TempDir::new().unwrap();
        let boot = bootstrapper(&tmp);
        boot.store().set(KEY_TYPE, "SQLite").await.unwrap();
        boot.store().set(KEY_FILENAME, "custom.db").await.unwrap();

        let storage = boot.acquire_storage().await.unwrap();
        assert!(tmp.path().join("custom.db").exists());
        assert!(
            storage
                .report
                .trail
                .contains(&BootstrapState::ResolvedEngine(EngineKind::Sqlite))
        );
        storage.close().await;
    }

    #[tokio::test]
    async fn test_sqlserver_without_adapter_falls_back() {
        let tmp = TempDir::new().unwrap();
        let boot = bootstrapper(&tmp);
        boot.store().set(KEY_TYPE, "sqlserver").await.unwrap();

        let storage = boot.acquire_storage().await.unwrap();
        assert_eq!(storage.kind(), EngineKind::Sqlite);
        assert!(storage.report.fell_back);
        assert!(storage.report.reached_ready());
        assert!(storage.report.warnings[0].contains("sqlserver"));
        storage.close().await;
    }

    #[tokio::test]
    async fn test_second_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let boot = StorageBootstrapper::new(
            LocalConfigStore::new(tmp.path().join("settings.db")),
            EngineRegistry::new(),
        );
        boot.store().set(KEY_TYPE, "postgresql").await.unwrap();

        let err = boot.acquire_storage().await.unwrap_err();
        assert!(matches!(err, Error::ConnectivityFailure(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_migration_failure_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let broken = vec![Migration {
            version: 1,
            description: "Broken",
            sqlite: "CREATE TABLE (",
            postgres: "",
            mysql: "",
        }];
        let boot = bootstrapper(&tmp).with_migrations(broken);

        let storage = boot.acquire_storage().await.unwrap();
        assert!(storage.report.reached_ready());
        assert_eq!(storage.report.warnings.len(), 1);
        assert!(storage.report.warnings[0].contains("Migration failed"));
        assert_eq!(storage.report.migration.unwrap().current_version, 0);
        storage.close().await;
    }

    #[tokio::test]
    async fn test_plan_does_not_connect() {
        let tmp = TempDir::new().unwrap();
        let boot = bootstrapper(&tmp);
        boot.store().set(KEY_TYPE, "mysql").await.unwrap();

        let descriptor = boot.plan().await.unwrap();
        assert_eq!(descriptor.kind, EngineKind::MySql);
        assert!(descriptor.connection_string.contains("Port=3306"));
        assert!(!tmp.path().join(DEFAULT_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_store_closed_after_bootstrap() {
        let tmp = TempDir::new().unwrap();
        let boot = bootstrapper(&tmp);

        let storage = boot.acquire_storage().await.unwrap();
        assert!(!boot.store().is_open().await);

        // Still usable for administration afterwards
        boot.store().set(KEY_TYPE, "sqlite").await.unwrap();
        boot.store().close().await;
        storage.close().await;
    }

    #[tokio::test]
    async fn test_unreadable_settings_resolve_default() {
        let tmp = TempDir::new().unwrap();
        let boot = bootstrapper(&tmp);
        boot.store().set(KEY_TYPE, "postgresql").await.unwrap();
        boot.store().close().await;

        let pool = sqlx::SqlitePool::connect_with(
            sqlx::sqlite::SqliteConnectOptions::new().filename(tmp.path().join("settings.db")),
        )
        .await
        .unwrap();
        sqlx::raw_sql("DROP TABLE configuration_entries")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let storage = boot.acquire_storage().await.unwrap();
        assert!(storage.descriptor.is_embedded_default());
        assert_eq!(storage.report.configured_engine, None);
        assert!(!storage.report.fell_back);
        assert_eq!(storage.report.warnings.len(), 1);
        assert!(storage.report.warnings[0].contains("Could not read storage settings"));
        assert_eq!(
            &storage.report.trail[..2],
            &[BootstrapState::ReadSettings, BootstrapState::ResolveEngine]
        );
        assert!(storage.report.trail.contains(&BootstrapState::ResolvedDefault));
        assert!(storage.report.reached_ready());
        storage.close().await;
    }
}
