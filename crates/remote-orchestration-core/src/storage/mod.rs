//! Storage layer - local settings store + pluggable main store
//!
//! # Architecture
//!
//! - `local_store`: always-available SQLite key/value store for bootstrap settings
//! - `settings`: setting keys, defaults and the settings snapshot
//! - `connection_string`: pure connection string builder, parser and redaction
//! - `registry` / `adapters`: engine adapters linked into this build
//! - `handle`: the engine-bound pool shared by all services
//! - `migrations`: versioned schema for the main store
//! - `bootstrap`: startup sequence tying it all together
//!
//! # Usage
//!
//! ```ignore
//! use remote_orchestration_core::config::AppConfig;
//! use remote_orchestration_core::storage::StorageBootstrapper;
//!
//! let config = AppConfig::load()?;
//! let storage = StorageBootstrapper::from_config(&config).acquire_storage().await?;
//! let handle = storage.handle.clone();
//! ```

pub mod adapters;
pub mod bootstrap;
pub mod connection_string;
pub mod engine;
pub mod handle;
pub mod local_store;
pub mod migrations;
pub mod registry;
pub mod settings;

// Re-export commonly used types
pub use adapters::AdapterOptions;
pub use bootstrap::{BootstrapReport, BootstrapState, Storage, StorageBootstrapper};
pub use connection_string::{ConnectionDescriptor, ConnectionString, build_connection_string};
pub use engine::EngineKind;
pub use handle::DataAccessHandle;
pub use local_store::{ConfigurationEntry, LocalConfigStore};
pub use migrations::{CURRENT_VERSION, Migration, MigrationStatus, migration_status, run_migrations};
pub use registry::{EngineAdapter, EngineRegistry};
pub use settings::StorageSettings;

/// Open storage as configured by the app config
pub async fn acquire_storage(config: &crate::config::AppConfig) -> crate::Result<Storage> {
    StorageBootstrapper::from_config(config).acquire_storage().await
}
