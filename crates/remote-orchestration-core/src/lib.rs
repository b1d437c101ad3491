//! Remote Orchestration Core Library
//!
//! This crate provides the storage foundation for the Remote Orchestration
//! admin console:
//! - Local configuration store (always-available SQLite key/value settings)
//! - Connection string building with per-engine defaults
//! - Engine adapter registry (SQLite, PostgreSQL, MySQL behind Cargo features)
//! - Storage bootstrap with fallback to the embedded engine
//! - Versioned schema migrations for the main store
//! - Application configuration file

pub mod config;
pub mod error;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::error::{Error, Result};
    pub use crate::storage::{
        DataAccessHandle, EngineKind, LocalConfigStore, Storage, StorageBootstrapper,
    };
}
