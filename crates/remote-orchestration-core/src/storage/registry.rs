//! Engine provider registry
//!
//! Maps an [`EngineKind`] to the adapter able to open a handle for it. Only
//! adapters compiled into the build are registered, so asking for an engine
//! whose driver is absent is a configuration problem
//! ([`Error::EngineAdapterUnavailable`]), not a connectivity one.

use async_trait::async_trait;
use std::collections::HashMap;

use super::adapters::{AdapterOptions, SqliteAdapter};
use super::connection_string::ConnectionDescriptor;
use super::engine::EngineKind;
use super::handle::DataAccessHandle;
use crate::error::{Error, Result};

/// Opens handles for one engine
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Provision the target if needed and open a pool against it
    async fn connect(&self, connection_string: &str) -> Result<DataAccessHandle>;
}

#[derive(Default)]
pub struct EngineRegistry {
    adapters: HashMap<EngineKind, Box<dyn EngineAdapter>>,
}

impl EngineRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every adapter linked into this build
    pub fn linked(options: AdapterOptions) -> Self {
        let mut registry = Self::new();
        registry.register(SqliteAdapter::new(options.clone()));

        #[cfg(feature = "postgres")]
        registry.register(super::adapters::PostgresAdapter::new(options.clone()));

        #[cfg(feature = "mysql")]
        registry.register(super::adapters::MySqlAdapter::new(options.clone()));

        tracing::debug!(engines = ?registry.available(), "Engine adapters registered");
        registry
    }

    /// Add or replace the adapter for its engine
    pub fn register(&mut self, adapter: impl EngineAdapter + 'static) {
        self.adapters.insert(adapter.kind(), Box::new(adapter));
    }

    pub fn is_available(&self, kind: EngineKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Registered engines in declaration order
    pub fn available(&self) -> Vec<EngineKind> {
        EngineKind::ALL
            .into_iter()
            .filter(|kind| self.is_available(*kind))
            .collect()
    }

    pub fn adapter(&self, kind: EngineKind) -> Result<&dyn EngineAdapter> {
        self.adapters
            .get(&kind)
            .map(|adapter| adapter.as_ref())
            .ok_or_else(|| Error::EngineAdapterUnavailable(kind.to_string()))
    }

    /// Open a handle for a resolved descriptor
    pub async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<DataAccessHandle> {
        let adapter = self.adapter(descriptor.kind)?;
        adapter.connect(&descriptor.connection_string).await
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> EngineRegistry {
        EngineRegistry::linked(AdapterOptions::with_data_dir(dir.path()))
    }

    #[test]
    fn test_sqlite_always_linked() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        assert!(registry.is_available(EngineKind::Sqlite));
        assert_eq!(registry.available()[0], EngineKind::Sqlite);
    }

    #[test]
    fn test_sqlserver_adapter_unavailable() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);

        assert!(!registry.is_available(EngineKind::SqlServer));
        let err = registry.adapter(EngineKind::SqlServer).err().unwrap();
        assert!(matches!(err, Error::EngineAdapterUnavailable(ref k) if k == "sqlserver"));
        assert!(!err.is_fatal());
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_postgres_linked_with_feature() {
        let tmp = TempDir::new().unwrap();
        assert!(registry(&tmp).is_available(EngineKind::Postgres));
    }

    #[test]
    fn test_empty_registry_has_nothing() {
        let registry = EngineRegistry::new();
        assert!(registry.available().is_empty());
        assert!(registry.adapter(EngineKind::Sqlite).is_err());
    }

    #[tokio::test]
    async fn test_connect_embedded_default() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);

        let handle = registry
            .connect(&ConnectionDescriptor::embedded_default())
            .await
            .unwrap();

        assert_eq!(handle.kind(), EngineKind::Sqlite);
        assert!(tmp.path().join("remote_orchestration.db").exists());
        handle.close().await;
    }

    #[tokio::test]
    async fn test_connect_unavailable_engine() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        let descriptor = ConnectionDescriptor::new(EngineKind::SqlServer, "Server=x,1433");

        let err = registry.connect(&descriptor).await.unwrap_err();
        assert!(matches!(err, Error::EngineAdapterUnavailable(_)));
    }
}
