//! Bootstrap setting keys and the settings snapshot handed to the bootstrapper

use std::collections::BTreeMap;

pub const KEY_PREFIX: &str = "database:";
pub const KEY_TYPE: &str = "database:type";
pub const KEY_FILENAME: &str = "database:filename";
pub const KEY_HOST: &str = "database:host";
pub const KEY_PORT: &str = "database:port";
pub const KEY_NAME: &str = "database:name";
pub const KEY_USER: &str = "database:user";
pub const KEY_PASSWORD: &str = "database:password";
pub const KEY_POOLING: &str = "database:pooling";
pub const KEY_CACHE: &str = "database:cache";
/// Full connection string override, honored for every engine
pub const KEY_CONNECTION_STRING: &str = "DatabaseConnectionString";

pub const DEFAULT_FILENAME: &str = "remote_orchestration.db";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_DATABASE_NAME: &str = "RemoteOrchestration";

/// Snapshot of the storage settings read from the local configuration store
///
/// Read once at startup and passed by value; nothing reads the store behind
/// the bootstrapper's back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSettings {
    values: BTreeMap<String, String>,
}

impl StorageSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw store entries, keeping only storage keys
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| is_storage_key(k))
            .collect();
        Self { values }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Value for a key; blank values count as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn engine_setting(&self) -> Option<&str> {
        self.get(KEY_TYPE)
    }

    pub fn connection_string_override(&self) -> Option<&str> {
        self.get(KEY_CONNECTION_STRING)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Whether a store key participates in storage bootstrap
pub fn is_storage_key(key: &str) -> bool {
    key.starts_with(KEY_PREFIX) || key == KEY_CONNECTION_STRING
}
