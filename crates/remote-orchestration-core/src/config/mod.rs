//! Application configuration with file persistence
//!
//! This is the process-level configuration (paths, pool sizing, log filter).
//! Database selection lives in the local configuration store instead, see
//! [`crate::storage::LocalConfigStore`].

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "REMOTE_ORCHESTRATION_CONFIG_DIR";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "REMOTE_ORCHESTRATION_DATA_DIR";

/// File name of the local configuration store inside the data directory
pub const LOCAL_STORE_FILE: &str = "settings.db";

/// Remote Orchestration configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    /// Data directory given on the command line, never persisted
    #[serde(skip)]
    data_dir_override: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the local store and relative embedded databases
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub acquire_timeout_secs: u64,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 5,
            max_connections: 10,
            busy_timeout_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "remote_orchestration=info".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

/// Get the default data directory
pub fn default_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("remote-orchestration")
    } else {
        PathBuf::from(".remote-orchestration")
    }
}

impl AppConfig {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("remote-orchestration")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.max_connections == 0 {
            return Err(anyhow!("storage.max_connections must be at least 1"));
        }
        if self.storage.acquire_timeout_secs == 0 {
            return Err(anyhow!("storage.acquire_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Use `dir` as the data directory regardless of env and config file
    pub fn with_data_dir_override(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir_override = Some(dir.into());
        self
    }

    /// Resolve the data directory: explicit override, env, config file, platform default
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir_override {
            return dir.clone();
        }
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        self.paths.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Path of the local configuration store
    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir().join(LOCAL_STORE_FILE)
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "paths.data_dir" => Ok(self.data_dir().display().to_string()),
            "storage.acquire_timeout_secs" => Ok(self.storage.acquire_timeout_secs.to_string()),
            "storage.max_connections" => Ok(self.storage.max_connections.to_string()),
            "storage.busy_timeout_secs" => Ok(self.storage.busy_timeout_secs.to_string()),
            "logging.filter" => Ok(self.logging.filter.clone()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `remote-orchestration config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "paths.data_dir" => {
                self.paths.data_dir = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "storage.acquire_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid acquire_timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Acquire timeout must be at least 1 second"));
                }
                self.storage.acquire_timeout_secs = secs;
            }
            "storage.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("Max connections must be at least 1"));
                }
                self.storage.max_connections = max;
            }
            "storage.busy_timeout_secs" => {
                self.storage.busy_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid busy_timeout_secs value: {}", value))?;
            }
            "logging.filter" => {
                self.logging.filter = value.to_string();
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `remote-orchestration config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "paths.data_dir",
            "storage.acquire_timeout_secs",
            "storage.max_connections",
            "storage.busy_timeout_secs",
            "logging.filter",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.storage.acquire_timeout_secs, 5);
        assert_eq!(config.storage.max_connections, 10);
        assert_eq!(config.logging.filter, "remote_orchestration=info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [paths]
            data_dir = "/srv/remote-orchestration"

            [storage]
            max_connections = 3
            "#,
        )
        .unwrap();

        assert_eq!(
            config.paths.data_dir,
            Some(PathBuf::from("/srv/remote-orchestration"))
        );
        assert_eq!(config.storage.max_connections, 3);
        assert_eq!(config.storage.acquire_timeout_secs, 5);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(AppConfig::from_toml("[storage]\nmax_connections = 0\n").is_err());
        assert!(AppConfig::from_toml("[storage]\nmax_connections = \"many\"\n").is_err());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = AppConfig::default();
        config.set("storage.max_connections", "20").unwrap();
        assert_eq!(config.get("storage.max_connections").unwrap(), "20");

        config.set("logging.filter", "debug").unwrap();
        assert_eq!(config.get("logging.filter").unwrap(), "debug");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.set("storage.max_connections", "0").is_err());
        assert!(config.set("storage.acquire_timeout_secs", "soon").is_err());
        assert!(config.set("unknown.key", "x").is_err());
    }

    #[test]
    fn test_list_covers_all_keys() {
        let config = AppConfig::default();
        let items = config.list().unwrap();
        assert_eq!(items.len(), 5);
        assert!(items.iter().any(|(k, _)| k == "paths.data_dir"));
    }

    #[test]
    fn test_toml_round_trip_preserves_data_dir() {
        let mut config = AppConfig::default();
        config.set("paths.data_dir", "/var/lib/ro").unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.paths.data_dir, Some(PathBuf::from("/var/lib/ro")));
    }

    #[test]
    fn test_data_dir_override_wins_and_is_not_saved() {
        let mut config = AppConfig::default();
        config.set("paths.data_dir", "/var/lib/ro").unwrap();
        let config = config.with_data_dir_override("/tmp/ro-cli");

        assert_eq!(config.data_dir(), PathBuf::from("/tmp/ro-cli"));
        assert_eq!(
            config.local_store_path(),
            PathBuf::from("/tmp/ro-cli").join(LOCAL_STORE_FILE)
        );
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("ro-cli"));
    }
}
