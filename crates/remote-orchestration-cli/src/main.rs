//! Remote Orchestration CLI - storage bootstrap and settings administration

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use remote_orchestration_core::config::{AppConfig, LoggingConfig};
use remote_orchestration_core::storage::connection_string::redact;
use remote_orchestration_core::storage::settings::{
    KEY_CONNECTION_STRING, KEY_PASSWORD, KEY_PORT, KEY_TYPE,
};
use remote_orchestration_core::storage::{
    AdapterOptions, EngineKind, EngineRegistry, LocalConfigStore, StorageBootstrapper,
};
use serde_json::json;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "remote-orchestration")]
#[command(author, version, about = "Remote Orchestration storage administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Data directory (overrides config file and environment)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Open, migrate and report on the main store
    Bootstrap,

    /// Manage the local configuration store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the connection the next startup would try
    ConnectionString {
        /// Print passwords in clear text
        #[arg(long)]
        show_secrets: bool,
    },

    /// List storage engines and linked adapters
    Engines,

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum StoreAction {
    /// Get a setting
    Get { key: String },
    /// Set a setting
    Set { key: String, value: String },
    /// List all settings
    List,
    /// Remove a setting
    Unset { key: String },
    /// Show the store file path
    Path,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

fn init_tracing(filter: &str, quiet: bool) -> anyhow::Result<()> {
    let filter = if quiet { "remote_orchestration=error" } else { filter };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(filter))?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}

fn with_data_dir(config: AppConfig, data_dir: Option<&Path>) -> AppConfig {
    match data_dir {
        Some(dir) => config.with_data_dir_override(dir),
        None => config,
    }
}

/// Attach the error code and a hint to core errors
fn describe(err: remote_orchestration_core::Error) -> anyhow::Error {
    match err.suggestion() {
        Some(hint) => anyhow::anyhow!("{} [{}]\n  Try: {}", err, err.code(), hint),
        None => anyhow::anyhow!("{} [{}]", err, err.code()),
    }
}

fn display_value(key: &str, value: &str) -> String {
    if key == KEY_PASSWORD {
        "********".to_string()
    } else if key == KEY_CONNECTION_STRING {
        redact(value)
    } else {
        value.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let loaded = AppConfig::load();
    let filter = loaded
        .as_ref()
        .map(|config| config.logging.filter.clone())
        .unwrap_or_else(|_| LoggingConfig::default().filter);
    init_tracing(&filter, cli.quiet)?;

    let data_dir = cli.data_dir.as_deref();
    let config = loaded.map(|config| with_data_dir(config, data_dir));

    match cli.command {
        Commands::Bootstrap => cmd_bootstrap(&config?, cli.format, cli.quiet).await,

        Commands::Store { action } => cmd_store(&config?, action, cli.format, cli.quiet).await,

        Commands::Config { action } => cmd_config(action, data_dir, cli.format, cli.quiet),

        Commands::ConnectionString { show_secrets } => {
            cmd_connection_string(&config?, show_secrets, cli.format).await
        }

        Commands::Engines => cmd_engines(&config?, cli.format),

        Commands::Doctor => cmd_doctor(config, cli.quiet).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_bootstrap(config: &AppConfig, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let storage = StorageBootstrapper::from_config(config)
        .acquire_storage()
        .await
        .map_err(describe)?;
    let report = &storage.report;

    if format == OutputFormat::Json {
        let output = json!({
            "engine": storage.kind().as_str(),
            "connection": storage.descriptor.redacted(),
            "configured_engine": report.configured_engine,
            "fell_back": report.fell_back,
            "first_run": report.first_run,
            "warnings": report.warnings,
            "migration": report.migration,
            "trail": report.trail,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !quiet {
        println!("Storage ready");
        println!("  Engine: {}", storage.kind());
        println!("  Connection: {}", storage.descriptor.redacted());
        if report.fell_back {
            println!(
                "  Fallback: configured engine '{}' was unusable, using embedded SQLite",
                report.configured_engine.as_deref().unwrap_or("unknown")
            );
        }
        match &report.migration {
            Some(status) if status.needs_migration => println!(
                "  Schema: v{} (v{} pending)",
                status.current_version, status.target_version
            ),
            Some(status) if report.first_run => {
                println!("  Schema: v{} (created)", status.current_version)
            }
            Some(status) => println!("  Schema: v{}", status.current_version),
            None => println!("  Schema: unknown"),
        }
        if !report.warnings.is_empty() {
            println!("  Warnings:");
            for warning in &report.warnings {
                println!("    - {}", warning);
            }
        }
    }

    storage.close().await;
    Ok(())
}

async fn cmd_store(
    config: &AppConfig,
    action: StoreAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let store = LocalConfigStore::new(config.local_store_path());
    if let StoreAction::Path = action {
        println!("{}", store.path().display());
        return Ok(());
    }
    store.initialize().await.map_err(describe)?;

    match action {
        StoreAction::Get { key } => match store.get(&key).await.map_err(describe)? {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Setting '{}' is not set", key),
        },
        StoreAction::Set { key, value } => {
            validate_setting(config, &key, &value)?;
            store.set(&key, &value).await.map_err(describe)?;
            if !quiet {
                println!("Set {} = {}", key, display_value(&key, &value));
            }
        }
        StoreAction::List => {
            let entries = store.list().await.map_err(describe)?;
            if format == OutputFormat::Json {
                let items: Vec<_> = entries
                    .iter()
                    .map(|entry| {
                        json!({
                            "key": entry.key,
                            "value": display_value(&entry.key, &entry.value),
                            "updated_at": entry.updated_at,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if entries.is_empty() {
                if !quiet {
                    println!("No settings stored. Startup uses the embedded SQLite defaults.");
                }
            } else {
                for entry in &entries {
                    println!("{} = {}", entry.key, display_value(&entry.key, &entry.value));
                }
            }
        }
        StoreAction::Unset { key } => {
            let removed = store.remove(&key).await.map_err(describe)?;
            if !quiet {
                if removed {
                    println!("Removed {}", key);
                } else {
                    println!("{} was not set", key);
                }
            }
        }
        StoreAction::Path => {}
    }

    store.close().await;
    Ok(())
}

/// Reject values startup would silently ignore
fn validate_setting(config: &AppConfig, key: &str, value: &str) -> anyhow::Result<()> {
    if key == KEY_TYPE {
        let kind = value.parse::<EngineKind>().map_err(describe)?;
        let registry = EngineRegistry::linked(AdapterOptions::from_config(config));
        if !registry.is_available(kind) {
            warn!(
                engine = %kind,
                "No adapter is linked for this engine; startup will fall back to embedded SQLite"
            );
        }
    } else if key == KEY_PORT {
        value
            .trim()
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("Invalid port '{}': expected 1-65535", value))?;
    }
    debug!(key, "Validated setting");
    Ok(())
}

fn cmd_config(
    action: ConfigAction,
    data_dir: Option<&Path>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = with_data_dir(AppConfig::load()?, data_dir);
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = AppConfig::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = with_data_dir(AppConfig::load()?, data_dir);
            let items = config.list()?;
            if format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            AppConfig::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = AppConfig::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_connection_string(
    config: &AppConfig,
    show_secrets: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let descriptor = StorageBootstrapper::from_config(config)
        .plan()
        .await
        .map_err(describe)?;
    let connection = if show_secrets {
        descriptor.connection_string.clone()
    } else {
        descriptor.redacted()
    };

    if format == OutputFormat::Json {
        let output = json!({
            "engine": descriptor.kind.as_str(),
            "embedded_default": descriptor.is_embedded_default(),
            "connection": connection,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}: {}", descriptor.kind, connection);
    }
    Ok(())
}

fn cmd_engines(config: &AppConfig, format: OutputFormat) -> anyhow::Result<()> {
    let registry = EngineRegistry::linked(AdapterOptions::from_config(config));

    if format == OutputFormat::Json {
        let items: Vec<_> = EngineKind::ALL
            .iter()
            .map(|kind| {
                json!({
                    "engine": kind.as_str(),
                    "embedded": kind.is_embedded(),
                    "linked": registry.is_available(*kind),
                    "default_port": kind.default_port(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for kind in EngineKind::ALL {
        let mut line = if registry.is_available(kind) {
            format!("[OK] {}", kind)
        } else {
            format!("[--] {} (no adapter linked)", kind)
        };
        if kind.is_embedded() {
            line.push_str(" [embedded default]");
        } else if let Some(port) = kind.default_port() {
            line.push_str(&format!(" [default port {}]", port));
        }
        println!("{}", line);
    }
    Ok(())
}

async fn cmd_doctor(config: anyhow::Result<AppConfig>, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Remote Orchestration Health Check");
        println!("=================================");
        println!();
    }

    let mut all_ok = true;

    // Check configuration
    let config = match config.and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
                match AppConfig::config_path() {
                    Ok(path) if path.exists() => println!("     File: {}", path.display()),
                    Ok(path) => println!("     File: {} (using defaults)", path.display()),
                    Err(e) => println!("     File: Error - {}", e),
                }
                println!("     Data dir: {}", config.data_dir().display());
            }
            config
        }
        Err(e) => {
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
                println!("     Fix the file or run `remote-orchestration config reset`");
            }
            return Ok(());
        }
    };

    // Check local configuration store
    let store = LocalConfigStore::new(config.local_store_path());
    let settings = match store.initialize().await {
        Ok(()) => match store.load_storage_settings().await {
            Ok(settings) => {
                if !quiet {
                    println!("[OK] Local store: {}", store.path().display());
                }
                Some(settings)
            }
            Err(e) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] Local store: Unreadable - {}", e);
                }
                None
            }
        },
        Err(e) => {
            if !quiet {
                println!("[!!] Local store: {}", e);
                println!("     Startup cannot proceed without a writable data directory");
            }
            return Ok(());
        }
    };
    store.close().await;

    // Check the configured engine
    let registry = EngineRegistry::linked(AdapterOptions::from_config(&config));
    if let Some(settings) = &settings {
        match settings.engine_setting() {
            None => {
                if !quiet {
                    println!("[--] Engine: not configured (embedded SQLite default)");
                }
            }
            Some(raw) => match raw.parse::<EngineKind>() {
                Ok(kind) if registry.is_available(kind) => {
                    if !quiet {
                        println!("[OK] Engine: {}", kind);
                    }
                }
                Ok(kind) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Engine: {} has no linked adapter", kind);
                        println!("     Startup will fall back to embedded SQLite");
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Engine: {}", e);
                        println!("     Try: remote-orchestration store set database:type sqlite");
                    }
                }
            },
        }
    }

    // Check storage bootstrap
    match StorageBootstrapper::from_config(&config).acquire_storage().await {
        Ok(storage) => {
            if storage.report.fell_back {
                all_ok = false;
                if !quiet {
                    println!("[!!] Storage: Fell back to embedded SQLite");
                }
            } else if !quiet {
                println!("[OK] Storage: {}", storage.kind());
            }
            if !quiet {
                println!("     Connection: {}", storage.descriptor.redacted());
                for warning in &storage.report.warnings {
                    println!("     Warning: {}", warning);
                }
            }

            match storage.handle.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Storage: Connected");
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Storage: Health check failed - {}", e);
                    }
                }
            }

            match &storage.report.migration {
                Some(status) if status.needs_migration => {
                    all_ok = false;
                    if !quiet {
                        println!(
                            "[!!] Schema: Migrations pending (v{} -> v{})",
                            status.current_version, status.target_version
                        );
                    }
                }
                Some(status) => {
                    if !quiet {
                        println!("[OK] Schema: v{}", status.current_version);
                    }
                }
                None => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Schema: Migration status unavailable");
                    }
                }
            }

            storage.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Storage: {}", e);
                if let Some(hint) = e.suggestion() {
                    println!("     Try: {}", hint);
                }
            }
        }
    }

    // Summary
    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}
