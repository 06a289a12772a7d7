//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use statewatch_db::DbRuntimeSettings;
use statewatch_stream::BrokerConfig;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event stream sizing.
    #[serde(default)]
    pub events: EventsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "statewatch_stream=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Event broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Batches retained for replay to new subscribers.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Per-subscriber live queue capacity, in batches.
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    4646
}

fn default_db_path() -> String {
    "statewatch.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_buffer_size() -> usize {
    BrokerConfig::default().buffer_size
}

fn default_subscriber_queue_size() -> usize {
    BrokerConfig::default().subscriber_queue_size
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            subscriber_queue_size: default_subscriber_queue_size(),
        }
    }
}

impl EventsConfig {
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            buffer_size: self.buffer_size,
            subscriber_queue_size: self.subscriber_queue_size,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `STATEWATCH_HOST` overrides `server.host`
/// - `STATEWATCH_PORT` overrides `server.port`
/// - `STATEWATCH_DB_PATH` overrides `database.path`
/// - `STATEWATCH_LOG_LEVEL` overrides `logging.level`
/// - `STATEWATCH_LOG_JSON` overrides `logging.json` ("true" or "1" enables)
/// - `STATEWATCH_EVENT_BUFFER_SIZE` overrides `events.buffer_size`
/// - `STATEWATCH_SUBSCRIBER_QUEUE_SIZE` overrides `events.subscriber_queue_size`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("STATEWATCH_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("STATEWATCH_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(db_path) = var("STATEWATCH_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("STATEWATCH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("STATEWATCH_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(parsed) = var("STATEWATCH_EVENT_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
        config.events.buffer_size = parsed;
    }
    if let Some(parsed) = var("STATEWATCH_SUBSCRIBER_QUEUE_SIZE").and_then(|v| v.parse().ok()) {
        config.events.subscriber_queue_size = parsed;
    }
}
