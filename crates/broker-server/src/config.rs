//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Broker protocol settings.
    #[serde(default)]
    pub broker: BrokerConfig,
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

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum size of the connection pool.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "broker_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Broker protocol configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Issuer/audience string the broker uses in the tokens it mints and
    /// expects in consent tokens addressed to it.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Public URL of this broker.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Lifetime of access tokens minted on approval, in minutes.
    #[serde(default = "default_access_token_ttl_minutes")]
    pub access_token_ttl_minutes: i64,

    /// Hex-encoded Ed25519 signing key (64 hex chars). When absent an
    /// ephemeral key is generated at startup; tokens and platform
    /// signatures then do not survive a restart.
    #[serde(default)]
    pub signing_key_hex: Option<String>,

    /// Shared token guarding the admin API. Admin routes reject every
    /// request when unset.
    #[serde(default)]
    pub admin_token: Option<String>,

    /// Endpoint notified when a data request awaits consent. Notification
    /// is disabled when unset.
    #[serde(default)]
    pub notify_url: Option<String>,

    /// Interval of the background expiry sweep, in seconds. 0 disables it.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "broker.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_issuer() -> String {
    "trustbroker".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_access_token_ttl_minutes() -> i64 {
    10
}

fn default_sweep_interval_seconds() -> u64 {
    60
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

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            public_url: default_public_url(),
            access_token_ttl_minutes: default_access_token_ttl_minutes(),
            signing_key_hex: None,
            admin_token: None,
            notify_url: None,
            sweep_interval_seconds: default_sweep_interval_seconds(),
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
/// - `BROKER_HOST` overrides `server.host`
/// - `BROKER_PORT` overrides `server.port`
/// - `BROKER_DB_PATH` overrides `database.path`
/// - `BROKER_LOG_LEVEL` overrides `logging.level`
/// - `BROKER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `BROKER_ISSUER` overrides `broker.issuer`
/// - `BROKER_PUBLIC_URL` overrides `broker.public_url`
/// - `BROKER_SIGNING_KEY` overrides `broker.signing_key_hex`
/// - `BROKER_ADMIN_TOKEN` overrides `broker.admin_token`
/// - `BROKER_NOTIFY_URL` overrides `broker.notify_url`
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

    // Environment variable overrides
    if let Ok(host) = std::env::var("BROKER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("BROKER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("BROKER_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("BROKER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("BROKER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(issuer) = std::env::var("BROKER_ISSUER") {
        config.broker.issuer = issuer;
    }
    if let Ok(url) = std::env::var("BROKER_PUBLIC_URL") {
        config.broker.public_url = url;
    }
    if let Ok(key) = std::env::var("BROKER_SIGNING_KEY") {
        config.broker.signing_key_hex = Some(key);
    }
    if let Ok(token) = std::env::var("BROKER_ADMIN_TOKEN") {
        config.broker.admin_token = Some(token);
    }
    if let Ok(url) = std::env::var("BROKER_NOTIFY_URL") {
        config.broker.notify_url = Some(url);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.broker.issuer, "trustbroker");
        assert_eq!(config.broker.access_token_ttl_minutes, 10);
        assert!(config.broker.admin_token.is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [broker]
            issuer = "broker.example"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.port, 8080);
        assert_eq!(parsed.broker.issuer, "broker.example");
        assert_eq!(parsed.database.path, "broker.db");
        assert_eq!(parsed.broker.sweep_interval_seconds, 60);
    }
}
