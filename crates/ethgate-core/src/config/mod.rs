//! Application configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in the struct `Default` impls
//! 2. **Config file**: TOML file, path from the `ETHGATE_CONFIG` env var
//! 3. **Environment variables**: `ETHGATE__SECTION__FIELD` overrides
//!
//! The admin shared secret has no default and must be supplied; `validate()`
//! rejects an empty secret rather than starting an unguarded admin surface.

use crate::ratelimit::{RateWindow, WindowConfig};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on. Must be greater than 0. Defaults to `3000`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum concurrent in-flight requests. Defaults to `100`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Request body cap in bytes. Defaults to 1 MiB.
    #[serde(default = "default_request_body_limit_bytes")]
    pub request_body_limit_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3000
}

fn default_max_concurrent_requests() -> usize {
    100
}

fn default_request_body_limit_bytes() -> usize {
    1024 * 1024
}

/// Admin surface settings. The secret is required and has no default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared secret expected in the `x-admin-secret` header.
    #[serde(default)]
    pub secret: String,
}

/// Process-wide default limits per window. Each is independently
/// overridable through the environment and per key via custom limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    /// Requests per 10-minute window. Defaults to `100`.
    #[serde(default = "default_per_10min")]
    pub per_10min: u64,

    /// Requests per day. Defaults to `10_000`.
    #[serde(default = "default_per_day")]
    pub per_day: u64,

    /// Requests per 30-day month. Defaults to `300_000`.
    #[serde(default = "default_per_month")]
    pub per_month: u64,
}

fn default_per_10min() -> u64 {
    100
}

fn default_per_day() -> u64 {
    10_000
}

fn default_per_month() -> u64 {
    300_000
}

/// Durable storage location for the key registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `api-keys.json`. Defaults to `./data`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

/// The fronted Ethereum node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// JSON-RPC endpoint URL. Must start with `http`.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g. "info", "debug"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_body_limit_bytes: default_request_body_limit_bytes(),
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            per_10min: default_per_10min(),
            per_day: default_per_day(),
            per_month: default_per_month(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { rpc_url: default_rpc_url(), timeout_seconds: default_timeout_seconds() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            admin: AdminConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            storage: StorageConfig::default(),
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with `ETHGATE__` environment
    /// overrides (e.g. `ETHGATE__ADMIN__SECRET=...`,
    /// `ETHGATE__RATE_LIMITS__PER_10MIN=50`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file or environment cannot be parsed
    /// into a valid configuration.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("ETHGATE").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Loads from `config/config.toml`, path overridable via
    /// `ETHGATE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("ETHGATE_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message if the admin secret is missing, the
    /// upstream URL is malformed, or a numeric field is out of range.
    pub fn validate(&self) -> Result<(), String> {
        if self.admin.secret.is_empty() {
            return Err(
                "Admin secret is required (set ETHGATE__ADMIN__SECRET or admin.secret)".to_string()
            );
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if !self.upstream.rpc_url.starts_with("http") {
            return Err(format!("Invalid upstream RPC URL: {}", self.upstream.rpc_url));
        }

        if self.upstream.timeout_seconds == 0 {
            return Err("Upstream timeout must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }

    /// Path of the durable key store file.
    #[must_use]
    pub fn keys_file(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir).join("api-keys.json")
    }

    /// The configured rate-limit windows with their default limits.
    #[must_use]
    pub fn window_configs(&self) -> Vec<WindowConfig> {
        vec![
            WindowConfig { window: RateWindow::Per10Min, default_limit: self.rate_limits.per_10min },
            WindowConfig { window: RateWindow::PerDay, default_limit: self.rate_limits.per_day },
            WindowConfig { window: RateWindow::PerMonth, default_limit: self.rate_limits.per_month },
        ]
    }

    /// Upstream request timeout as a [`Duration`].
    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_seconds)
    }
}
