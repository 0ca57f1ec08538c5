//! Configuration loading for switchboxd.

mod defaults;
mod listen;

pub use listen::{EndpointConfig, MAX_LISTEN_PARAM_SZ, normalize_listen_params};

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use defaults::{default_check_timeouts_ms, default_reopen_backoff_ms, default_relay_name, default_silence_ms};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// Relay-wide identity and timing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Sent as the relay's identity in the authentication frame exchanged
    /// with service peers.
    #[serde(default = "default_relay_name")]
    pub name: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub idle_timeouts: IdleTimeoutsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_relay_name(),
            log_format: LogFormat::default(),
            idle_timeouts: IdleTimeoutsConfig::default(),
        }
    }
}

/// Timeouts governing the connection worker's select loop.
#[derive(Debug, Clone, Deserialize)]
pub struct IdleTimeoutsConfig {
    /// No bytes received on a connection within this many milliseconds
    /// terminates it.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// Upper bound on how long a worker's select waits before re-checking
    /// timeouts even with nothing else to do.
    #[serde(default = "default_check_timeouts_ms")]
    pub check_timeouts_ms: u64,
    /// Backoff before retrying a failed endpoint bind.
    #[serde(default = "default_reopen_backoff_ms")]
    pub reopen_backoff_ms: u64,
}

impl Default for IdleTimeoutsConfig {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            check_timeouts_ms: default_check_timeouts_ms(),
            reopen_backoff_ms: default_reopen_backoff_ms(),
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Endpoints to listen on. At least one is required.
    pub endpoints: Vec<EndpointConfig>,
    /// Address to expose Prometheus metrics on, e.g. `"127.0.0.1:9100"`.
    pub metrics_address: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[endpoints]] block is required".into(),
            ));
        }
        for ep in &self.endpoints {
            normalize_listen_params(&ep.listen).map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}
