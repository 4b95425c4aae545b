//! Configuration Module
//!
//! Provides JSON-based configuration for the bridge with support for:
//! - Downstream broker settings (`Broker`)
//! - Upstream TTN application settings (`Ttn`)
//! - Logging
//! - `${VAR}` / `${VAR:-default}` substitution from the environment
//!
//! The configuration is loaded once at startup and is read-only afterwards.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

pub use broker::DownstreamBrokerConfig;
pub use ttn::UpstreamBrokerConfig;

mod broker;
mod ttn;


/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// JSON parsing error
    Parse(serde_json::Error),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Downstream broker the derived messages are published to
    #[serde(rename = "Broker")]
    pub broker: DownstreamBrokerConfig,
    /// Upstream TTN handler the uplinks are received from
    #[serde(rename = "Ttn")]
    pub ttn: UpstreamBrokerConfig,
    /// Logging configuration
    #[serde(rename = "Log", default)]
    pub log: LogConfig,
    /// How long in-flight messages may finish after a shutdown signal
    #[serde(
        rename = "DrainTimeout",
        default = "default_drain_timeout",
        with = "duration"
    )]
    pub drain_timeout: Duration,
    /// Messages handled concurrently; uplinks arriving beyond this are dropped
    #[serde(rename = "MaxInFlight", default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_in_flight() -> usize {
    64
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(rename = "Level", default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    ///
    /// `${VAR}` and `${VAR:-default}` references in the file are replaced
    /// with environment values before parsing, so credentials such as the
    /// TTN access key can be kept out of the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let substituted = substitute_env_vars(&content)?;
        Self::parse(&substituted)
    }

    /// Parse configuration from a string (no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;
        self.ttn.validate()?;

        if self.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "MaxInFlight must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Reject empty strings for required settings
fn require_non_empty(value: &str, key: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{} must not be empty", key)));
    }
    Ok(())
}

/// Durations accept either a human-readable string ("10s", "250ms") or a
/// bare integer of nanoseconds.
pub(crate) mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Nanos(u64),
        Text(humantime_serde::Serde<Duration>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawDuration::deserialize(deserializer)? {
            RawDuration::Nanos(nanos) => Duration::from_nanos(nanos),
            RawDuration::Text(text) => text.into_inner(),
        })
    }
}
