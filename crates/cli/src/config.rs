//! Configuration loading from eventd.toml.

use serde::{Deserialize, Serialize};
use server::{EventDbConfig, RotationPolicy};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Event database location and backend.
    #[serde(default)]
    pub event_db: EventDbConfig,

    /// When the persistence worker re-checks the month.
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Persistence worker tuning.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Pause between attempts to open an unavailable store.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Events kept in memory while the store is unavailable (0 = drop).
    #[serde(default)]
    pub pending_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: default_idle_backoff_ms(),
            pending_limit: 0,
        }
    }
}

impl PersistenceConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

fn default_idle_backoff_ms() -> u64 {
    server::DEFAULT_IDLE_BACKOFF.as_millis() as u64
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to render config: {0}")]
    Serialize(String),

    #[error("invalid log filter: {0}")]
    LogFilter(String),
}
