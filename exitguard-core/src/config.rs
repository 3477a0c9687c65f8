//! Service configuration loaded from `exitguard.toml`.
//!
//! Every section and field has a default, so an empty file (or no file) yields
//! a runnable local setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Longest span a `*_secs` duration setting may hold (the chrono range).
pub const MAX_SPAN_SECS: u64 = i64::MAX as u64 / 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitGuardConfig {
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
    pub gateway: GatewayConfig,
    pub price_feed: PriceFeedConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("exitguard.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between breach sweeps.
    pub interval_secs: u64,
    /// Close positions held at least this long. Absent disables the trigger.
    pub max_holding_secs: Option<u64>,
    /// Age after which an unacknowledged command is reported as stale.
    pub stale_after_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_holding_secs: None,
            stale_after_secs: 120,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_holding(&self) -> Option<chrono::Duration> {
        self.max_holding_secs.map(span)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        span(self.stale_after_secs)
    }
}

/// Seconds as a chrono span, saturating at [`MAX_SPAN_SECS`].
pub fn span(secs: u64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs.min(MAX_SPAN_SECS) as i64).unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    /// Accepted clock skew for signed requests, and the nonce memory span.
    pub timestamp_window_secs: u64,
    pub max_body_bytes: usize,
    /// Whether the poll listing includes ACKNOWLEDGED commands by default.
    pub include_acknowledged: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8088".to_string(),
            timestamp_window_secs: 300,
            max_body_bytes: 16 * 1024,
            include_acknowledged: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceFeedConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".to_string(),
            timeout_secs: 5,
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

impl ExitGuardConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.interval_secs == 0 {
            return Err(ConfigError::Invalid("monitor.interval_secs must be > 0"));
        }
        if self.monitor.max_holding_secs.is_some_and(|s| s > MAX_SPAN_SECS) {
            return Err(ConfigError::Invalid("monitor.max_holding_secs is out of range"));
        }
        if self.monitor.stale_after_secs > MAX_SPAN_SECS {
            return Err(ConfigError::Invalid("monitor.stale_after_secs is out of range"));
        }
        if self.gateway.timestamp_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.timestamp_window_secs must be > 0",
            ));
        }
        if self.gateway.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("gateway.max_body_bytes must be > 0"));
        }
        if self.price_feed.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("price_feed.base_url must not be empty"));
        }
        Ok(())
    }
}
