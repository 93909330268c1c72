//! Broker configuration.
//!
//! All limits and intervals the broker enforces live here. The config is
//! plain data: it can be built in code, or loaded from a TOML file with
//! every field optional (missing fields take the documented defaults).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-session sliding-window rate limit settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests admitted within one window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window_secs: 60,
        }
    }
}

/// Top-level broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Maximum number of sessions in `Active` status at once.
    pub max_active_sessions: usize,
    /// Session TTL applied when approval does not specify one, in seconds.
    pub default_ttl_secs: u64,
    /// Upper bound on any requested session TTL, in seconds.
    pub max_ttl_secs: u64,
    /// How long an unresolved access request stays `Pending` before the
    /// sweep treats it as expired, in seconds.
    pub request_ttl_secs: u64,
    /// Interval between background sweep ticks, in seconds.
    pub sweep_interval_secs: u64,
    /// How long a forwarded command may wait for a result before the
    /// broker synthesizes a timeout, in seconds.
    pub command_timeout_secs: u64,
    /// Largest serialized argument bag accepted on a command, in bytes.
    pub max_payload_bytes: usize,
    /// Per-session request rate limit.
    pub rate_limit: RateLimitConfig,
    /// Capacity of the notification event channel.
    pub event_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_active_sessions: 16,
            default_ttl_secs: 3600,
            max_ttl_secs: 86_400,
            request_ttl_secs: 900,
            sweep_interval_secs: 5,
            command_timeout_secs: 30,
            max_payload_bytes: 1024 * 1024,
            rate_limit: RateLimitConfig::default(),
            event_capacity: 1024,
        }
    }
}

impl BrokerConfig {
    /// Parse a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or the
    /// same errors as [`BrokerConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check that all values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_active_sessions must be at least 1".to_string(),
            ));
        }
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "default_ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.max_ttl_secs < self.default_ttl_secs {
            return Err(ConfigError::Invalid(
                "max_ttl_secs must be >= default_ttl_secs".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be at least 1".to_string(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_payload_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
