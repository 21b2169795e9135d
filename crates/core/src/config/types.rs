//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ticket::{LeaseConfig, TimeoutAction, DEFAULT_TTL_SECONDS, MAX_TTL_SECONDS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration. Every section has defaults, so an empty file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub lease: LeaseDefaults,
}

impl Config {
    /// Lease policy applied to tickets whose creator did not specify one.
    pub fn default_lease(&self) -> LeaseConfig {
        LeaseConfig::new(self.lease.ttl_seconds, self.lease.on_timeout)
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file holding tickets and events.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hap.db"),
        }
    }
}

/// Default lease policy for newly created tickets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseDefaults {
    /// Seconds the human has to respond.
    pub ttl_seconds: u32,
    /// Action taken on expiry.
    pub on_timeout: TimeoutAction,
}

impl Default for LeaseDefaults {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            on_timeout: TimeoutAction::AutoReject,
        }
    }
}

/// Validate a loaded configuration.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.lease.ttl_seconds == 0 || config.lease.ttl_seconds > MAX_TTL_SECONDS {
        return Err(ConfigError::Invalid(format!(
            "lease.ttl_seconds must be in 1..={MAX_TTL_SECONDS}, got {}",
            config.lease.ttl_seconds
        )));
    }
    if config.database.path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(
            "database.path must not be empty".to_string(),
        ));
    }
    Ok(())
}
