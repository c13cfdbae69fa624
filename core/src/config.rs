//! Configuration for the bootstrap subsystem and the replication pipeline.
//!
//! Values come from environment variables with sensible defaults, and every
//! config is validated before use.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `BOOTSTRAP_CONTROL_DATABASE` | `maxwell` | database holding the `bootstrap` control table |
//! | `BOOTSTRAPPER` | `async` | strategy: `none`, `sync` or `async` |
//! | `BOOTSTRAP_PROGRESS_INTERVAL` | `10000` | log progress every N emitted rows |
//! | `REPLICATION_CLIENT_ID` | `maxwell` | key of the committed position |
//! | `REPLICATION_CHECKPOINT_INTERVAL` | `1000` | commit the position every N rows |
//!
//! # Example
//!
//! ```
//! use cdc_bootstrap_core::config::{BootstrapConfig, BootstrapStrategy};
//!
//! let config = BootstrapConfig::from_lookup(|key| match key {
//!     "BOOTSTRAPPER" => Some("sync".to_string()),
//!     _ => None,
//! })?;
//!
//! assert_eq!(config.strategy, BootstrapStrategy::Synchronous);
//! assert_eq!(config.control_database, "maxwell");
//! # Ok::<(), cdc_bootstrap_core::config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable holds a value that cannot be parsed.
    #[error("Invalid value for {var}: {value}")]
    InvalidValue {
        /// The variable.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Which bootstrapper variant runs in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapStrategy {
    /// Control rows are recognised but never acted on.
    Disabled,
    /// Historical rows are emitted inline, blocking the row stream.
    Synchronous,
    /// Historical rows are emitted by a worker task.
    Asynchronous,
}

impl FromStr for BootstrapStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "disabled" | "off" => Ok(Self::Disabled),
            "sync" | "synchronous" => Ok(Self::Synchronous),
            "async" | "asynchronous" => Ok(Self::Asynchronous),
            _ => Err(ConfigError::InvalidValue {
                var: "BOOTSTRAPPER",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for BootstrapStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "none"),
            Self::Synchronous => write!(f, "sync"),
            Self::Asynchronous => write!(f, "async"),
        }
    }
}

/// Bootstrap subsystem configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Database holding the reserved `bootstrap` control table.
    pub control_database: String,
    /// Active strategy.
    pub strategy: BootstrapStrategy,
    /// Log progress every N emitted rows.
    pub progress_interval: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            control_database: "maxwell".to_string(),
            strategy: BootstrapStrategy::Asynchronous,
            progress_interval: 10_000,
        }
    }
}

impl BootstrapConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or validation fails.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            control_database: lookup("BOOTSTRAP_CONTROL_DATABASE")
                .unwrap_or(defaults.control_database),
            strategy: lookup("BOOTSTRAPPER")
                .map(|s| s.parse::<BootstrapStrategy>())
                .transpose()?
                .unwrap_or(defaults.strategy),
            progress_interval: parse_u64(&lookup, "BOOTSTRAP_PROGRESS_INTERVAL")?
                .unwrap_or(defaults.progress_interval),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty control database or
    /// a zero progress interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_database.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "control_database cannot be empty".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::ValidationError(
                "progress_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Replication pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Key under which the committed position is stored.
    pub client_id: String,
    /// Commit the position every N processed rows.
    pub checkpoint_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            client_id: "maxwell".to_string(),
            checkpoint_interval: 1_000,
        }
    }
}

impl PipelineConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or validation fails.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            client_id: lookup("REPLICATION_CLIENT_ID").unwrap_or(defaults.client_id),
            checkpoint_interval: parse_u64(&lookup, "REPLICATION_CHECKPOINT_INTERVAL")?
                .unwrap_or(defaults.checkpoint_interval),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty client id or a zero
    /// checkpoint interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::ValidationError("client_id cannot be empty".to_string()));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::ValidationError(
                "checkpoint_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var, value })
        })
        .transpose()
}
