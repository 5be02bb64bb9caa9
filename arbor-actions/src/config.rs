//! Dispatcher configuration parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Dispatcher settings, typically loaded from `arbor.yml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Reject model writes made outside an action or `run_unprotected`
    #[serde(default = "default_true")]
    pub enforce_protection: bool,

    /// Maximum number of nested action contexts
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Register a `LoggingMiddleware` on construction
    #[serde(default)]
    pub log_actions: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    512
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enforce_protection: true,
            max_depth: default_max_depth(),
            log_actions: false,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DispatcherConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
