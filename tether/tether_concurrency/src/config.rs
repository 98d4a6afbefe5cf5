//! Toolkit configuration.
//!
//! Every component carries its own config struct with a `Default` impl next
//! to the code it configures. [`ToolkitConfig`] gathers them into one TOML
//! document; any section or field left out keeps its default.
//!
//! ```toml
//! [workload]
//! discipline = "exclusive"
//! hold_time_us = 50
//!
//! [runner]
//! deadline_ms = 250
//! completion = "rendezvous"
//!
//! [workers]
//! threads = 4
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::dispatch::WorkerPoolConfig;
use crate::pool::PoolConfig;
use crate::runner::RunnerConfig;
use crate::sync::WorkloadConfig;

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A string-keyed store of settings. Absent keys are valid.
pub trait ConfigSource: Send + Sync {
    /// Look up `key`
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads settings from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory settings, mostly for tests
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for MapSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Configuration for every toolkit component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Contention workload and lock discipline
    pub workload: WorkloadConfig,

    /// Bounded task runner
    pub runner: RunnerConfig,

    /// Resource pool
    pub pool: PoolConfig,

    /// Worker pool
    pub workers: WorkerPoolConfig,
}

impl ToolkitConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "runner.deadline_ms must be positive".to_string(),
            ));
        }
        if self.workers.threads == 0 {
            return Err(ConfigError::Invalid(
                "workers.threads must be positive".to_string(),
            ));
        }
        if self.workers.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "workers.queue_size must be positive".to_string(),
            ));
        }
        if self.workload.readers + self.workload.writers == 0 {
            return Err(ConfigError::Invalid(
                "workload needs at least one reader or writer".to_string(),
            ));
        }
        Ok(())
    }
}
