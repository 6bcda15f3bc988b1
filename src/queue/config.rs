//! Queue Configuration Module
//!
//! Serializable queue settings. They can be built in code or read from a
//! TOML document, either at the top level or under a `[queue]` section.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::queue::error::{QueueError, QueueResult};

/// How often the unfinished-work reporter runs unless told otherwise
pub const DEFAULT_UNFINISHED_WORK_UPDATE_PERIOD: Duration = Duration::from_millis(500);

/// Main queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name the metric sinks are registered under; unnamed queues have no metrics
    pub name: Option<String>,

    /// Interval between unfinished-work reports, in milliseconds
    pub unfinished_work_update_period_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: None,
            unfinished_work_update_period_ms: DEFAULT_UNFINISHED_WORK_UPDATE_PERIOD.as_millis()
                as u64,
        }
    }
}

#[derive(Deserialize)]
struct QueueSection {
    queue: QueueConfig,
}

impl QueueConfig {
    /// Default configuration for a named queue
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Reporter interval as a `Duration`
    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.unfinished_work_update_period_ms)
    }

    /// Check the configuration for values the queue cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        if self.unfinished_work_update_period_ms == 0 {
            return Err(QueueError::invalid_config(
                "unfinished work update period must be greater than 0",
            ));
        }

        if let Some(name) = &self.name {
            if !name.is_empty() && name.trim().is_empty() {
                return Err(QueueError::invalid_config("queue name must not be blank"));
            }
        }

        Ok(())
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)
            .context("Failed to parse queue configuration as TOML")?;

        let config = if table.contains_key("queue") {
            let section: QueueSection = toml::Value::Table(table)
                .try_into()
                .context("Invalid [queue] configuration section")?;
            section.queue
        } else {
            toml::Value::Table(table)
                .try_into()
                .context("Invalid queue configuration")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading queue configuration from file: {}", path.display());

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read queue config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load queue config file: {}", path.display()))
    }

    /// Render the configuration as TOML that [`QueueConfig::from_toml_str`] accepts
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize queue configuration")
    }
}
