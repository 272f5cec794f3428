//! Worker configuration
//!
//! A TOML file with optional `[routing]` and `[scheduler]` tables. Without a
//! file the `ROUTING_*` environment overrides are applied to the defaults.

use std::path::Path;

use anyhow::{Context, Result};
use lead_routing::{RoutingConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub routing: RoutingConfig,
    pub scheduler: SchedulerConfig,
}

impl WorkerConfig {
    /// Read `path` if given, otherwise build from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        Self {
            routing: RoutingConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let config: WorkerConfig =
            toml::from_str(&content).context("Failed to parse worker config TOML")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.routing.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}
