//! Seed files
//!
//! TOML listing the agent roster and the leads to load into the ledger.
//! Dates are quoted ISO strings (`event_date = "2026-11-21"`).

use std::path::Path;

use anyhow::{Context, Result};
use lead_routing::{Lead, RosterAgent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub agents: Vec<RosterAgent>,
    #[serde(default)]
    pub leads: Vec<Lead>,
}

impl SeedFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse seed TOML")
    }
}
