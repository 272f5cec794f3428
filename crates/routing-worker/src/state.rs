//! Persisted worker state
//!
//! One JSON file holding the roster, the ledger snapshot and the active
//! availability holds, so a restarted worker resumes cascades and keeps
//! calendars locked.

use std::path::Path;

use anyhow::{Context, Result};
use lead_routing::{Hold, LedgerSnapshot, RosterAgent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    #[serde(default)]
    pub agents: Vec<RosterAgent>,
    #[serde(default)]
    pub ledger: LedgerSnapshot,
    #[serde(default)]
    pub holds: Vec<Hold>,
}

impl WorkerState {
    /// Load state from disk, `None` if nothing was saved yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let json =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let state = serde_json::from_str(&json).context("Failed to parse worker state")?;
        Ok(Some(state))
    }

    /// Save state as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context(format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).context(format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
