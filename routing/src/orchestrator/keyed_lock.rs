//! Per-lead async mutual exclusion
//!
//! Operations on the same lead queue behind one `tokio::sync::Mutex`;
//! different leads never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::LeadId;

/// Entries are pruned once the map grows past this size
const PRUNE_THRESHOLD: usize = 1024;

/// Guard held for the duration of a per-lead operation
pub type LeadGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct LeadLocks {
    locks: Mutex<HashMap<LeadId, Arc<AsyncMutex<()>>>>,
}

impl LeadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a lead
    pub async fn acquire(&self, lead_id: &str) -> LeadGuard {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the map holds an idle entry
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            locks
                .entry(lead_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Number of tracked leads
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
