//! External collaborators consumed by the orchestrator
//!
//! The orchestrator only depends on these traits. In-memory reference
//! implementations live in [`memory`] and back the worker binary and tests.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::CollaboratorError;
use crate::types::{Candidate, EligibilityFilters, NotificationMethod};

pub use memory::{Hold, InMemoryLockManager, RosterAgent, StaticRoster, TracingNotifier};

/// Ranks candidate agents for a lead
///
/// Index 0 of the returned list is treated as the best candidate.
#[async_trait]
pub trait EligibilityFilter: Send + Sync {
    async fn eligible_agents(
        &self,
        filters: &EligibilityFilters,
    ) -> Result<Vec<Candidate>, CollaboratorError>;
}

/// Grants and revokes calendar holds for an agent on a date
#[async_trait]
pub trait AvailabilityLocks: Send + Sync {
    /// Request a hold; `false` means the slot could not be reserved
    async fn lock(
        &self,
        agent_id: &str,
        date: NaiveDate,
        lead_id: &str,
        duration_minutes: u32,
    ) -> bool;

    /// Drop a hold. Releasing an absent or expired hold is a no-op.
    async fn release(&self, agent_id: &str, date: NaiveDate);
}

/// Best-effort delivery of "you have a lead" messages
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        agent_id: &str,
        lead_id: &str,
        method: NotificationMethod,
    ) -> Result<(), CollaboratorError>;
}

/// The three collaborators the orchestrator needs
#[derive(Clone)]
pub struct Collaborators {
    pub eligibility: Arc<dyn EligibilityFilter>,
    pub locks: Arc<dyn AvailabilityLocks>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

impl Collaborators {
    pub fn new(
        eligibility: Arc<dyn EligibilityFilter>,
        locks: Arc<dyn AvailabilityLocks>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            eligibility,
            locks,
            notifier,
        }
    }
}
