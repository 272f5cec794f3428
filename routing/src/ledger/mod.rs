//! Assignment ledger: validated storage for leads and assignments
//!
//! The ledger owns no timers and makes no routing decisions. It enforces
//! record-level invariants so the orchestrator stays free of storage code:
//!
//! - one assignment per (lead, agent, phase)
//! - at most one pending exclusive assignment per lead
//! - phase expiries never move backwards for a lead
//! - lead states only move forward (concierge is terminal)
//! - responses are only accepted on the lead's current phase
//!
//! [`RoutingLedger::commit_phase`] is the compare-and-commit used by the
//! orchestrator to abort operations that went stale while in flight.

pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::types::{
    Assignment, Lead, NotificationMethod, Phase, ResponseStatus, RoutingState,
};

pub use memory::{load_snapshot, save_snapshot, LedgerSnapshot, MemoryLedger};

/// Shared reference to a ledger
pub type SharedLedger = Arc<dyn RoutingLedger>;

/// Everything written when a lead enters a phase
#[derive(Debug, Clone)]
pub struct PhaseCommit {
    pub lead_id: String,
    /// State the lead must still be in for the commit to apply
    pub expected_state: RoutingState,
    pub next_state: RoutingState,
    pub routed_at: DateTime<Utc>,
    /// Assignments of the phase; inserted all-or-nothing
    pub assignments: Vec<Assignment>,
}

/// How [`RoutingLedger::expire_pending`] treats engaged responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealPolicy {
    /// Refuse to seal a phase in which an agent accepted or declined
    RequireQuiet,
    /// Seal regardless of declines (manual escalation)
    Force,
}

/// Storage operations used by the orchestrator and scheduler
pub trait RoutingLedger: Send + Sync {
    /// Store a new lead after validating it
    fn insert_lead(&self, lead: Lead) -> LedgerResult<()>;

    fn get_lead(&self, lead_id: &str) -> LedgerResult<Lead>;

    fn list_leads_in_state(&self, state: RoutingState) -> LedgerResult<Vec<Lead>>;

    /// Move a lead from `expected` to `next`, optionally stamping `routed_at`
    fn set_routing_state(
        &self,
        lead_id: &str,
        expected: RoutingState,
        next: RoutingState,
        routed_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Lead>;

    /// Insert a single assignment (duplicates rejected)
    fn create_assignment(&self, assignment: Assignment) -> LedgerResult<()>;

    fn assignments_for_lead(&self, lead_id: &str) -> LedgerResult<Vec<Assignment>>;

    fn assignments_for_agent(&self, agent_id: &str) -> LedgerResult<Vec<Assignment>>;

    /// Record an agent response on the lead's current phase
    fn update_response_status(
        &self,
        lead_id: &str,
        agent_id: &str,
        status: ResponseStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<Assignment>;

    fn mark_notified(
        &self,
        assignment_id: Uuid,
        method: NotificationMethod,
        at: DateTime<Utc>,
    ) -> LedgerResult<()>;

    /// Mark the still-pending assignments of an exited phase as ignored
    ///
    /// Returns every assignment of that phase after the update. Fails with
    /// `AlreadyAccepted` if the lead has an accepted assignment, and under
    /// [`SealPolicy::RequireQuiet`] with `PhaseEngaged` if an agent declined.
    fn expire_pending(
        &self,
        lead_id: &str,
        phase: Phase,
        policy: SealPolicy,
    ) -> LedgerResult<Vec<Assignment>>;

    /// Atomically verify the lead's state and write a phase's assignments
    fn commit_phase(&self, commit: PhaseCommit) -> LedgerResult<Lead>;
}
