//! In-memory ledger with JSON snapshot persistence
//!
//! All mutations run under a single write lock, which makes
//! `commit_phase` atomic. Snapshots let a restarted worker recover cascade
//! decisions from ledger state alone.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{PhaseCommit, RoutingLedger, SealPolicy};
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::types::{
    Assignment, Lead, LeadId, NotificationMethod, Phase, ResponseStatus, RoutingState,
};

/// Serializable contents of a [`MemoryLedger`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub leads: BTreeMap<LeadId, Lead>,
    pub assignments: Vec<Assignment>,
}

impl LedgerSnapshot {
    fn lead(&self, lead_id: &str) -> LedgerResult<&Lead> {
        self.leads
            .get(lead_id)
            .ok_or_else(|| LedgerError::LeadNotFound(lead_id.to_string()))
    }

    fn lead_mut(&mut self, lead_id: &str) -> LedgerResult<&mut Lead> {
        self.leads
            .get_mut(lead_id)
            .ok_or_else(|| LedgerError::LeadNotFound(lead_id.to_string()))
    }

    fn for_lead<'a>(&'a self, lead_id: &'a str) -> impl Iterator<Item = &'a Assignment> + 'a {
        self.assignments.iter().filter(move |a| a.lead_id == lead_id)
    }

    fn has_accepted(&self, lead_id: &str) -> bool {
        self.for_lead(lead_id)
            .any(|a| a.response_status == ResponseStatus::Accepted)
    }

    /// Check an assignment against stored records and earlier batch members
    fn check_insert(&self, new: &Assignment, batch: &[Assignment]) -> LedgerResult<()> {
        new.validate()?;
        self.lead(&new.lead_id)?;

        let existing: Vec<&Assignment> = self.for_lead(&new.lead_id).chain(batch).collect();

        if existing
            .iter()
            .any(|a| a.agent_id == new.agent_id && a.phase == new.phase)
        {
            return Err(LedgerError::DuplicateAssignment {
                lead_id: new.lead_id.clone(),
                agent_id: new.agent_id.clone(),
                phase: new.phase,
            });
        }

        if new.is_pending_exclusive() && existing.iter().any(|a| a.is_pending_exclusive()) {
            return Err(LedgerError::ExclusiveHeld {
                lead_id: new.lead_id.clone(),
            });
        }

        if let Some(expires) = new.phase_expires_at {
            let latest = existing.iter().filter_map(|a| a.phase_expires_at).max();
            if latest.is_some_and(|latest| expires < latest) {
                return Err(ValidationError::ExpiryRegression {
                    lead_id: new.lead_id.clone(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Ledger kept in process memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerSnapshot>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from a snapshot
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        let state = self.state.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state.clone())
    }

    /// Write the current contents as pretty JSON
    pub fn save_to(&self, path: &Path) -> LedgerResult<()> {
        let snapshot = self.snapshot()?;
        save_snapshot(&snapshot, path)
    }

    /// Load a ledger from a JSON file, `None` if the file does not exist
    pub fn load_from(path: &Path) -> LedgerResult<Option<Self>> {
        Ok(load_snapshot(path)?.map(Self::from_snapshot))
    }
}

/// Persist a snapshot as JSON, creating parent directories
pub fn save_snapshot(snapshot: &LedgerSnapshot, path: &Path) -> LedgerResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read a snapshot written by [`save_snapshot`]
pub fn load_snapshot(path: &Path) -> LedgerResult<Option<LedgerSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)?;
    let snapshot =
        serde_json::from_str(&json).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    Ok(Some(snapshot))
}

impl RoutingLedger for MemoryLedger {
    fn insert_lead(&self, lead: Lead) -> LedgerResult<()> {
        lead.validate()?;
        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;
        if state.leads.contains_key(&lead.id) {
            return Err(LedgerError::DuplicateLead(lead.id));
        }
        state.leads.insert(lead.id.clone(), lead);
        Ok(())
    }

    fn get_lead(&self, lead_id: &str) -> LedgerResult<Lead> {
        let state = self.state.read().map_err(|_| LedgerError::LockPoisoned)?;
        state.lead(lead_id).cloned()
    }

    fn list_leads_in_state(&self, routing_state: RoutingState) -> LedgerResult<Vec<Lead>> {
        let state = self.state.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state
            .leads
            .values()
            .filter(|l| l.routing_state == routing_state)
            .cloned()
            .collect())
    }

    fn set_routing_state(
        &self,
        lead_id: &str,
        expected: RoutingState,
        next: RoutingState,
        routed_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Lead> {
        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;
        let accepted = state.has_accepted(lead_id);
        let lead = state.lead_mut(lead_id)?;

        if lead.routing_state != expected {
            return Err(LedgerError::StaleState {
                lead_id: lead_id.to_string(),
                expected,
                actual: lead.routing_state,
            });
        }
        if !expected.can_advance_to(next) {
            return Err(LedgerError::InvalidTransition {
                lead_id: lead_id.to_string(),
                from: expected,
                to: next,
            });
        }
        if accepted && next.phase().is_some() {
            return Err(LedgerError::AlreadyAccepted(lead_id.to_string()));
        }

        lead.routing_state = next;
        if routed_at.is_some() {
            lead.routed_at = routed_at;
        }
        debug!(lead_id, from = %expected, to = %next, "Routing state updated");
        Ok(lead.clone())
    }

    fn create_assignment(&self, assignment: Assignment) -> LedgerResult<()> {
        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;
        state.check_insert(&assignment, &[])?;
        state.assignments.push(assignment);
        Ok(())
    }

    fn assignments_for_lead(&self, lead_id: &str) -> LedgerResult<Vec<Assignment>> {
        let state = self.state.read().map_err(|_| LedgerError::LockPoisoned)?;
        state.lead(lead_id)?;
        Ok(state.for_lead(lead_id).cloned().collect())
    }

    fn assignments_for_agent(&self, agent_id: &str) -> LedgerResult<Vec<Assignment>> {
        let state = self.state.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.agent_id == agent_id)
            .cloned()
            .collect())
    }

    fn update_response_status(
        &self,
        lead_id: &str,
        agent_id: &str,
        status: ResponseStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<Assignment> {
        if status == ResponseStatus::Pending {
            return Err(ValidationError::PendingResponse.into());
        }

        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;
        let current = state.lead(lead_id)?.routing_state;
        let accepted = state.has_accepted(lead_id);

        let position = state.assignments.iter().position(|a| {
            a.lead_id == lead_id && a.agent_id == agent_id && Some(a.phase) == current.phase()
        });

        let Some(idx) = position else {
            // The agent may still hold an assignment from an earlier phase
            let superseded = state
                .for_lead(lead_id)
                .filter(|a| a.agent_id == agent_id)
                .map(|a| a.phase)
                .last();
            return Err(match superseded {
                Some(phase) => LedgerError::PhaseSuperseded {
                    lead_id: lead_id.to_string(),
                    phase,
                    current,
                },
                None => LedgerError::AssignmentNotFound {
                    lead_id: lead_id.to_string(),
                    agent_id: agent_id.to_string(),
                },
            });
        };

        if status == ResponseStatus::Accepted && accepted {
            return Err(LedgerError::AlreadyAccepted(lead_id.to_string()));
        }

        let assignment = &mut state.assignments[idx];
        if assignment.response_status != ResponseStatus::Pending {
            return Err(LedgerError::ResponseAlreadyRecorded {
                lead_id: lead_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        assignment.response_status = status;
        assignment.responded_at = Some(at);
        Ok(assignment.clone())
    }

    fn mark_notified(
        &self,
        assignment_id: Uuid,
        method: NotificationMethod,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;
        let assignment = state
            .assignments
            .iter_mut()
            .find(|a| a.id == assignment_id)
            .ok_or(LedgerError::UnknownAssignment { assignment_id })?;
        assignment.notified_at = Some(at);
        assignment.notification_method = Some(method);
        Ok(())
    }

    fn expire_pending(
        &self,
        lead_id: &str,
        phase: Phase,
        policy: SealPolicy,
    ) -> LedgerResult<Vec<Assignment>> {
        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;
        state.lead(lead_id)?;

        if state.has_accepted(lead_id) {
            return Err(LedgerError::AlreadyAccepted(lead_id.to_string()));
        }
        if policy == SealPolicy::RequireQuiet
            && state
                .for_lead(lead_id)
                .any(|a| a.phase == phase && a.response_status.is_engaged())
        {
            return Err(LedgerError::PhaseEngaged {
                lead_id: lead_id.to_string(),
                phase,
            });
        }

        let mut sealed = Vec::new();
        for a in state
            .assignments
            .iter_mut()
            .filter(|a| a.lead_id == lead_id && a.phase == phase)
        {
            if a.response_status == ResponseStatus::Pending {
                a.response_status = ResponseStatus::Ignored;
            }
            sealed.push(a.clone());
        }
        Ok(sealed)
    }

    fn commit_phase(&self, commit: PhaseCommit) -> LedgerResult<Lead> {
        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;
        let actual = state.lead(&commit.lead_id)?.routing_state;

        if actual != commit.expected_state {
            return Err(LedgerError::StaleState {
                lead_id: commit.lead_id,
                expected: commit.expected_state,
                actual,
            });
        }
        if !actual.can_advance_to(commit.next_state) {
            return Err(LedgerError::InvalidTransition {
                lead_id: commit.lead_id,
                from: actual,
                to: commit.next_state,
            });
        }
        if state.has_accepted(&commit.lead_id) {
            return Err(LedgerError::AlreadyAccepted(commit.lead_id));
        }

        for (i, assignment) in commit.assignments.iter().enumerate() {
            if assignment.lead_id != commit.lead_id {
                return Err(ValidationError::LeadMismatch {
                    expected: commit.lead_id.clone(),
                    found: assignment.lead_id.clone(),
                }
                .into());
            }
            state.check_insert(assignment, &commit.assignments[..i])?;
        }

        let count = commit.assignments.len();
        state.assignments.extend(commit.assignments);
        let lead = state.lead_mut(&commit.lead_id)?;
        lead.routing_state = commit.next_state;
        lead.routed_at = Some(commit.routed_at);
        debug!(
            lead_id = %lead.id,
            state = %lead.routing_state,
            assignments = count,
            "Phase committed"
        );
        Ok(lead.clone())
    }
}
