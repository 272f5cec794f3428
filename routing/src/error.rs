//! Error types for lead routing
//!
//! Only `LeadNotFound` and exhausted phase lists are meant to reach callers of
//! `route_lead` as hard failures. Phase attempt errors are absorbed by the
//! fallthrough loop, and lock refusals are per-candidate soft failures.

use thiserror::Error;

use crate::types::{AgentId, LeadId, Phase, RoutingState};

/// Record-level validation failures raised by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Budget minimum {min} exceeds maximum {max}")]
    BudgetInverted { min: u32, max: u32 },

    #[error("Budget midpoint {midpoint} outside [{min}, {max}]")]
    MidpointOutOfRange { midpoint: u32, min: u32, max: u32 },

    #[error("Assignment fields do not match the {phase} phase")]
    AssignmentShape { phase: Phase },

    #[error("Phase expiry precedes phase start")]
    ExpiryBeforeStart,

    #[error("Phase expiry would move backwards for lead {lead_id}")]
    ExpiryRegression { lead_id: LeadId },

    #[error("Unknown {field}: {value}")]
    UnknownValue { field: &'static str, value: String },

    #[error("Assignment for lead {found} submitted under lead {expected}")]
    LeadMismatch { expected: LeadId, found: LeadId },

    #[error("A response cannot be reset to pending")]
    PendingResponse,
}

/// Errors from the assignment ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Lead not found: {0}")]
    LeadNotFound(LeadId),

    #[error("Lead already exists: {0}")]
    DuplicateLead(LeadId),

    #[error("Assignment already exists for lead {lead_id}, agent {agent_id}, phase {phase}")]
    DuplicateAssignment {
        lead_id: LeadId,
        agent_id: AgentId,
        phase: Phase,
    },

    #[error("No assignment for lead {lead_id} and agent {agent_id}")]
    AssignmentNotFound { lead_id: LeadId, agent_id: AgentId },

    #[error("Assignment {assignment_id} not found")]
    UnknownAssignment { assignment_id: uuid::Uuid },

    #[error("Phase {phase} of lead {lead_id} was superseded (lead is {current})")]
    PhaseSuperseded {
        lead_id: LeadId,
        phase: Phase,
        current: RoutingState,
    },

    #[error("Response already recorded for lead {lead_id}, agent {agent_id}")]
    ResponseAlreadyRecorded { lead_id: LeadId, agent_id: AgentId },

    #[error("Lead {lead_id} expected in {expected}, found {actual}")]
    StaleState {
        lead_id: LeadId,
        expected: RoutingState,
        actual: RoutingState,
    },

    #[error("Lead {lead_id} cannot move from {from} to {to}")]
    InvalidTransition {
        lead_id: LeadId,
        from: RoutingState,
        to: RoutingState,
    },

    #[error("Lead {0} already has an accepted assignment")]
    AlreadyAccepted(LeadId),

    #[error("Lead {lead_id} already holds a pending exclusive assignment")]
    ExclusiveHeld { lead_id: LeadId },

    #[error("Phase {phase} of lead {lead_id} has an engaged response")]
    PhaseEngaged { lead_id: LeadId, phase: Phase },

    #[error("Invalid record: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors reported by external collaborators
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Why a single phase attempt did not produce assignments
///
/// Everything except `Aborted` lets the orchestrator fall through to the
/// next phase in the plan.
#[derive(Debug, Error)]
pub enum PhaseAttemptError {
    #[error("No eligible agents left for the {phase} phase")]
    NoCandidates { phase: Phase },

    #[error("Lock refused for agent {agent_id} in the {phase} phase")]
    LockAcquisitionFailed { phase: Phase, agent_id: AgentId },

    #[error("None of {attempted} lock requests succeeded in the {phase} phase")]
    NoLocksAcquired { phase: Phase, attempted: usize },

    #[error("Phase attempt aborted: {0}")]
    Aborted(RoutingError),
}

impl PhaseAttemptError {
    /// Whether the next phase in the plan should be tried
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Aborted(_))
    }
}

/// Errors surfaced by the phase orchestrator
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Lead not found: {0}")]
    LeadNotFound(LeadId),

    #[error("Lead {lead_id} already in state: {state}")]
    AlreadyRouted { lead_id: LeadId, state: RoutingState },

    #[error("All routing phases exhausted for lead {lead_id}: {}", .failures.join("; "))]
    AllPhasesExhausted {
        lead_id: LeadId,
        failures: Vec<String>,
    },

    #[error("Stale operation on lead {lead_id} aborted: {reason}")]
    StaleTransition { lead_id: LeadId, reason: String },

    #[error("Lead {0} already has an accepted assignment")]
    AlreadyAccepted(LeadId),

    #[error("Lead {0} is in concierge handling")]
    Terminal(LeadId),

    #[error("Phase {phase} of lead {lead_id} was superseded")]
    PhaseSuperseded { lead_id: LeadId, phase: Phase },

    #[error("Cannot record response status {0}")]
    InvalidResponse(crate::types::ResponseStatus),

    #[error("Eligibility filter failed: {0}")]
    Eligibility(#[source] CollaboratorError),

    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),
}

impl From<LedgerError> for RoutingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::LeadNotFound(id) => Self::LeadNotFound(id),
            LedgerError::AlreadyAccepted(id) => Self::AlreadyAccepted(id),
            LedgerError::PhaseSuperseded { lead_id, phase, .. } => {
                Self::PhaseSuperseded { lead_id, phase }
            }
            LedgerError::StaleState {
                lead_id,
                expected,
                actual,
            } => Self::StaleTransition {
                lead_id,
                reason: format!("expected {}, found {}", expected, actual),
            },
            other => Self::Ledger(other),
        }
    }
}

/// Result type for orchestrator operations
pub type RouteResult<T> = Result<T, RoutingError>;

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
