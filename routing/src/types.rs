//! Core routing types
//!
//! Leads, assignments and the enums that drive the phase state machine.
//! These are the records persisted by the ledger and surfaced to the rest
//! of the booking system.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifier of a lead (owned by the booking system)
pub type LeadId = String;

/// Identifier of an agent (service provider)
pub type AgentId = String;

/// Budget upper bound used when a lead does not state one
pub const DEFAULT_BUDGET_MAX: u32 = 999_999;

/// Routing state of a lead
///
/// Forward order is `pending → exclusive → tier_expansion → broadcast`.
/// `concierge` is terminal and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingState {
    /// Created, not yet routed
    #[default]
    Pending,
    /// Claimed for routing by an upstream process; routable like `pending`
    Routing,
    /// Offered to the top-ranked agent only
    Exclusive,
    /// Offered to the next few ranked agents
    TierExpansion,
    /// Offered to the wider market
    Broadcast,
    /// Manual handling required
    Concierge,
}

impl RoutingState {
    /// Whether `route_lead` accepts a lead in this state
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Pending | Self::Routing)
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Concierge)
    }

    /// The distribution phase this state corresponds to, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Exclusive => Some(Phase::Exclusive),
            Self::TierExpansion => Some(Phase::TierExpansion),
            Self::Broadcast => Some(Phase::Broadcast),
            Self::Pending | Self::Routing | Self::Concierge => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending | Self::Routing => 0,
            Self::Exclusive => 1,
            Self::TierExpansion => 2,
            Self::Broadcast => 3,
            Self::Concierge => 4,
        }
    }

    /// Whether moving from `self` to `next` respects forward-only ordering
    ///
    /// Concierge is reachable from anything except itself. Phases may be
    /// skipped (a failed exclusive attempt lands directly in tier expansion).
    pub fn can_advance_to(&self, next: RoutingState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Concierge {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for RoutingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Routing => write!(f, "routing"),
            Self::Exclusive => write!(f, "exclusive"),
            Self::TierExpansion => write!(f, "tier_expansion"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::Concierge => write!(f, "concierge"),
        }
    }
}

/// Distribution phase of an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Exclusive,
    TierExpansion,
    Broadcast,
}

impl Phase {
    /// Phase attempts made by `route_lead`, in order
    pub const ROUTING_ORDER: [Phase; 3] = [Phase::Exclusive, Phase::TierExpansion, Phase::Broadcast];

    /// The lead state entered when this phase commits
    pub fn routing_state(&self) -> RoutingState {
        match self {
            Self::Exclusive => RoutingState::Exclusive,
            Self::TierExpansion => RoutingState::TierExpansion,
            Self::Broadcast => RoutingState::Broadcast,
        }
    }

    /// Phase attempts made when cascading out of this phase
    pub fn cascade_plan(&self) -> &'static [Phase] {
        match self {
            Self::Exclusive => &Self::ROUTING_ORDER[1..],
            Self::TierExpansion => &Self::ROUTING_ORDER[2..],
            Self::Broadcast => &[],
        }
    }

    /// Whether agents in this phase hold an availability lock
    pub fn holds_locks(&self) -> bool {
        !matches!(self, Self::Broadcast)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.routing_state())
    }
}

/// Agent response recorded against an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
    Ignored,
}

impl ResponseStatus {
    /// An agent actively engaged with the lead (accepted or declined)
    pub fn is_engaged(&self) -> bool {
        matches!(self, Self::Accepted | Self::Declined)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Declined => write!(f, "declined"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}

impl std::str::FromStr for ResponseStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" | "accept" => Ok(Self::Accepted),
            "declined" | "decline" => Ok(Self::Declined),
            "ignored" | "ignore" => Ok(Self::Ignored),
            other => Err(ValidationError::UnknownValue {
                field: "response_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Channel used to tell an agent about a lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMethod {
    Email,
    Sms,
    Push,
    #[default]
    InApp,
}

impl std::fmt::Display for NotificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
            Self::Push => write!(f, "push"),
            Self::InApp => write!(f, "in_app"),
        }
    }
}

impl std::str::FromStr for NotificationMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "push" => Ok(Self::Push),
            "in_app" | "in-app" | "inapp" => Ok(Self::InApp),
            other => Err(ValidationError::UnknownValue {
                field: "notification_method",
                value: other.to_string(),
            }),
        }
    }
}

/// A request to book a service on a given date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Lead identifier
    pub id: LeadId,
    /// City the event takes place in
    pub city: String,
    /// State/region, when known
    #[serde(default)]
    pub state: Option<String>,
    /// Date of the event (the calendar slot being locked)
    pub event_date: NaiveDate,
    /// Event type, e.g. "wedding"
    pub event_type: String,
    #[serde(default)]
    pub budget_min: Option<u32>,
    #[serde(default)]
    pub budget_max: Option<u32>,
    #[serde(default)]
    pub budget_midpoint: Option<u32>,
    /// Current routing state, written only by the orchestrator
    #[serde(default)]
    pub routing_state: RoutingState,
    /// When the lead last entered a distribution phase
    #[serde(default)]
    pub routed_at: Option<DateTime<Utc>>,
}

impl Lead {
    /// Create a pending lead without budget information
    pub fn new(
        id: impl Into<LeadId>,
        city: impl Into<String>,
        event_date: NaiveDate,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            city: city.into(),
            state: None,
            event_date,
            event_type: event_type.into(),
            budget_min: None,
            budget_max: None,
            budget_midpoint: None,
            routing_state: RoutingState::Pending,
            routed_at: None,
        }
    }

    /// Set the state/region
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Set budget bounds; the midpoint is derived from them
    pub fn with_budget(mut self, min: u32, max: u32) -> Self {
        self.budget_min = Some(min);
        self.budget_max = Some(max);
        self.budget_midpoint = Some(min + (max.saturating_sub(min)) / 2);
        self
    }

    /// Check the lead is well-formed before it is stored
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "id" });
        }
        if self.city.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "city" });
        }
        let min = self.budget_min.unwrap_or(0);
        let max = self.budget_max.unwrap_or(DEFAULT_BUDGET_MAX);
        if min > max {
            return Err(ValidationError::BudgetInverted { min, max });
        }
        if let Some(mid) = self.budget_midpoint {
            if mid < min || mid > max {
                return Err(ValidationError::MidpointOutOfRange { midpoint: mid, min, max });
            }
        }
        Ok(())
    }
}

/// Query sent to the eligibility filter, derived from a lead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityFilters {
    pub city: String,
    pub state: Option<String>,
    pub event_date: NaiveDate,
    pub event_type: String,
    pub budget_min: u32,
    pub budget_max: u32,
    pub budget_midpoint: u32,
}

impl EligibilityFilters {
    /// Build filters from a lead, defaulting absent budget fields
    pub fn from_lead(lead: &Lead) -> Self {
        Self {
            city: lead.city.clone(),
            state: lead.state.clone(),
            event_date: lead.event_date,
            event_type: lead.event_type.clone(),
            budget_min: lead.budget_min.unwrap_or(0),
            budget_max: lead.budget_max.unwrap_or(DEFAULT_BUDGET_MAX),
            budget_midpoint: lead.budget_midpoint.unwrap_or(0),
        }
    }
}

/// One ranked result from the eligibility filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: AgentId,
    pub score: f64,
}

impl Candidate {
    pub fn new(agent_id: impl Into<AgentId>, score: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            score,
        }
    }
}

/// A directed edge from one lead to one agent for one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique assignment identifier
    pub id: Uuid,
    pub lead_id: LeadId,
    pub agent_id: AgentId,
    pub phase: Phase,
    /// True only for exclusive-phase assignments
    pub is_exclusive: bool,
    /// End of the exclusive window (exclusive phase only)
    pub exclusive_until: Option<DateTime<Utc>>,
    /// Deadline used for cascade decisions; absent for broadcast
    pub phase_expires_at: Option<DateTime<Utc>>,
    pub phase_started_at: DateTime<Utc>,
    pub response_status: ResponseStatus,
    /// Eligibility score captured when the assignment was made
    pub routing_score_at_assignment: f64,
    pub notified_at: Option<DateTime<Utc>>,
    pub notification_method: Option<NotificationMethod>,
    /// When the response status last changed away from pending
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Assignment {
    fn base(lead_id: &str, candidate: &Candidate, phase: Phase, started: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id: lead_id.to_string(),
            agent_id: candidate.agent_id.clone(),
            phase,
            is_exclusive: false,
            exclusive_until: None,
            phase_expires_at: None,
            phase_started_at: started,
            response_status: ResponseStatus::Pending,
            routing_score_at_assignment: candidate.score,
            notified_at: None,
            notification_method: None,
            responded_at: None,
        }
    }

    /// Exclusive-phase assignment; the window end doubles as the phase expiry
    pub fn exclusive(
        lead_id: &str,
        candidate: &Candidate,
        started: DateTime<Utc>,
        exclusive_until: DateTime<Utc>,
    ) -> Self {
        Self {
            is_exclusive: true,
            exclusive_until: Some(exclusive_until),
            phase_expires_at: Some(exclusive_until),
            ..Self::base(lead_id, candidate, Phase::Exclusive, started)
        }
    }

    /// Tier-expansion assignment sharing the phase expiry with its siblings
    pub fn tier_expansion(
        lead_id: &str,
        candidate: &Candidate,
        started: DateTime<Utc>,
        phase_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            phase_expires_at: Some(phase_expires_at),
            ..Self::base(lead_id, candidate, Phase::TierExpansion, started)
        }
    }

    /// Broadcast assignment (no lock, no expiry)
    pub fn broadcast(lead_id: &str, candidate: &Candidate, started: DateTime<Utc>) -> Self {
        Self::base(lead_id, candidate, Phase::Broadcast, started)
    }

    /// Holds the exclusive slot right now
    pub fn is_pending_exclusive(&self) -> bool {
        self.is_exclusive && self.response_status == ResponseStatus::Pending
    }

    /// Check the shape of the record matches its phase
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lead_id.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "lead_id" });
        }
        if self.agent_id.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "agent_id" });
        }
        let shape_ok = match self.phase {
            Phase::Exclusive => {
                self.is_exclusive
                    && self.exclusive_until.is_some()
                    && self.phase_expires_at.is_some()
            }
            Phase::TierExpansion => {
                !self.is_exclusive
                    && self.exclusive_until.is_none()
                    && self.phase_expires_at.is_some()
            }
            Phase::Broadcast => {
                !self.is_exclusive
                    && self.exclusive_until.is_none()
                    && self.phase_expires_at.is_none()
            }
        };
        if !shape_ok {
            return Err(ValidationError::AssignmentShape { phase: self.phase });
        }
        if let Some(expires) = self.phase_expires_at {
            if expires < self.phase_started_at {
                return Err(ValidationError::ExpiryBeforeStart);
            }
        }
        Ok(())
    }
}

/// Outcome of routing or cascading a lead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub lead_id: LeadId,
    /// The state the lead ended in (a phase, or concierge)
    pub phase: RoutingState,
    pub assigned_agents: Vec<AgentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_until: Option<DateTime<Utc>>,
    /// When the scheduler should next consider this lead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_phase_at: Option<DateTime<Utc>>,
}

impl RoutingResult {
    /// Result for a lead handed to manual handling
    pub fn concierge(lead_id: impl Into<LeadId>) -> Self {
        Self {
            lead_id: lead_id.into(),
            phase: RoutingState::Concierge,
            assigned_agents: Vec::new(),
            exclusive_until: None,
            next_phase_at: None,
        }
    }
}
