//! Routing event bus
//!
//! Tokio broadcast pub/sub for routing activity. Publishing never fails:
//! events sent while nobody is subscribed are dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{AgentId, LeadId, Phase, ResponseStatus, RoutingState};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Something that happened to a lead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingEvent {
    PhaseEntered {
        lead_id: LeadId,
        phase: Phase,
        agents: Vec<AgentId>,
        expires_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    ConciergeEscalation {
        lead_id: LeadId,
        from: RoutingState,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CascadeAborted {
        lead_id: LeadId,
        phase: Phase,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ResponseRecorded {
        lead_id: LeadId,
        agent_id: AgentId,
        phase: Phase,
        status: ResponseStatus,
        timestamp: DateTime<Utc>,
    },
    NotificationFailed {
        lead_id: LeadId,
        agent_id: AgentId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    LocksReleased {
        lead_id: LeadId,
        phase: Phase,
        agents: Vec<AgentId>,
        timestamp: DateTime<Utc>,
    },
}

impl RoutingEvent {
    /// Short machine-readable name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseEntered { .. } => "phase_entered",
            Self::ConciergeEscalation { .. } => "concierge_escalation",
            Self::CascadeAborted { .. } => "cascade_aborted",
            Self::ResponseRecorded { .. } => "response_recorded",
            Self::NotificationFailed { .. } => "notification_failed",
            Self::LocksReleased { .. } => "locks_released",
        }
    }

    pub fn lead_id(&self) -> &str {
        match self {
            Self::PhaseEntered { lead_id, .. }
            | Self::ConciergeEscalation { lead_id, .. }
            | Self::CascadeAborted { lead_id, .. }
            | Self::ResponseRecorded { lead_id, .. }
            | Self::NotificationFailed { lead_id, .. }
            | Self::LocksReleased { lead_id, .. } => lead_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PhaseEntered { timestamp, .. }
            | Self::ConciergeEscalation { timestamp, .. }
            | Self::CascadeAborted { timestamp, .. }
            | Self::ResponseRecorded { timestamp, .. }
            | Self::NotificationFailed { timestamp, .. }
            | Self::LocksReleased { timestamp, .. } => *timestamp,
        }
    }
}

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for routing events
pub struct EventBus {
    sender: broadcast::Sender<RoutingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event; returns the number of receivers that got it
    pub fn publish(&self, event: RoutingEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                count
            }
            Err(_) => {
                debug!(event_type, "Event published (no receivers)");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective consumption
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub lead_id: Option<LeadId>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Matches all events
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lead(mut self, lead_id: &str) -> Self {
        self.lead_id = Some(lead_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &RoutingEvent) -> bool {
        if let Some(ref lid) = self.lead_id {
            if event.lead_id() != lid {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }
        true
    }
}
