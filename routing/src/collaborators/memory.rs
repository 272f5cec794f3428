//! In-memory collaborator implementations
//!
//! - [`InMemoryLockManager`]: time-bound holds, one holder per (agent, date)
//! - [`StaticRoster`]: eligibility from a fixed roster, in score order
//! - [`TracingNotifier`]: logs deliveries through `tracing`

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AvailabilityLocks, EligibilityFilter, NotificationDispatcher};
use crate::clock::{SharedClock, SystemClock};
use crate::error::CollaboratorError;
use crate::types::{AgentId, Candidate, EligibilityFilters, LeadId, NotificationMethod};

/// A calendar hold granted to an agent for a lead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub agent_id: AgentId,
    pub date: NaiveDate,
    pub lead_id: LeadId,
    pub expires_at: DateTime<Utc>,
}

/// Availability lock manager keeping holds in process memory
///
/// A hold blocks other leads until it is released or expires. Re-locking for
/// the same lead refreshes the hold.
pub struct InMemoryLockManager {
    holds: Mutex<HashMap<(AgentId, NaiveDate), Hold>>,
    clock: SharedClock,
}

impl InMemoryLockManager {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            holds: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Restore previously persisted holds
    pub fn from_holds(clock: SharedClock, holds: impl IntoIterator<Item = Hold>) -> Self {
        let map = holds
            .into_iter()
            .map(|h| ((h.agent_id.clone(), h.date), h))
            .collect();
        Self {
            holds: Mutex::new(map),
            clock,
        }
    }

    /// The unexpired hold on a slot, if any
    pub fn holder(&self, agent_id: &str, date: NaiveDate) -> Option<Hold> {
        let now = self.clock.now();
        let holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        holds
            .get(&(agent_id.to_string(), date))
            .filter(|h| h.expires_at > now)
            .cloned()
    }

    /// All unexpired holds, ordered by agent then date
    pub fn active_holds(&self) -> Vec<Hold> {
        let now = self.clock.now();
        let holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<Hold> = holds
            .values()
            .filter(|h| h.expires_at > now)
            .cloned()
            .collect();
        active.sort_by(|a, b| (&a.agent_id, a.date).cmp(&(&b.agent_id, b.date)));
        active
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(SystemClock))
    }
}

#[async_trait]
impl AvailabilityLocks for InMemoryLockManager {
    async fn lock(
        &self,
        agent_id: &str,
        date: NaiveDate,
        lead_id: &str,
        duration_minutes: u32,
    ) -> bool {
        let now = self.clock.now();
        let key = (agent_id.to_string(), date);
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = holds.get(&key) {
            if existing.expires_at > now && existing.lead_id != lead_id {
                debug!(
                    agent_id,
                    %date,
                    held_by = %existing.lead_id,
                    "Slot already held"
                );
                return false;
            }
        }

        holds.insert(
            key,
            Hold {
                agent_id: agent_id.to_string(),
                date,
                lead_id: lead_id.to_string(),
                expires_at: now + Duration::minutes(i64::from(duration_minutes)),
            },
        );
        true
    }

    async fn release(&self, agent_id: &str, date: NaiveDate) {
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        if holds.remove(&(agent_id.to_string(), date)).is_none() {
            debug!(agent_id, %date, "Release of absent hold ignored");
        }
    }
}

/// One agent in a static roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterAgent {
    pub agent_id: AgentId,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    /// Event types served; empty means any
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Smallest booking the agent takes
    #[serde(default)]
    pub min_budget: Option<u32>,
    /// Precomputed ranking score
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub blackout_dates: Vec<NaiveDate>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl RosterAgent {
    fn matches(&self, filters: &EligibilityFilters) -> bool {
        if !self.active || !self.city.eq_ignore_ascii_case(&filters.city) {
            return false;
        }
        if let (Some(mine), Some(theirs)) = (&self.state, &filters.state) {
            if !mine.eq_ignore_ascii_case(theirs) {
                return false;
            }
        }
        if !self.event_types.is_empty()
            && !self
                .event_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&filters.event_type))
        {
            return false;
        }
        if self.min_budget.unwrap_or(0) > filters.budget_max {
            return false;
        }
        !self.blackout_dates.contains(&filters.event_date)
    }
}

/// Eligibility filter over a fixed roster
///
/// Matching agents are returned by descending score; ties keep roster order.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    agents: Vec<RosterAgent>,
}

impl StaticRoster {
    pub fn new(agents: Vec<RosterAgent>) -> Self {
        Self { agents }
    }

    pub fn agents(&self) -> &[RosterAgent] {
        &self.agents
    }

    /// Synchronous form of the eligibility query
    pub fn rank(&self, filters: &EligibilityFilters) -> Vec<Candidate> {
        let mut matched: Vec<&RosterAgent> =
            self.agents.iter().filter(|a| a.matches(filters)).collect();
        matched.sort_by(|a, b| b.score.total_cmp(&a.score));
        matched
            .into_iter()
            .map(|a| Candidate::new(a.agent_id.clone(), a.score))
            .collect()
    }
}

#[async_trait]
impl EligibilityFilter for StaticRoster {
    async fn eligible_agents(
        &self,
        filters: &EligibilityFilters,
    ) -> Result<Vec<Candidate>, CollaboratorError> {
        Ok(self.rank(filters))
    }
}

/// Notification dispatcher that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn notify(
        &self,
        agent_id: &str,
        lead_id: &str,
        method: NotificationMethod,
    ) -> Result<(), CollaboratorError> {
        info!(agent_id, lead_id, method = %method, "Notifying agent of lead");
        Ok(())
    }
}
