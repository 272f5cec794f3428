//! Phase Orchestrator
//!
//! Drives a lead through `exclusive → tier_expansion → broadcast`, falling
//! back to concierge when nobody can take it. Phase attempts run as an
//! ordered list: a failed attempt falls through to the next one and only the
//! last failure is surfaced.
//!
//! Every per-lead operation runs under a per-lead async mutex. State written
//! by other processes is caught by the ledger's compare-and-commit, in which
//! case the in-flight operation releases its locks and aborts.

mod keyed_lock;
mod phases;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::collaborators::Collaborators;
use crate::config::RoutingConfig;
use crate::error::{ConfigError, LedgerError, PhaseAttemptError, RouteResult, RoutingError};
use crate::events::{EventBus, RoutingEvent, SharedEventBus};
use crate::ledger::{SealPolicy, SharedLedger};
use crate::types::{
    AgentId, Assignment, Candidate, EligibilityFilters, Lead, Phase, ResponseStatus,
    RoutingResult, RoutingState,
};

pub use keyed_lock::{LeadGuard, LeadLocks};

/// What `transition_to_next_phase` did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The lead entered a later phase
    Advanced(RoutingResult),
    /// An agent engaged with the current phase; nothing changed
    Aborted { reason: String },
    /// The lead is in broadcast; the scheduler takes no action
    NoFurtherPhase,
    /// The lead has not been routed yet
    NotRouted,
    /// The lead is already in concierge
    Terminal,
    /// No later phase could be entered; the lead went to concierge
    Escalated,
}

impl TransitionOutcome {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::Advanced(_))
    }
}

/// Orchestrates lead distribution across routing phases
pub struct PhaseOrchestrator {
    config: RoutingConfig,
    ledger: SharedLedger,
    collaborators: Collaborators,
    clock: SharedClock,
    events: SharedEventBus,
    lead_locks: LeadLocks,
}

impl PhaseOrchestrator {
    /// Build an orchestrator; fails if `config` does not validate
    pub fn new(
        config: RoutingConfig,
        ledger: SharedLedger,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            collaborators,
            clock: Arc::new(SystemClock),
            events: EventBus::new().shared(),
            lead_locks: LeadLocks::new(),
        })
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Publish routing events on an existing bus
    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Route a pending lead to its first phase
    ///
    /// With no eligible agents the lead goes straight to concierge. Otherwise
    /// exclusive, tier expansion and broadcast are tried in order; if all of
    /// them fail the lead is left untouched and `AllPhasesExhausted` is
    /// returned.
    pub async fn route_lead(&self, lead_id: &str) -> RouteResult<RoutingResult> {
        let _guard = self.lead_locks.acquire(lead_id).await;

        let lead = self.ledger.get_lead(lead_id)?;
        if !lead.routing_state.is_routable() {
            return Err(RoutingError::AlreadyRouted {
                lead_id: lead.id,
                state: lead.routing_state,
            });
        }

        let candidates = self.eligible_candidates(&lead).await?;
        if candidates.is_empty() {
            return self.enter_concierge(&lead, "no eligible agents");
        }

        self.run_phases(&lead, &candidates, &HashSet::new(), &Phase::ROUTING_ORDER)
            .await
    }

    /// Cascade a lead whose phase window has elapsed
    ///
    /// A no-op when any agent accepted or declined in the current phase.
    /// Otherwise the exited phase is sealed (pending assignments become
    /// ignored), its locks are released and the next phases are attempted
    /// with a fresh eligibility query. If none can be entered the lead is
    /// escalated to concierge.
    pub async fn transition_to_next_phase(&self, lead_id: &str) -> RouteResult<TransitionOutcome> {
        let _guard = self.lead_locks.acquire(lead_id).await;

        let lead = self.ledger.get_lead(lead_id)?;
        let phase = match lead.routing_state {
            RoutingState::Pending | RoutingState::Routing => return Ok(TransitionOutcome::NotRouted),
            RoutingState::Concierge => return Ok(TransitionOutcome::Terminal),
            RoutingState::Broadcast => return Ok(TransitionOutcome::NoFurtherPhase),
            RoutingState::Exclusive => Phase::Exclusive,
            RoutingState::TierExpansion => Phase::TierExpansion,
        };

        let assignments = self.ledger.assignments_for_lead(lead_id)?;
        if let Some(engaged) = assignments
            .iter()
            .find(|a| a.phase == phase && a.response_status.is_engaged())
        {
            let reason = format!("agent {} {} the offer", engaged.agent_id, engaged.response_status);
            return Ok(self.abort_cascade(&lead, phase, reason));
        }

        // Re-checked atomically: a response may have landed since the read
        let sealed = match self
            .ledger
            .expire_pending(lead_id, phase, SealPolicy::RequireQuiet)
        {
            Ok(sealed) => sealed,
            Err(err @ (LedgerError::PhaseEngaged { .. } | LedgerError::AlreadyAccepted(_))) => {
                return Ok(self.abort_cascade(&lead, phase, err.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if phase.holds_locks() {
            let agents = self.live_holders(sealed);
            self.release_locks(&lead, phase, &agents).await;
        }

        let assigned: HashSet<AgentId> = assignments.into_iter().map(|a| a.agent_id).collect();
        let candidates = self.eligible_candidates(&lead).await?;

        match self
            .run_phases(&lead, &candidates, &assigned, phase.cascade_plan())
            .await
        {
            Ok(result) => Ok(TransitionOutcome::Advanced(result)),
            Err(RoutingError::AllPhasesExhausted { failures, .. }) => {
                let reason = format!("cascade from {} exhausted: {}", phase, failures.join("; "));
                self.enter_concierge(&lead, &reason)?;
                Ok(TransitionOutcome::Escalated)
            }
            Err(err) => Err(err),
        }
    }

    /// Record an agent's response on the lead's current phase
    ///
    /// An acceptance releases the availability locks of the other agents
    /// holding the same phase.
    pub async fn record_response(
        &self,
        lead_id: &str,
        agent_id: &str,
        status: ResponseStatus,
    ) -> RouteResult<Assignment> {
        if status == ResponseStatus::Pending {
            return Err(RoutingError::InvalidResponse(status));
        }
        let _guard = self.lead_locks.acquire(lead_id).await;

        let lead = self.ledger.get_lead(lead_id)?;
        if lead.routing_state.is_terminal() {
            return Err(RoutingError::Terminal(lead.id));
        }

        let now = self.clock.now();
        let assignment = self
            .ledger
            .update_response_status(lead_id, agent_id, status, now)?;
        info!(
            lead_id,
            agent_id,
            phase = %assignment.phase,
            status = %status,
            "Response recorded"
        );
        self.events.publish(RoutingEvent::ResponseRecorded {
            lead_id: lead.id.clone(),
            agent_id: agent_id.to_string(),
            phase: assignment.phase,
            status,
            timestamp: now,
        });

        if status == ResponseStatus::Accepted && assignment.phase.holds_locks() {
            let others = self.live_holders(
                self.ledger
                    .assignments_for_lead(lead_id)?
                    .into_iter()
                    .filter(|a| a.phase == assignment.phase && a.agent_id != agent_id),
            );
            self.release_locks(&lead, assignment.phase, &others).await;
        }

        Ok(assignment)
    }

    /// Hand a lead to manual handling
    ///
    /// Releases the current phase's locks and ignores its pending
    /// assignments. Escalating a concierge lead is a no-op.
    pub async fn escalate_to_concierge(
        &self,
        lead_id: &str,
        reason: &str,
    ) -> RouteResult<RoutingResult> {
        let _guard = self.lead_locks.acquire(lead_id).await;

        let lead = self.ledger.get_lead(lead_id)?;
        if lead.routing_state.is_terminal() {
            debug!(lead_id, "Lead already in concierge");
            return Ok(RoutingResult::concierge(lead.id));
        }

        if let Some(phase) = lead.routing_state.phase() {
            let sealed = self.ledger.expire_pending(lead_id, phase, SealPolicy::Force)?;
            if phase.holds_locks() {
                let agents = self.live_holders(sealed);
                self.release_locks(&lead, phase, &agents).await;
            }
        } else if self
            .ledger
            .assignments_for_lead(lead_id)?
            .iter()
            .any(|a| a.response_status == ResponseStatus::Accepted)
        {
            return Err(RoutingError::AlreadyAccepted(lead.id));
        }

        self.enter_concierge(&lead, reason)
    }

    /// Attempt each phase of `plan` in order until one commits
    async fn run_phases(
        &self,
        lead: &Lead,
        candidates: &[Candidate],
        assigned: &HashSet<AgentId>,
        plan: &[Phase],
    ) -> RouteResult<RoutingResult> {
        let mut failures = Vec::with_capacity(plan.len());

        for &phase in plan {
            match self.attempt_phase(phase, lead, candidates, assigned).await {
                Ok(result) => return Ok(result),
                Err(PhaseAttemptError::Aborted(err)) => {
                    warn!(lead_id = %lead.id, phase = %phase, error = %err, "Phase attempt aborted");
                    self.events.publish(RoutingEvent::CascadeAborted {
                        lead_id: lead.id.clone(),
                        phase,
                        reason: err.to_string(),
                        timestamp: self.clock.now(),
                    });
                    return Err(err);
                }
                Err(err) => {
                    debug!(lead_id = %lead.id, phase = %phase, reason = %err, "Phase attempt failed, falling through");
                    failures.push(err.to_string());
                }
            }
        }

        Err(RoutingError::AllPhasesExhausted {
            lead_id: lead.id.clone(),
            failures,
        })
    }

    async fn eligible_candidates(&self, lead: &Lead) -> RouteResult<Vec<Candidate>> {
        let filters = EligibilityFilters::from_lead(lead);
        let candidates = self
            .collaborators
            .eligibility
            .eligible_agents(&filters)
            .await
            .map_err(RoutingError::Eligibility)?;
        debug!(lead_id = %lead.id, count = candidates.len(), "Eligible agents found");
        Ok(candidates)
    }

    fn enter_concierge(&self, lead: &Lead, reason: &str) -> RouteResult<RoutingResult> {
        self.ledger.set_routing_state(
            &lead.id,
            lead.routing_state,
            RoutingState::Concierge,
            None,
        )?;
        warn!(lead_id = %lead.id, from = %lead.routing_state, reason, "Lead escalated to concierge");
        self.events.publish(RoutingEvent::ConciergeEscalation {
            lead_id: lead.id.clone(),
            from: lead.routing_state,
            reason: reason.to_string(),
            timestamp: self.clock.now(),
        });
        Ok(RoutingResult::concierge(lead.id.clone()))
    }

    fn abort_cascade(&self, lead: &Lead, phase: Phase, reason: String) -> TransitionOutcome {
        info!(lead_id = %lead.id, phase = %phase, reason = %reason, "Cascade skipped");
        self.events.publish(RoutingEvent::CascadeAborted {
            lead_id: lead.id.clone(),
            phase,
            reason: reason.clone(),
            timestamp: self.clock.now(),
        });
        TransitionOutcome::Aborted { reason }
    }

    /// Agents whose hold for this lead may still be live
    ///
    /// A hold lasts exactly as long as its phase window. Once the window has
    /// closed the slot may already be held by another lead, and releasing it
    /// by (agent, date) would drop that lead's hold.
    fn live_holders(&self, assignments: impl IntoIterator<Item = Assignment>) -> Vec<AgentId> {
        let now = self.clock.now();
        assignments
            .into_iter()
            .filter(|a| a.phase_expires_at.is_some_and(|expires| expires > now))
            .map(|a| a.agent_id)
            .collect()
    }

    /// Release the event-date holds of `agents`; releasing is idempotent
    async fn release_locks(&self, lead: &Lead, phase: Phase, agents: &[AgentId]) {
        if agents.is_empty() {
            return;
        }
        let locks = &self.collaborators.locks;
        join_all(
            agents
                .iter()
                .map(|agent_id| locks.release(agent_id, lead.event_date)),
        )
        .await;

        debug!(lead_id = %lead.id, phase = %phase, count = agents.len(), "Locks released");
        self.events.publish(RoutingEvent::LocksReleased {
            lead_id: lead.id.clone(),
            phase,
            agents: agents.to_vec(),
            timestamp: self.clock.now(),
        });
    }

    /// Notify every agent of a committed phase concurrently
    ///
    /// Failures are logged and published; the assignments stand regardless.
    async fn notify_all(&self, assignments: &[Assignment]) {
        let method = self.config.notification_method;
        let notifier = &self.collaborators.notifier;

        let results = join_all(assignments.iter().map(|a| async move {
            (a, notifier.notify(&a.agent_id, &a.lead_id, method).await)
        }))
        .await;

        for (assignment, result) in results {
            let now = self.clock.now();
            match result {
                Ok(()) => {
                    if let Err(err) = self.ledger.mark_notified(assignment.id, method, now) {
                        warn!(
                            lead_id = %assignment.lead_id,
                            agent_id = %assignment.agent_id,
                            error = %err,
                            "Failed to record notification"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        lead_id = %assignment.lead_id,
                        agent_id = %assignment.agent_id,
                        error = %err,
                        "Notification failed"
                    );
                    self.events.publish(RoutingEvent::NotificationFailed {
                        lead_id: assignment.lead_id.clone(),
                        agent_id: assignment.agent_id.clone(),
                        error: err.to_string(),
                        timestamp: now,
                    });
                }
            }
        }
    }
}
