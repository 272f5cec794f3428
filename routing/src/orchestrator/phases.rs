//! Individual phase attempts
//!
//! Each attempt picks its candidates, takes the locks the phase needs and
//! commits through the ledger. Locks taken by an attempt whose commit fails
//! are released before the attempt reports `Aborted`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{info, warn};

use super::PhaseOrchestrator;
use crate::error::{LedgerError, PhaseAttemptError, RoutingError};
use crate::events::RoutingEvent;
use crate::ledger::PhaseCommit;
use crate::types::{AgentId, Assignment, Candidate, Lead, Phase, RoutingResult};

type AttemptResult = Result<RoutingResult, PhaseAttemptError>;

impl PhaseOrchestrator {
    pub(super) async fn attempt_phase(
        &self,
        phase: Phase,
        lead: &Lead,
        candidates: &[Candidate],
        assigned: &HashSet<AgentId>,
    ) -> AttemptResult {
        let mut fresh = candidates
            .iter()
            .filter(|c| !assigned.contains(&c.agent_id));

        match phase {
            Phase::Exclusive => {
                let top = fresh.next().ok_or(PhaseAttemptError::NoCandidates { phase })?;
                self.attempt_exclusive(lead, top).await
            }
            Phase::TierExpansion => {
                let picks: Vec<&Candidate> =
                    fresh.take(self.config.max_tier_expansion_agents).collect();
                self.attempt_tier_expansion(lead, &picks).await
            }
            Phase::Broadcast => {
                let picks: Vec<&Candidate> = fresh.take(self.config.max_broadcast_agents).collect();
                self.attempt_broadcast(lead, &picks).await
            }
        }
    }

    async fn attempt_exclusive(&self, lead: &Lead, top: &Candidate) -> AttemptResult {
        let phase = Phase::Exclusive;
        let locks = &self.collaborators.locks;

        if !locks
            .lock(
                &top.agent_id,
                lead.event_date,
                &lead.id,
                self.config.exclusive_window_minutes,
            )
            .await
        {
            warn!(lead_id = %lead.id, agent_id = %top.agent_id, "Exclusive lock refused");
            return Err(PhaseAttemptError::LockAcquisitionFailed {
                phase,
                agent_id: top.agent_id.clone(),
            });
        }

        let now = self.clock.now();
        let until = now + self.config.exclusive_window();
        let assignment = Assignment::exclusive(&lead.id, top, now, until);
        self.commit(lead, phase, vec![assignment], now).await
    }

    async fn attempt_tier_expansion(&self, lead: &Lead, picks: &[&Candidate]) -> AttemptResult {
        let phase = Phase::TierExpansion;
        if picks.is_empty() {
            return Err(PhaseAttemptError::NoCandidates { phase });
        }

        let locks = &self.collaborators.locks;
        let window = self.config.tier_expansion_window_minutes;
        let granted = join_all(picks.iter().map(|c| async move {
            let ok = locks.lock(&c.agent_id, lead.event_date, &lead.id, window).await;
            (*c, ok)
        }))
        .await;

        let locked: Vec<&Candidate> = granted
            .into_iter()
            .filter_map(|(c, ok)| {
                if !ok {
                    warn!(lead_id = %lead.id, agent_id = %c.agent_id, "Tier expansion lock refused");
                }
                ok.then_some(c)
            })
            .collect();
        if locked.is_empty() {
            return Err(PhaseAttemptError::NoLocksAcquired {
                phase,
                attempted: picks.len(),
            });
        }

        let now = self.clock.now();
        let expires = now + self.config.tier_expansion_window();
        let assignments = locked
            .into_iter()
            .map(|c| Assignment::tier_expansion(&lead.id, c, now, expires))
            .collect();
        self.commit(lead, phase, assignments, now).await
    }

    async fn attempt_broadcast(&self, lead: &Lead, picks: &[&Candidate]) -> AttemptResult {
        let phase = Phase::Broadcast;
        if picks.is_empty() {
            return Err(PhaseAttemptError::NoCandidates { phase });
        }

        let now = self.clock.now();
        let assignments = picks
            .iter()
            .map(|c| Assignment::broadcast(&lead.id, c, now))
            .collect();
        self.commit(lead, phase, assignments, now).await
    }

    /// Write the phase through compare-and-commit, then notify
    async fn commit(
        &self,
        lead: &Lead,
        phase: Phase,
        assignments: Vec<Assignment>,
        now: DateTime<Utc>,
    ) -> AttemptResult {
        let agents: Vec<AgentId> = assignments.iter().map(|a| a.agent_id.clone()).collect();
        let commit = PhaseCommit {
            lead_id: lead.id.clone(),
            expected_state: lead.routing_state,
            next_state: phase.routing_state(),
            routed_at: now,
            assignments: assignments.clone(),
        };

        if let Err(err) = self.ledger.commit_phase(commit) {
            if phase.holds_locks() {
                self.release_locks(lead, phase, &agents).await;
            }
            let err = match err {
                LedgerError::AlreadyAccepted(lead_id) => RoutingError::StaleTransition {
                    lead_id,
                    reason: "an agent accepted while the phase was in flight".into(),
                },
                other => other.into(),
            };
            return Err(PhaseAttemptError::Aborted(err));
        }

        self.notify_all(&assignments).await;

        let expires_at = assignments.first().and_then(|a| a.phase_expires_at);
        info!(
            lead_id = %lead.id,
            phase = %phase,
            agents = agents.len(),
            "Lead entered phase"
        );
        self.events.publish(RoutingEvent::PhaseEntered {
            lead_id: lead.id.clone(),
            phase,
            agents: agents.clone(),
            expires_at,
            timestamp: now,
        });

        Ok(RoutingResult {
            lead_id: lead.id.clone(),
            phase: phase.routing_state(),
            assigned_agents: agents,
            exclusive_until: assignments.first().and_then(|a| a.exclusive_until),
            next_phase_at: expires_at,
        })
    }
}
