//! Transition Scheduler
//!
//! Finds leads whose phase window has elapsed and cascades them. Due work is
//! derived from ledger state alone, so a restarted worker picks up exactly
//! where the previous one stopped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{RouteResult, RoutingError};
use crate::orchestrator::{PhaseOrchestrator, TransitionOutcome};
use crate::types::{LeadId, ResponseStatus, RoutingState};

/// Counts from one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub examined: usize,
    pub advanced: usize,
    pub aborted: usize,
    pub escalated: usize,
    /// Leads that needed nothing by the time their transition ran
    pub no_op: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, lead_id: &str, result: RouteResult<TransitionOutcome>) {
        match result {
            Ok(TransitionOutcome::Advanced(_)) => self.advanced += 1,
            Ok(TransitionOutcome::Aborted { .. }) | Err(RoutingError::StaleTransition { .. }) => {
                self.aborted += 1
            }
            Ok(TransitionOutcome::Escalated) => self.escalated += 1,
            Ok(
                TransitionOutcome::NoFurtherPhase
                | TransitionOutcome::NotRouted
                | TransitionOutcome::Terminal,
            ) => self.no_op += 1,
            Err(err) => {
                error!(lead_id, error = %err, "Transition failed");
                self.failed += 1;
            }
        }
    }
}

/// Periodically cascades leads whose window has elapsed
pub struct TransitionScheduler {
    orchestrator: Arc<PhaseOrchestrator>,
    config: SchedulerConfig,
}

impl TransitionScheduler {
    pub fn new(orchestrator: Arc<PhaseOrchestrator>, config: SchedulerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Leads whose current phase expired at or before `now`
    ///
    /// Only exclusive and tier-expansion leads carry a deadline. Leads with an
    /// accepted assignment, or with a decline in the current phase, are never
    /// due.
    pub fn due_leads(&self, now: DateTime<Utc>) -> RouteResult<Vec<LeadId>> {
        let ledger = self.orchestrator.ledger();
        let mut due = Vec::new();

        for state in [RoutingState::Exclusive, RoutingState::TierExpansion] {
            let phase = state.phase();
            for lead in ledger.list_leads_in_state(state)? {
                let assignments = ledger.assignments_for_lead(&lead.id)?;
                if assignments
                    .iter()
                    .any(|a| a.response_status == ResponseStatus::Accepted)
                {
                    continue;
                }
                let current: Vec<_> = assignments
                    .iter()
                    .filter(|a| Some(a.phase) == phase)
                    .collect();
                if current.iter().any(|a| a.response_status.is_engaged()) {
                    continue;
                }
                let deadline = current.iter().filter_map(|a| a.phase_expires_at).max();
                if deadline.is_some_and(|d| d <= now) {
                    due.push(lead.id);
                }
            }
        }

        Ok(due)
    }

    /// Transition every due lead once, concurrently
    pub async fn tick(&self) -> RouteResult<TickReport> {
        let now = self.orchestrator.clock().now();
        let due = self.due_leads(now)?;
        let mut report = TickReport {
            examined: due.len(),
            ..TickReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let sem = Arc::new(Semaphore::new(self.config.max_concurrent_transitions.max(1)));
        let mut join_set: JoinSet<(LeadId, RouteResult<TransitionOutcome>)> = JoinSet::new();

        for lead_id in due {
            let orchestrator = self.orchestrator.clone();
            let sem = sem.clone();
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let result = orchestrator.transition_to_next_phase(&lead_id).await;
                (lead_id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((lead_id, result)) => {
                    debug!(lead_id = %lead_id, ok = result.is_ok(), "Transition finished");
                    report.record(&lead_id, result);
                }
                Err(e) => {
                    warn!(error = %e, "Transition task panicked");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Poll `tick` until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_secs = self.config.poll_interval().as_secs(),
            max_concurrent = self.config.max_concurrent_transitions,
            "Transition scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Transition scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.examined > 0 => info!(
                            examined = report.examined,
                            advanced = report.advanced,
                            aborted = report.aborted,
                            escalated = report.escalated,
                            failed = report.failed,
                            "Scheduler tick"
                        ),
                        Ok(_) => debug!("Scheduler tick: nothing due"),
                        Err(e) => error!(error = %e, "Scheduler tick failed"),
                    }
                }
            }
        }
    }
}
