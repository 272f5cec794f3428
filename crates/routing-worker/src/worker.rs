//! Worker runtime
//!
//! Restores persisted state, wires the in-memory collaborators into a
//! [`PhaseOrchestrator`] and exposes the operations behind each CLI command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lead_routing::{
    Assignment, Collaborators, InMemoryLockManager, LeadId, MemoryLedger, PhaseOrchestrator,
    ResponseStatus, RosterAgent, RoutingError, RoutingLedger, RoutingResult, RoutingState,
    SharedClock, SharedLedger, StaticRoster, TickReport, TracingNotifier, TransitionScheduler,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::seed::SeedFile;
use crate::state::WorkerState;

/// Reason recorded when every routing phase failed for a lead
const EXHAUSTED_REASON: &str = "all routing phases exhausted";

/// Results of routing the pending leads
#[derive(Debug, Default, Serialize)]
pub struct RouteSummary {
    pub routed: Vec<RoutingResult>,
    pub failed: Vec<LeadFailure>,
}

#[derive(Debug, Serialize)]
pub struct LeadFailure {
    pub lead_id: LeadId,
    pub error: String,
}

/// One row of `status` output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadStatus {
    pub lead_id: LeadId,
    pub state: RoutingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_at: Option<DateTime<Utc>>,
    pub assignments: usize,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,
    /// When the current phase window closes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_expires_at: Option<DateTime<Utc>>,
}

pub struct Worker {
    config: WorkerConfig,
    agents: Vec<RosterAgent>,
    ledger: Arc<MemoryLedger>,
    locks: Arc<InMemoryLockManager>,
    orchestrator: Arc<PhaseOrchestrator>,
    state_path: PathBuf,
}

impl Worker {
    /// Restore state from `state_path` and apply an optional seed
    ///
    /// Seed agents replace the stored roster. Seed leads already present in
    /// the ledger are left untouched.
    pub fn open(
        config: WorkerConfig,
        seed: Option<SeedFile>,
        state_path: &Path,
        clock: SharedClock,
    ) -> Result<Self> {
        let state = WorkerState::load(state_path)?.unwrap_or_default();
        let ledger = Arc::new(MemoryLedger::from_snapshot(state.ledger));
        let locks = Arc::new(InMemoryLockManager::from_holds(clock.clone(), state.holds));

        let mut agents = state.agents;
        if let Some(seed) = seed {
            if !seed.agents.is_empty() {
                agents = seed.agents;
            }
            for lead in seed.leads {
                if ledger.get_lead(&lead.id).is_ok() {
                    continue;
                }
                let lead_id = lead.id.clone();
                ledger
                    .insert_lead(lead)
                    .context(format!("Failed to load seed lead {lead_id}"))?;
            }
        }
        info!(
            agents = agents.len(),
            state = %state_path.display(),
            "Worker state loaded"
        );

        let shared: SharedLedger = ledger.clone();
        let collaborators = Collaborators::new(
            Arc::new(StaticRoster::new(agents.clone())),
            locks.clone(),
            Arc::new(TracingNotifier),
        );
        let orchestrator = PhaseOrchestrator::new(config.routing.clone(), shared, collaborators)
            .context("Invalid routing configuration")?
            .with_clock(clock);

        Ok(Self {
            config,
            agents,
            ledger,
            locks,
            orchestrator: Arc::new(orchestrator),
            state_path: state_path.to_path_buf(),
        })
    }

    pub fn orchestrator(&self) -> &Arc<PhaseOrchestrator> {
        &self.orchestrator
    }

    /// Route one lead; exhausted phases escalate it to concierge
    pub async fn route(&self, lead_id: &str) -> Result<RoutingResult, RoutingError> {
        match self.orchestrator.route_lead(lead_id).await {
            Err(RoutingError::AllPhasesExhausted { failures, .. }) => {
                warn!(lead_id, failures = failures.len(), "Routing exhausted, escalating");
                self.orchestrator
                    .escalate_to_concierge(lead_id, EXHAUSTED_REASON)
                    .await
            }
            other => other,
        }
    }

    /// Route every pending or claimed lead
    pub async fn route_pending(&self) -> Result<RouteSummary> {
        let mut summary = RouteSummary::default();
        for state in [RoutingState::Pending, RoutingState::Routing] {
            for lead in self.ledger.list_leads_in_state(state)? {
                match self.route(&lead.id).await {
                    Ok(result) => summary.routed.push(result),
                    Err(err) => {
                        warn!(lead_id = %lead.id, error = %err, "Failed to route lead");
                        summary.failed.push(LeadFailure {
                            lead_id: lead.id,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
        Ok(summary)
    }

    pub fn scheduler(&self) -> TransitionScheduler {
        TransitionScheduler::new(self.orchestrator.clone(), self.config.scheduler.clone())
    }

    /// One scheduler pass
    pub async fn tick(&self) -> Result<TickReport> {
        Ok(self.scheduler().tick().await?)
    }

    /// Route new leads and cascade expired ones until cancelled
    ///
    /// State is saved after every routing pass and once more on shutdown.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let scheduler = self.scheduler();
        let scheduler_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        let mut interval = tokio::time::interval(self.config.scheduler.poll_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.route_pending().await {
                        Ok(summary) if !summary.routed.is_empty() || !summary.failed.is_empty() => {
                            info!(
                                routed = summary.routed.len(),
                                failed = summary.failed.len(),
                                "Routing pass"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Routing pass failed"),
                    }
                    if let Err(e) = self.save() {
                        error!(error = %e, "Failed to save worker state");
                    }
                }
            }
        }

        scheduler_task.await.context("Scheduler task failed")?;
        self.save()
    }

    pub async fn respond(
        &self,
        lead_id: &str,
        agent_id: &str,
        status: ResponseStatus,
    ) -> Result<Assignment> {
        Ok(self
            .orchestrator
            .record_response(lead_id, agent_id, status)
            .await?)
    }

    pub async fn escalate(&self, lead_id: &str, reason: &str) -> Result<RoutingResult> {
        Ok(self
            .orchestrator
            .escalate_to_concierge(lead_id, reason)
            .await?)
    }

    /// Per-lead summary, ordered by lead id
    pub fn status(&self) -> Result<Vec<LeadStatus>> {
        let snapshot = self.ledger.snapshot()?;
        let rows = snapshot
            .leads
            .values()
            .map(|lead| {
                let assignments: Vec<&Assignment> = snapshot
                    .assignments
                    .iter()
                    .filter(|a| a.lead_id == lead.id)
                    .collect();
                let current = lead.routing_state.phase();
                LeadStatus {
                    lead_id: lead.id.clone(),
                    state: lead.routing_state,
                    routed_at: lead.routed_at,
                    assignments: assignments.len(),
                    pending: assignments
                        .iter()
                        .filter(|a| a.response_status == ResponseStatus::Pending)
                        .count(),
                    accepted_by: assignments
                        .iter()
                        .find(|a| a.response_status == ResponseStatus::Accepted)
                        .map(|a| a.agent_id.clone()),
                    phase_expires_at: assignments
                        .iter()
                        .filter(|a| Some(a.phase) == current)
                        .filter_map(|a| a.phase_expires_at)
                        .max(),
                }
            })
            .collect();
        Ok(rows)
    }

    /// Persist roster, ledger and holds
    pub fn save(&self) -> Result<()> {
        let state = WorkerState {
            agents: self.agents.clone(),
            ledger: self.ledger.snapshot()?,
            holds: self.locks.active_holds(),
        };
        state.save(&self.state_path)
    }
}
