//! Shared fixtures for the routing integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lead_routing::{
    AgentId, AvailabilityLocks, CollaboratorError, Collaborators, InMemoryLockManager, Lead,
    LeadId, ManualClock, MemoryLedger, NotificationDispatcher, NotificationMethod,
    PhaseOrchestrator, RosterAgent, RoutingConfig, RoutingLedger, RoutingState, SharedClock,
    SharedLedger, StaticRoster,
};

/// Route test logs through the test writer; `RUST_LOG` overrides the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn event_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 21).unwrap()
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

pub fn agent_id(n: usize) -> AgentId {
    format!("a{n}")
}

/// `n` Memphis agents; a1 ranks highest
pub fn roster(n: usize) -> StaticRoster {
    StaticRoster::new(
        (1..=n)
            .map(|i| RosterAgent {
                agent_id: agent_id(i),
                city: "Memphis".into(),
                state: Some("TN".into()),
                event_types: vec!["wedding".into()],
                min_budget: Some(500),
                score: (100 - i) as f64,
                blackout_dates: vec![],
                active: true,
            })
            .collect(),
    )
}

pub fn lead(id: &str) -> Lead {
    Lead::new(id, "Memphis", event_date(), "wedding")
        .with_state("TN")
        .with_budget(1000, 2500)
}

/// Lock manager that refuses selected agents and can simulate a concurrent
/// writer escalating the lead while a lock request is in flight
pub struct ScriptedLocks {
    pub inner: InMemoryLockManager,
    refuse: Mutex<HashSet<AgentId>>,
    escalate_on_lock: Mutex<Option<(Arc<MemoryLedger>, LeadId, RoutingState)>>,
    pub lock_calls: Mutex<Vec<AgentId>>,
}

impl ScriptedLocks {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: InMemoryLockManager::new(clock),
            refuse: Mutex::new(HashSet::new()),
            escalate_on_lock: Mutex::new(None),
            lock_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn refuse(&self, agents: &[&str]) {
        let mut refuse = self.refuse.lock().unwrap();
        refuse.extend(agents.iter().map(|a| a.to_string()));
    }

    /// On the next lock request, move the lead from `expected` to concierge
    /// behind the orchestrator's back
    pub fn escalate_on_next_lock(
        &self,
        ledger: Arc<MemoryLedger>,
        lead_id: &str,
        expected: RoutingState,
    ) {
        *self.escalate_on_lock.lock().unwrap() = Some((ledger, lead_id.to_string(), expected));
    }

    pub fn holder(&self, agent_id: &str) -> Option<LeadId> {
        self.inner
            .holder(agent_id, event_date())
            .map(|h| h.lead_id)
    }
}

#[async_trait]
impl AvailabilityLocks for ScriptedLocks {
    async fn lock(
        &self,
        agent_id: &str,
        date: NaiveDate,
        lead_id: &str,
        duration_minutes: u32,
    ) -> bool {
        self.lock_calls.lock().unwrap().push(agent_id.to_string());
        let interference = self.escalate_on_lock.lock().unwrap().take();
        if let Some((ledger, lead, expected)) = interference {
            ledger
                .set_routing_state(&lead, expected, RoutingState::Concierge, None)
                .unwrap();
        }
        if self.refuse.lock().unwrap().contains(agent_id) {
            return false;
        }
        self.inner.lock(agent_id, date, lead_id, duration_minutes).await
    }

    async fn release(&self, agent_id: &str, date: NaiveDate) {
        self.inner.release(agent_id, date).await
    }
}

/// Notifier that records deliveries and optionally fails them
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(AgentId, LeadId)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn sent_to(&self) -> Vec<AgentId> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(agent, _)| agent.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(
        &self,
        agent_id: &str,
        lead_id: &str,
        _method: NotificationMethod,
    ) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("smtp relay down".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((agent_id.to_string(), lead_id.to_string()));
        Ok(())
    }
}

/// An orchestrator wired to in-memory collaborators and a manual clock
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub locks: Arc<ScriptedLocks>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<PhaseOrchestrator>,
}

impl Harness {
    pub fn new(agents: usize) -> Self {
        Self::build(roster(agents), RecordingNotifier::default(), MemoryLedger::new())
    }

    pub fn build(roster: StaticRoster, notifier: RecordingNotifier, ledger: MemoryLedger) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(start()));
        let ledger = Arc::new(ledger);
        let locks = Arc::new(ScriptedLocks::new(clock.clone()));
        let notifier = Arc::new(notifier);

        let shared: SharedLedger = ledger.clone();
        let collaborators = Collaborators::new(Arc::new(roster), locks.clone(), notifier.clone());
        let orchestrator = PhaseOrchestrator::new(RoutingConfig::default(), shared, collaborators)
            .unwrap()
            .with_clock(clock.clone());

        Self {
            clock,
            ledger,
            locks,
            notifier,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn add_lead(&self, id: &str) {
        self.ledger.insert_lead(lead(id)).unwrap();
    }

    /// Insert a lead whose event falls `days` after the default date
    pub fn add_lead_on(&self, id: &str, days: i64) {
        let mut lead = lead(id);
        lead.event_date = event_date() + chrono::Duration::days(days);
        self.ledger.insert_lead(lead).unwrap();
    }

    pub fn state_of(&self, id: &str) -> RoutingState {
        self.ledger.get_lead(id).unwrap().routing_state
    }
}
