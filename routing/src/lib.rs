//! Lead Routing Library
//!
//! Distributes booking leads to agents in escalating phases:
//!
//! - **Exclusive**: the top-ranked agent gets a locked, time-boxed offer
//! - **Tier expansion**: the next few agents are locked and offered together
//! - **Broadcast**: the wider market is offered the lead without locks
//! - **Concierge**: nobody eligible, or manual escalation
//!
//! # Components
//!
//! - [`PhaseOrchestrator`]: routes, cascades, records responses, escalates
//! - [`TransitionScheduler`]: cascades leads whose phase window has elapsed
//! - [`RoutingLedger`]: validated storage for leads and assignments, with
//!   [`MemoryLedger`] as the in-process implementation
//! - [`collaborators`]: eligibility, availability locks and notifications
//!
//! # Usage
//!
//! ```ignore
//! let ledger: SharedLedger = Arc::new(MemoryLedger::new());
//! let collaborators = Collaborators::new(roster, locks, notifier);
//! let orchestrator = Arc::new(PhaseOrchestrator::new(config, ledger, collaborators)?);
//!
//! orchestrator.route_lead("lead-42").await?;
//! TransitionScheduler::new(orchestrator, SchedulerConfig::default())
//!     .run(cancel)
//!     .await;
//! ```

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod scheduler;
pub mod types;

// Re-export core types
pub use types::{
    AgentId, Assignment, Candidate, EligibilityFilters, Lead, LeadId, NotificationMethod, Phase,
    ResponseStatus, RoutingResult, RoutingState,
};

// Re-export error types
pub use error::{
    CollaboratorError, ConfigError, LedgerError, LedgerResult, PhaseAttemptError, RouteResult,
    RoutingError, ValidationError,
};

// Re-export configuration
pub use config::{RoutingConfig, SchedulerConfig};

// Re-export time sources
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

// Re-export collaborator seams and in-memory implementations
pub use collaborators::{
    AvailabilityLocks, Collaborators, EligibilityFilter, Hold, InMemoryLockManager,
    NotificationDispatcher, RosterAgent, StaticRoster, TracingNotifier,
};

// Re-export ledger types
pub use ledger::{
    LedgerSnapshot, MemoryLedger, PhaseCommit, RoutingLedger, SealPolicy, SharedLedger,
};

// Re-export event types
pub use events::{EventBus, EventFilter, RoutingEvent, SharedEventBus};

// Re-export orchestration
pub use orchestrator::{PhaseOrchestrator, TransitionOutcome};
pub use scheduler::{TickReport, TransitionScheduler};
