//! Routing worker
//!
//! Runs the lead routing library as a standalone process: loads a roster and
//! leads from a seed file, routes pending leads, cascades expired phases and
//! persists everything to a JSON state file between runs.

pub mod config;
pub mod seed;
pub mod state;
pub mod worker;

pub use config::WorkerConfig;
pub use seed::SeedFile;
pub use state::WorkerState;
pub use worker::{LeadFailure, LeadStatus, RouteSummary, Worker};
