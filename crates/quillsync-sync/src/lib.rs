//! quillsync-sync - The reconciliation engine
//!
//! Three pieces, in the order a run touches them:
//! - [`planner`] - pure three-way comparison of (local, history,
//!   device) object sets, producing an ordered action list
//! - [`executor`] - serial execution of that list against the drivers,
//!   honoring dry-run and stopping at the first failure
//! - [`engine`] - the orchestrator wiring drivers, history and planner
//!   together and committing a new history step on success

pub mod engine;
pub mod executor;
pub mod planner;

pub use engine::{ReportSink, SyncEngine, SyncOptions};
pub use executor::Executor;
pub use planner::{prepare, Action, ActionVerb, Plan, PlannerOptions, Target};
