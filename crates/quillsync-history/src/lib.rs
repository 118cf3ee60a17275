//! quillsync-history - Sync history persistence
//!
//! SQLite-backed log of sync runs. Each run that changed anything (and
//! the very first run, even if it changed nothing) appends a *step*:
//! the source-rooted book set as it looked when the run finished. The
//! latest step is the "previous state" the planner compares against.
//!
//! ## Schema
//!
//! - `identifiers(value)` - device/destination identity the database
//!   was created for, informational
//! - `steps(step_id, source, destination, created)` - one row per run
//! - `objects(step_id, path, data)` - JSON object snapshots per step,
//!   foreign-keyed to `steps`
//!
//! The store also implements the [`Driver`] port so it can be handed
//! around like any other back-end: `enumerate` returns the current
//! snapshot, mutations are rejected.
//!
//! [`Driver`]: quillsync_core::ports::Driver

pub mod list;
pub mod name;
pub mod store;

pub use list::{list_databases, HistoryReport};
pub use name::database_name;
pub use store::HistoryStore;

/// Errors from history database operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Failed to create or open a database file.
    #[error("history connection failed: {0}")]
    Connection(String),

    /// A query failed.
    #[error("history query failed: {0}")]
    Query(String),

    /// A stored object snapshot could not be decoded.
    #[error("history serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for HistoryError {
    fn from(e: sqlx::Error) -> Self {
        HistoryError::Query(e.to_string())
    }
}
