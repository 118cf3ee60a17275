//! Shared error kinds
//!
//! One variant per failure class the orchestrator distinguishes.
//! Adapter-internal failures travel as `anyhow` errors through the
//! driver port and surface here as `Transport` with the subject path
//! attached; nothing is retried.

use thiserror::Error;

/// Errors surfaced by a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source path missing, or nothing left after the extension filter.
    #[error("no files found: {0}")]
    NoFiles(String),

    /// No supported device present, or the requested serial not found.
    #[error("no available device found")]
    NoDevice,

    /// Device reports no writable storage object.
    #[error("no storage found on the device")]
    NoStorage,

    /// Device storage is not read-write.
    #[error("no write access to the device storage")]
    NoAccess,

    /// Device enumeration returned no entries at all.
    #[error("no objects found on the device")]
    NoObjects,

    /// Back-end failure during an operation, carrying the subject path.
    #[error("{operation} failed for '{path}'")]
    Transport {
        operation: &'static str,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// History database open/create/read/write failure.
    #[error("history error: {0}")]
    History(String),

    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_carries_path() {
        let err = SyncError::Transport {
            operation: "copy",
            path: "documents/mybooks/a.azw3".to_string(),
            source: anyhow::anyhow!("device unplugged"),
        };
        assert_eq!(err.to_string(), "copy failed for 'documents/mybooks/a.azw3'");
    }

    #[test]
    fn no_files_names_the_reason() {
        let err = SyncError::NoFiles("no books in the source path".to_string());
        assert!(err.to_string().contains("no books"));
    }
}
