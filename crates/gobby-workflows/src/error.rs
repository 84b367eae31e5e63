//! Workflow errors.

use thiserror::Error;

/// Errors surfaced by the workflow engine's fallible edges (loading,
/// storage). Trigger evaluation itself is fail-open and never raises
/// into the dispatch path.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A workflow document failed to parse.
    #[error("malformed workflow at {path}: {reason}")]
    Malformed {
        /// File that failed.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// A named workflow does not exist.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// Persistent state could not be read or written.
    #[error(transparent)]
    Storage(#[from] gobby_storage::StorageError),
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
