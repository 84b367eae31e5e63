//! Storage error types.

use thiserror::Error;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization of a stored column failed.
    #[error("stored json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An entity was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("task", "session", "worktree", ...).
        kind: &'static str,
        /// Identifier that missed.
        id: String,
    },

    /// The operation conflicts with existing state.
    #[error("{0}")]
    Conflict(String),

    /// Adding a dependency would create a cycle.
    #[error("dependency cycle: {task} already depends on {depends_on}")]
    DependencyCycle {
        /// Task that would gain the dependency.
        task: String,
        /// Proposed blocker.
        depends_on: String,
    },

    /// A task reference could not be resolved.
    #[error("invalid task reference '{0}'")]
    InvalidReference(String),

    /// A commit SHA failed normalization.
    #[error("cannot resolve commit '{0}' to a short SHA")]
    InvalidCommit(String),

    /// Repeated id collisions on insert.
    #[error("id collision persisted after {attempts} attempts")]
    IdCollision {
        /// How many inserts were attempted.
        attempts: u32,
    },

    /// Secret encryption/decryption failed.
    #[error("secret crypto error: {0}")]
    Crypto(String),
}

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Shorthand for a [`StorageError::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
