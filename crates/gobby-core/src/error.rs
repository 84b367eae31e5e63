//! Core error type.

use thiserror::Error;

/// Errors from core helpers (project markers, filesystem).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Filesystem operation failed.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encode/decode failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A project marker was expected but absent.
    #[error("no .gobby/project.json under {root}")]
    ProjectMarkerMissing {
        /// Root that was searched.
        root: String,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
