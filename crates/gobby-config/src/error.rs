//! Configuration errors.

use thiserror::Error;

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("failed to read config at {path}: {source}")]
    Read {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A config file could not be parsed as TOML.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// The merged tree did not match the schema.
    #[error("invalid configuration: {0}")]
    Deserialize(String),

    /// A field failed validation.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// What went wrong.
        reason: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
