//! MCP client errors.

use std::time::Duration;
use thiserror::Error;

/// Errors from the MCP client manager.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server name is not in the configuration.
    #[error("Server '{name}' not configured")]
    ServerNotConfigured {
        /// Unknown name.
        name: String,
    },

    /// The server exists but is disabled.
    #[error("Server '{name}' is disabled")]
    Disabled {
        /// Disabled server.
        name: String,
    },

    /// The circuit breaker is open and the cooldown has not elapsed.
    #[error("Circuit breaker open for '{name}'")]
    CircuitBreakerOpen {
        /// Tripped server.
        name: String,
        /// Time until a retry is permitted, when the last failure time
        /// is known.
        retry_after: Option<Duration>,
    },

    /// Connecting took longer than `connection_timeout`.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// All connection attempts failed.
    #[error("Failed to connect to '{name}' after {attempts} attempts: {reason}")]
    ConnectFailed {
        /// Server that refused.
        name: String,
        /// Attempts made (initial + retries).
        attempts: u32,
        /// Last failure detail.
        reason: String,
    },

    /// A connect succeeded but produced no usable session.
    #[error("Connection returned no session")]
    NoSession,

    /// The server config is unusable for its transport.
    #[error("invalid server config for '{name}': {reason}")]
    InvalidConfig {
        /// Misconfigured server.
        name: String,
        /// What is missing or wrong.
        reason: String,
    },

    /// A tool call failed on the remote side.
    #[error("tool call {server}/{tool} failed: {reason}")]
    ToolCallFailed {
        /// Server called.
        server: String,
        /// Tool invoked.
        tool: String,
        /// Remote failure detail.
        reason: String,
    },

    /// A call exceeded its deadline.
    #[error("operation timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested tool is not known on the server.
    #[error("tool '{tool}' not found on server '{server}'")]
    ToolNotFound {
        /// Server queried.
        server: String,
        /// Missing tool.
        tool: String,
    },
}

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_matches_contract() {
        assert_eq!(
            McpError::ServerNotConfigured { name: "x".into() }.to_string(),
            "Server 'x' not configured"
        );
        assert_eq!(
            McpError::Disabled { name: "x".into() }.to_string(),
            "Server 'x' is disabled"
        );
        assert_eq!(McpError::ConnectionTimeout.to_string(), "Connection timeout");
        assert_eq!(McpError::NoSession.to_string(), "Connection returned no session");
        assert!(
            McpError::ConnectFailed {
                name: "x".into(),
                attempts: 3,
                reason: "refused".into()
            }
            .to_string()
            .starts_with("Failed to connect")
        );
    }
}
