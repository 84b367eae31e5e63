//! Connection and health state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a server connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected, or cleanly closed.
    #[default]
    Disconnected,
    /// A connect is in flight.
    Connecting,
    /// Session established.
    Connected,
    /// The last connect attempt failed.
    Failed,
}

/// Health verdict from the background monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Responding normally.
    Healthy,
    /// Failing health checks.
    Unhealthy,
    /// No check has run yet.
    #[default]
    Unknown,
}

/// Per-server health record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerHealth {
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Monitor verdict.
    pub health: HealthState,
    /// When the last health check ran.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Latency of the last successful check.
    pub response_time_ms: Option<u64>,
    /// Consecutive failed checks/calls.
    pub consecutive_failures: u32,
}

/// A tool definition from a downstream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Server the tool lives on.
    pub server: String,
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: Option<String>,
    /// Full input schema.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Convert from an rmcp tool.
    #[must_use]
    pub fn from_rmcp(tool: &rmcp::model::Tool, server: &str) -> Self {
        Self {
            server: server.to_string(),
            name: tool.name.to_string(),
            description: tool.description.as_ref().map(ToString::to_string),
            input_schema: serde_json::to_value(tool.input_schema.as_ref())
                .unwrap_or(Value::Null),
        }
    }
}

/// Status view for the HTTP boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server name.
    pub name: String,
    /// Project scope, when project-bound.
    pub project_id: Option<String>,
    /// Transport kind.
    pub transport: String,
    /// Whether a session is established.
    pub connected: bool,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Free-form description from the config.
    pub description: Option<String>,
    /// Whether the server may be connected.
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let health = ServerHealth::default();
        assert_eq!(health.state, ConnectionState::Disconnected);
        assert_eq!(health.health, HealthState::Unknown);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_value(ConnectionState::Connected).unwrap(),
            serde_json::json!("connected")
        );
        assert_eq!(
            serde_json::to_value(HealthState::Unhealthy).unwrap(),
            serde_json::json!("unhealthy")
        );
    }
}
