//! Configuration schema.
//!
//! Mirrors `defaults.toml` exactly; every field has a default so partial
//! user files deserialize cleanly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Daemon process settings.
    #[serde(default)]
    pub daemon: DaemonSection,
    /// Log rotation settings.
    #[serde(default)]
    pub logs: LogsSection,
    /// MCP client manager settings.
    #[serde(default)]
    pub mcp: McpSection,
    /// Agent orchestration settings.
    #[serde(default)]
    pub agents: AgentsSection,
    /// Session summary / handoff settings.
    #[serde(default)]
    pub session_summary: SessionSummarySection,
    /// Workflow engine settings.
    #[serde(default)]
    pub workflows: WorkflowsSection,
}

/// `[daemon]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket event-stream port.
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
    /// Seconds between daemon health probes in the hook dispatcher.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
}

/// `[logs]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogsSection {
    /// Max size of one log file before rotation.
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    /// Number of rotated files to keep.
    #[serde(default = "default_log_backups")]
    pub backup_count: u32,
}

/// `[mcp]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpSection {
    /// Deadline for establishing one server connection.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    /// Default deadline for one tool call.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Connection retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_connection_retries: u32,
    /// Seconds between background health sweeps.
    #[serde(default = "default_mcp_health_interval")]
    pub health_check_interval_secs: u64,
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    /// Cooldown before a half-open retry is permitted.
    #[serde(default = "default_breaker_cooldown")]
    pub circuit_breaker_cooldown_secs: u64,
}

/// `[agents]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentsSection {
    /// Maximum spawn depth for child agents.
    #[serde(default = "default_max_depth")]
    pub max_agent_depth: u32,
    /// Default concurrency cap for `orchestrate_ready_tasks`.
    #[serde(default = "default_max_concurrent")]
    pub default_max_concurrent: u32,
    /// Fallback provider when neither argument nor workflow variables name one.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Workflow assigned to spawned agents.
    #[serde(default = "default_workflow")]
    pub default_workflow: String,
    /// Deadline for one spawned agent run.
    #[serde(default = "default_spawn_timeout")]
    pub spawn_timeout_secs: u64,
}

/// `[session_summary]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSummarySection {
    /// Directory for handoff failback files.
    #[serde(default = "default_summary_path")]
    pub summary_file_path: String,
}

/// `[workflows]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowsSection {
    /// Whether `extract_handoff_context` runs at all.
    #[serde(default = "default_true")]
    pub enable_compact_handoff: bool,
}

impl Config {
    /// The dispatcher's health poll interval.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.health_check_interval_secs)
    }
}

impl McpSection {
    /// Connection deadline as a [`Duration`].
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Default tool-call deadline as a [`Duration`].
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Breaker cooldown as a [`Duration`].
    #[must_use]
    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }

    /// Background health sweep interval as a [`Duration`].
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

fn default_port() -> u16 {
    8765
}
fn default_websocket_port() -> u16 {
    8766
}
fn default_health_interval() -> u64 {
    10
}
fn default_log_max_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_log_backups() -> u32 {
    5
}
fn default_connection_timeout() -> u64 {
    30
}
fn default_tool_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_mcp_health_interval() -> u64 {
    30
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    60
}
fn default_max_depth() -> u32 {
    3
}
fn default_max_concurrent() -> u32 {
    3
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_workflow() -> String {
    "auto-task".to_string()
}
fn default_spawn_timeout() -> u64 {
    600
}
fn default_summary_path() -> String {
    "~/.gobby/session_summaries".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            websocket_port: default_websocket_port(),
            health_check_interval_secs: default_health_interval(),
        }
    }
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            max_bytes: default_log_max_bytes(),
            backup_count: default_log_backups(),
        }
    }
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            max_connection_retries: default_max_retries(),
            health_check_interval_secs: default_mcp_health_interval(),
            circuit_breaker_failure_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_secs: default_breaker_cooldown(),
        }
    }
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            max_agent_depth: default_max_depth(),
            default_max_concurrent: default_max_concurrent(),
            default_provider: default_provider(),
            default_workflow: default_workflow(),
            spawn_timeout_secs: default_spawn_timeout(),
        }
    }
}

impl Default for SessionSummarySection {
    fn default() -> Self {
        Self {
            summary_file_path: default_summary_path(),
        }
    }
}

impl Default for WorkflowsSection {
    fn default() -> Self {
        Self {
            enable_compact_handoff: default_true(),
        }
    }
}
