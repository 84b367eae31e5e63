//! Row types for everything the store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use gobby_core::{SessionSource, TaskId};

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The CLI is actively working.
    Active,
    /// The CLI is idle or waiting on the user.
    Paused,
    /// A handoff summary exists; the session can parent a successor.
    HandoffReady,
    /// Superseded by a child session. Terminal.
    Expired,
}

impl SessionStatus {
    /// Wire/database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::HandoffReady => "handoff_ready",
            Self::Expired => "expired",
        }
    }

    /// Parse from the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "handoff_ready" => Some(Self::HandoffReady),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered CLI session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Internal id (UUID string).
    pub id: String,
    /// Opaque id assigned by the CLI.
    pub external_id: String,
    /// Which CLI owns the session.
    pub source: SessionSource,
    /// Stable machine identifier.
    pub machine_id: String,
    /// Owning project.
    pub project_id: String,
    /// Predecessor session when this one was created by a handoff.
    pub parent_session_id: Option<String>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Path to the CLI's transcript file, when known.
    pub jsonl_path: Option<String>,
    /// LLM-generated handoff summary.
    pub summary_markdown: Option<String>,
    /// Deterministic compact-handoff markdown.
    pub compact_markdown: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    Open,
    /// An agent or the user is working on it.
    InProgress,
    /// Flagged for human attention.
    Escalated,
    /// Done. Terminal unless reopened.
    Closed,
}

impl TaskStatus {
    /// Wire/database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }

    /// Parse from the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "escalated" => Some(Self::Escalated),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation outcome recorded on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// No validation requested.
    #[default]
    None,
    /// Validation requested, not yet run.
    Pending,
    /// Validation passed.
    Valid,
    /// Validation failed.
    Invalid,
}

impl ValidationStatus {
    /// Wire/database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    /// Parse from the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "pending" => Some(Self::Pending),
            "valid" => Some(Self::Valid),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// Priority of an unknown/unset task.
pub const UNSET_PRIORITY: i64 = 999;

/// A tracked unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id (UUID string).
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Hierarchy parent.
    pub parent_task_id: Option<String>,
    /// One-line title.
    pub title: String,
    /// Long-form description.
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Lower is more urgent; [`UNSET_PRIORITY`] when unknown.
    pub priority: i64,
    /// Free-form category ("code", "docs", "test", ...).
    pub task_type: Option<String>,
    /// Label set (no duplicates).
    pub labels: Vec<String>,
    /// Assignee, when one is recorded.
    pub assignee: Option<String>,
    /// Normalized short commit SHAs, deduped.
    pub commits: Vec<String>,
    /// Workflow attached to the task.
    pub workflow_name: Option<String>,
    /// Explicit ordering within a workflow.
    pub sequence_order: Option<i64>,
    /// Validation criteria text.
    pub validation_criteria: Option<String>,
    /// Validation outcome.
    pub validation_status: ValidationStatus,
    /// Why the task was escalated.
    pub escalation_reason: Option<String>,
    /// Session that closed the task.
    pub closed_in_session_id: Option<String>,
    /// Commit recorded at close.
    pub closed_commit_sha: Option<String>,
    /// Reason recorded at close.
    pub closed_reason: Option<String>,
    /// When the task was closed.
    pub closed_at: Option<DateTime<Utc>>,
    /// Per-project monotonic sequence number.
    pub seq_num: i64,
    /// Dotted ancestor path ("1.2.3").
    pub path_cache: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Human reference (`#N`).
    #[must_use]
    pub fn reference(&self) -> String {
        format!("#{}", self.seq_num)
    }

    /// One-line summary for prompt injection.
    #[must_use]
    pub fn to_brief(&self) -> TaskBrief {
        TaskBrief {
            id: self.id.clone(),
            reference: self.reference(),
            title: self.title.clone(),
            status: self.status,
            seq_num: self.seq_num,
            path_cache: self.path_cache.clone(),
        }
    }

    /// Typed id accessor.
    ///
    /// # Panics
    ///
    /// Never panics for rows written by this store; ids are minted as
    /// UUIDs.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.id.parse().ok()
    }
}

/// Compressed task summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBrief {
    /// Task id.
    pub id: String,
    /// `#N` reference.
    pub reference: String,
    /// Title.
    pub title: String,
    /// Status.
    pub status: TaskStatus,
    /// Per-project sequence number.
    pub seq_num: i64,
    /// Dotted path.
    pub path_cache: String,
}

/// Dependency edge kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// The dependency blocks the dependent.
    #[default]
    Blocks,
    /// Informational relation.
    Related,
}

impl DependencyType {
    /// Wire/database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Related => "related",
        }
    }

    /// Parse from the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocks" => Some(Self::Blocks),
            "related" => Some(Self::Related),
            _ => None,
        }
    }
}

/// A dependency row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    /// The dependent task.
    pub task_id: String,
    /// The task it depends on.
    pub depends_on_task_id: String,
    /// Edge kind.
    pub dep_type: DependencyType,
}

/// A comment on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskComment {
    /// Comment id (UUID string).
    pub id: String,
    /// Task the comment belongs to.
    pub task_id: String,
    /// Comment body.
    pub body: String,
    /// Optional author tag.
    pub author: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A session↔task link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTaskLink {
    /// Session side.
    pub session_id: String,
    /// Task side.
    pub task_id: String,
    /// Link action (`worked_on`, `closed`, ...).
    pub action: String,
    /// When the link was recorded.
    pub created_at: DateTime<Utc>,
}

/// Worktree lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    /// Present on disk and usable.
    Active,
    /// Released by its agent, kept on disk.
    Released,
    /// Removed from disk.
    Deleted,
}

impl WorktreeStatus {
    /// Wire/database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Deleted => "deleted",
        }
    }

    /// Parse from the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "released" => Some(Self::Released),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A registered git worktree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    /// Worktree row id (UUID string).
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Branch checked out in the worktree.
    pub branch_name: String,
    /// Absolute path on disk.
    pub worktree_path: String,
    /// Branch the worktree was created from.
    pub base_branch: String,
    /// Lifecycle status.
    pub status: WorktreeStatus,
    /// Task the worktree was created for.
    pub task_id: Option<String>,
    /// Agent session currently claiming the worktree.
    pub agent_session_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// A spawned-agent record inside [`WorkflowState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnedAgent {
    /// Task being worked.
    pub task_id: String,
    /// Agent run id.
    pub agent_id: String,
    /// Child session id.
    pub session_id: String,
    /// Worktree the agent runs in.
    pub worktree_id: String,
    /// Branch of that worktree.
    pub branch_name: String,
}

/// Per-session persistent workflow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Owning session.
    pub session_id: String,
    /// Workflow the state belongs to.
    pub workflow_name: Option<String>,
    /// Current step name.
    pub step: Option<String>,
    /// Free-form variables.
    pub variables: HashMap<String, Value>,
    /// Append-only observation log.
    pub observations: Vec<Value>,
    /// Orchestration slots currently reserved.
    pub reserved_slots: i64,
    /// Agents spawned on behalf of this session.
    pub spawned_agents: Vec<SpawnedAgent>,
    /// Whether `inject_context` has already fired for this session.
    pub context_injected: bool,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh empty state for a session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            workflow_name: None,
            step: None,
            variables: HashMap::new(),
            observations: Vec::new(),
            reserved_slots: 0,
            spawned_agents: Vec::new(),
            context_injected: false,
            updated_at: Utc::now(),
        }
    }
}

/// A project row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project id: a UUID string, or one of the reserved names.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Root path on disk, when known.
    pub path: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// The per-install personal project id.
pub const PERSONAL_PROJECT: &str = "_personal";
/// Hidden system project for orphaned rows.
pub const ORPHANED_PROJECT: &str = "_orphaned";
/// Hidden system project for migrated rows.
pub const MIGRATED_PROJECT: &str = "_migrated";

/// Projects that must never appear in listings or be deleted.
pub const HIDDEN_PROJECTS: [&str; 2] = [ORPHANED_PROJECT, MIGRATED_PROJECT];

/// MCP transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    /// Streamable HTTP.
    Http,
    /// WebSocket.
    Websocket,
    /// Child-process stdio.
    Stdio,
}

impl McpTransport {
    /// Wire/database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Websocket => "websocket",
            Self::Stdio => "stdio",
        }
    }

    /// Parse from the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "websocket" => Some(Self::Websocket),
            "stdio" => Some(Self::Stdio),
            _ => None,
        }
    }
}

impl fmt::Display for McpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique name within its project scope.
    pub name: String,
    /// Owning project; `None` for install-global servers.
    pub project_id: Option<String>,
    /// Transport kind.
    pub transport: McpTransport,
    /// Server URL (http/websocket).
    pub url: Option<String>,
    /// Command to spawn (stdio).
    pub command: Option<String>,
    /// Command arguments (stdio).
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for the child process (stdio).
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Extra HTTP headers (http/websocket).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether the server may be connected.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form description.
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A cached tool definition from a downstream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTool {
    /// Server the tool lives on.
    pub server_name: String,
    /// Project scope of the server config.
    pub project_id: Option<String>,
    /// Tool name.
    pub tool_name: String,
    /// Tool description.
    pub description: Option<String>,
    /// Full input schema.
    pub input_schema: Value,
    /// Hash of the schema, used to diff refreshes.
    pub schema_hash: String,
}

/// Per-tool call metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetric {
    /// Calls recorded.
    pub call_count: i64,
    /// Successful calls.
    pub success_count: i64,
    /// Sum of call latencies.
    pub total_latency_ms: i64,
    /// Most recent call time.
    pub last_called_at: Option<DateTime<Utc>>,
}

/// Secret categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretCategory {
    /// Uncategorized.
    #[default]
    General,
    /// LLM provider credentials.
    Llm,
    /// MCP server credentials.
    Mcp,
}

impl SecretCategory {
    /// Wire/database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Llm => "llm",
            Self::Mcp => "mcp",
        }
    }

    /// Parse from the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(Self::General),
            "llm" => Some(Self::Llm),
            "mcp" => Some(Self::Mcp),
            _ => None,
        }
    }
}

/// Secret metadata (the value never leaves [`crate::secrets`] decrypted
/// except through `get`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretInfo {
    /// Secret name.
    pub name: String,
    /// Category.
    pub category: SecretCategory,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips() {
        for status in [
            TaskStatus::Open,
            TaskStatus::InProgress,
            TaskStatus::Escalated,
            TaskStatus::Closed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_session_status_round_trips() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Paused,
            SessionStatus::HandoffReady,
            SessionStatus::Expired,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_workflow_state_new_is_empty() {
        let state = WorkflowState::new("s1");
        assert_eq!(state.reserved_slots, 0);
        assert!(state.variables.is_empty());
        assert!(!state.context_injected);
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(McpTransport::Stdio.to_string(), "stdio");
        assert_eq!(McpTransport::parse("websocket"), Some(McpTransport::Websocket));
    }
}
