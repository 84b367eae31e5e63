//! Embedded SQLite store for the Gobby daemon.
//!
//! One connection, strict foreign keys, transactional writes, and
//! post-commit change notification. Each entity gets its own store type
//! over the shared [`Database`] handle:
//!
//! - [`projects::ProjectStore`] — projects incl. the reserved system rows
//! - [`sessions::SessionStore`] — CLI sessions and handoff lifecycle
//! - [`tasks::TaskStore`] — task tree, lifecycle, commits, comments
//! - [`dependencies::DependencyStore`] — the dependency DAG
//! - [`session_tasks::SessionTaskStore`] — session↔task links
//! - [`worktrees::WorktreeStore`] — worktree registry with atomic claims
//! - [`workflow_state::WorkflowStateStore`] — per-session workflow state
//!   and orchestration slot accounting
//! - [`mcp::McpStore`] — MCP server configs, tool caches, call metrics
//! - [`secrets::SecretStore`] — machine-keyed encrypted secrets

pub mod database;
pub mod dependencies;
pub mod error;
pub mod mcp;
mod migrations;
pub mod models;
pub mod projects;
mod row;
pub mod secrets;
pub mod session_tasks;
pub mod sessions;
pub mod tasks;
pub mod workflow_state;
pub mod worktrees;

pub use database::{ChangeEvent, Database};
pub use error::{StorageError, StorageResult};
pub use models::{
    CachedTool, DependencyType, McpServerConfig, McpTransport, Project, SecretCategory,
    SecretInfo, Session, SessionStatus, SessionTaskLink, SpawnedAgent, Task, TaskBrief,
    TaskComment, TaskDependency, TaskStatus, ToolMetric, ValidationStatus, WorkflowState,
    Worktree, WorktreeStatus,
};
