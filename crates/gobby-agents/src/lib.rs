//! Agent orchestration for the Gobby daemon.
//!
//! The orchestrator turns ready subtasks into running child agents:
//! atomic slot reservation against the parent session's workflow state,
//! one git worktree per task with rollback on failure, prompt
//! construction, spawn-depth control, and mode-specific process
//! spawners. Git and spawners sit behind traits so everything here is
//! testable without touching a repository or starting a process.

pub mod git;
pub mod orchestrator;
pub mod prompt;
pub mod runner;
pub mod spawn;

pub use git::{GitCli, GitError, GitResult, GitStatusCli, RepoCommitResolver, WorktreeGit};
pub use orchestrator::{
    AgentOrchestrator, OrchestrateRequest, OrchestratorDefaults, worktree_base_dir,
};
pub use prompt::build_task_prompt;
pub use runner::{AgentRunner, PreparedRun};
pub use spawn::{
    HeadlessSpawner, SpawnMode, SpawnOutcome, SpawnRequest, Spawner, SpawnerSet, TerminalSpawner,
};
