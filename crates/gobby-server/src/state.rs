//! Shared handler state.
//!
//! One explicit context value instead of globals: every route handler
//! receives [`DaemonContext`] through axum's `State` extractor.

use std::path::PathBuf;
use std::sync::Arc;

use gobby_hooks::HookDispatcher;
use gobby_llm::LlmProvider;
use gobby_mcp::McpClientManager;
use gobby_storage::Database;
use gobby_storage::dependencies::DependencyStore;
use gobby_storage::projects::ProjectStore;
use gobby_storage::secrets::SecretStore;
use gobby_storage::sessions::SessionStore;
use gobby_storage::tasks::{CommitResolver, TaskStore};

/// Everything the HTTP boundary needs.
#[derive(Clone)]
pub struct DaemonContext {
    /// The hook dispatcher; `None` until the daemon finishes wiring,
    /// during which `/hooks/execute` answers 503.
    pub dispatcher: Option<Arc<HookDispatcher>>,
    /// The store handle (used by a few cross-store operations).
    pub db: Database,
    /// Task store.
    pub tasks: TaskStore,
    /// Dependency store.
    pub dependencies: DependencyStore,
    /// Project store.
    pub projects: ProjectStore,
    /// Session store.
    pub sessions: SessionStore,
    /// Secret store.
    pub secrets: SecretStore,
    /// MCP client manager.
    pub mcp: Arc<McpClientManager>,
    /// LLM provider for recommend/search features.
    pub llm: Arc<dyn LlmProvider>,
    /// Home-dir override for config endpoints (tests use a temp dir).
    pub config_home: Option<PathBuf>,
}

impl DaemonContext {
    /// Commit resolver for a project: resolves against the project's
    /// registered path, or rejects every SHA when no path is known.
    #[must_use]
    pub fn commit_resolver(&self, project_id: &str) -> Box<dyn CommitResolver + Send + Sync> {
        let path = self
            .projects
            .get(project_id)
            .ok()
            .flatten()
            .and_then(|p| p.path);
        match path {
            Some(path) => Box::new(gobby_agents::RepoCommitResolver::new(path)),
            None => Box::new(|_: &str| Option::<String>::None),
        }
    }
}

impl std::fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonContext")
            .field("dispatcher", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory context assembly for route tests.

    use super::*;
    use gobby_hooks::{HealthMonitor, HookBroadcaster};
    use gobby_llm::DisabledProvider;
    use gobby_mcp::ManagerConfig;
    use gobby_storage::mcp::McpStore;
    use gobby_storage::session_tasks::SessionTaskStore;
    use gobby_storage::workflow_state::WorkflowStateStore;
    use gobby_storage::worktrees::WorktreeStore;
    use gobby_workflows::{ActionExecutor, WorkflowEngine, WorkflowLoader};
    use tempfile::TempDir;

    /// A fully wired in-memory context plus the temp home keeping it
    /// alive.
    pub(crate) fn context() -> (DaemonContext, TempDir) {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();

        let home = TempDir::new().unwrap();
        let sessions = SessionStore::new(db.clone());
        let executor = ActionExecutor::new(
            sessions.clone(),
            SessionTaskStore::new(db.clone()),
            WorktreeStore::new(db.clone()),
            WorkflowStateStore::new(db.clone()),
            Arc::new(DisabledProvider),
        )
        .with_summary_dir(home.path().join("summaries"));
        let engine = WorkflowEngine::new(
            WorkflowLoader::with_home(home.path()),
            WorkflowStateStore::new(db.clone()),
            executor,
        );
        let dispatcher = HookDispatcher::new(
            sessions.clone(),
            SessionTaskStore::new(db.clone()),
            projects.clone(),
            Arc::new(engine),
            HealthMonitor::always_ready(),
            HookBroadcaster::new(),
        );

        let mcp = McpClientManager::new(
            Vec::new(),
            ManagerConfig::default(),
            Some(McpStore::new(db.clone())),
            None,
        );

        let context = DaemonContext {
            dispatcher: Some(Arc::new(dispatcher)),
            db: db.clone(),
            tasks: TaskStore::new(db.clone()),
            dependencies: DependencyStore::new(db.clone()),
            projects,
            sessions,
            secrets: SecretStore::with_key_material(db.clone(), "test-machine"),
            mcp,
            llm: Arc::new(DisabledProvider),
            config_home: Some(home.path().to_path_buf()),
        };
        (context, home)
    }
}
