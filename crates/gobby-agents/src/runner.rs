//! Agent run preparation and spawn-depth control.

use tracing::debug;
use uuid::Uuid;

use gobby_core::SessionSource;
use gobby_storage::models::Session;
use gobby_storage::sessions::{RegisterSession, SessionStore};

/// Prepares child sessions for spawned agents and enforces the spawn
/// depth cap.
#[derive(Debug, Clone)]
pub struct AgentRunner {
    sessions: SessionStore,
    max_agent_depth: u32,
}

/// A prepared child session plus its run id.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    /// The child agent's session.
    pub session: Session,
    /// Run id recorded in workflow state and handed to the spawner.
    pub run_id: String,
    /// Depth of the child in the spawn tree.
    pub depth: u32,
}

impl AgentRunner {
    /// Runner over the session store.
    #[must_use]
    pub fn new(sessions: SessionStore, max_agent_depth: u32) -> Self {
        Self {
            sessions,
            max_agent_depth,
        }
    }

    /// Configured maximum depth.
    #[must_use]
    pub fn max_agent_depth(&self) -> u32 {
        self.max_agent_depth
    }

    /// Depth of a session in the spawn tree (root sessions are 0),
    /// walking the parent chain. Broken chains count as roots.
    #[must_use]
    pub fn session_depth(&self, session_id: &str) -> u32 {
        let mut depth = 0;
        let mut current = session_id.to_string();
        // Bounded walk; a cycle in parent links (impossible via the
        // store, conceivable via hand-edited rows) must not hang us.
        for _ in 0..64 {
            match self.sessions.get(&current) {
                Ok(Some(session)) => match session.parent_session_id {
                    Some(parent) => {
                        depth += 1;
                        current = parent;
                    }
                    None => break,
                },
                _ => break,
            }
        }
        depth
    }

    /// Whether `parent_session_id` may spawn another child.
    /// Returns `(allowed, reason, child_depth)`.
    #[must_use]
    pub fn can_spawn(&self, parent_session_id: &str) -> (bool, Option<String>, u32) {
        let child_depth = self.session_depth(parent_session_id) + 1;
        if child_depth > self.max_agent_depth {
            (
                false,
                Some(format!(
                    "max agent depth reached ({child_depth} > {})",
                    self.max_agent_depth
                )),
                child_depth,
            )
        } else {
            (true, None, child_depth)
        }
    }

    /// Register a child session and mint a run id for one agent.
    ///
    /// # Errors
    ///
    /// Returns the storage error message when registration fails.
    pub fn prepare_run(
        &self,
        parent_session_id: &str,
        project_id: &str,
        machine_id: &str,
        source: SessionSource,
    ) -> Result<PreparedRun, String> {
        let external_id = format!("agent-{}", Uuid::new_v4());
        let session = self
            .sessions
            .register(&RegisterSession {
                external_id: &external_id,
                source,
                machine_id,
                project_id,
                parent_session_id: Some(parent_session_id),
                jsonl_path: None,
            })
            .map_err(|e| format!("failed to register agent session: {e}"))?;

        let run_id = Uuid::new_v4().to_string();
        let depth = self.session_depth(&session.id);
        debug!(session = %session.id, run = %run_id, depth, "prepared agent run");
        Ok(PreparedRun {
            session,
            run_id,
            depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobby_storage::Database;
    use gobby_storage::projects::ProjectStore;

    fn runner(max_depth: u32) -> AgentRunner {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();
        projects.create("proj", "proj", None).unwrap();
        AgentRunner::new(SessionStore::new(db), max_depth)
    }

    fn root(runner: &AgentRunner) -> Session {
        runner
            .sessions
            .register(&RegisterSession {
                external_id: "root",
                source: SessionSource::Claude,
                machine_id: "m",
                project_id: "proj",
                parent_session_id: None,
                jsonl_path: None,
            })
            .unwrap()
    }

    #[test]
    fn test_depth_counts_parent_chain() {
        let runner = runner(3);
        let root = root(&runner);
        assert_eq!(runner.session_depth(&root.id), 0);

        let child = runner
            .prepare_run(&root.id, "proj", "m", SessionSource::Claude)
            .unwrap();
        assert_eq!(child.depth, 1);

        let grandchild = runner
            .prepare_run(&child.session.id, "proj", "m", SessionSource::Claude)
            .unwrap();
        assert_eq!(grandchild.depth, 2);
    }

    #[test]
    fn test_can_spawn_enforces_max_depth() {
        let runner = runner(2);
        let root = root(&runner);
        let (allowed, _, _) = runner.can_spawn(&root.id);
        assert!(allowed);

        let child = runner
            .prepare_run(&root.id, "proj", "m", SessionSource::Claude)
            .unwrap();
        let (allowed, _, _) = runner.can_spawn(&child.session.id);
        assert!(allowed);

        let grandchild = runner
            .prepare_run(&child.session.id, "proj", "m", SessionSource::Claude)
            .unwrap();
        let (allowed, reason, depth) = runner.can_spawn(&grandchild.session.id);
        assert!(!allowed);
        assert_eq!(depth, 3);
        assert!(reason.unwrap().contains("max agent depth"));
    }

    #[test]
    fn test_unknown_parent_counts_as_root() {
        let runner = runner(3);
        assert_eq!(runner.session_depth("missing"), 0);
        let (allowed, _, depth) = runner.can_spawn("missing");
        assert!(allowed);
        assert_eq!(depth, 1);
    }
}
