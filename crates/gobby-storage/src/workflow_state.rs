//! Per-session workflow state.
//!
//! Everything here is a single-row read-modify-write under the store's
//! connection lock, inside one transaction — concurrent hooks on the
//! same session cannot lose updates, and the slot accounting invariant
//! `in_use + reserved <= max_concurrent` holds after every commit.

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::HashMap;

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{SpawnedAgent, WorkflowState};
use crate::row;

/// Atomic accessor over workflow-state rows.
#[derive(Debug, Clone)]
pub struct WorkflowStateStore {
    db: Database,
}

impl WorkflowStateStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch the state for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get(&self, session_id: &str) -> StorageResult<Option<WorkflowState>> {
        self.db.with_conn(|conn| Self::fetch(conn, session_id))
    }

    /// Fetch-or-default.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_or_default(&self, session_id: &str) -> StorageResult<WorkflowState> {
        Ok(self
            .get(session_id)?
            .unwrap_or_else(|| WorkflowState::new(session_id)))
    }

    /// Set the current workflow/step.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn set_step(
        &self,
        session_id: &str,
        workflow_name: Option<&str>,
        step: Option<&str>,
    ) -> StorageResult<WorkflowState> {
        self.mutate(session_id, |state| {
            state.workflow_name = workflow_name.map(str::to_string);
            state.step = step.map(str::to_string);
        })
    }

    /// Merge variables into the state.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn update_variables(
        &self,
        session_id: &str,
        variables: &HashMap<String, Value>,
    ) -> StorageResult<WorkflowState> {
        self.mutate(session_id, |state| {
            for (key, value) in variables {
                state.variables.insert(key.clone(), value.clone());
            }
        })
    }

    /// Append one observation (append-only log).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn append_observation(
        &self,
        session_id: &str,
        observation: Value,
    ) -> StorageResult<WorkflowState> {
        self.mutate(session_id, |state| {
            state.observations.push(observation);
        })
    }

    /// Mark that context has been injected for this session.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn set_context_injected(&self, session_id: &str, injected: bool) -> StorageResult<()> {
        self.mutate(session_id, |state| {
            state.context_injected = injected;
        })?;
        Ok(())
    }

    /// Atomically reserve orchestration slots.
    ///
    /// Reads the current usage (`reserved_slots` plus spawned agents
    /// whose worktrees are still claimed), grants
    /// `min(requested, max_concurrent - in_use)` and persists the new
    /// reservation count — all in one transaction, so two overlapping
    /// orchestrate calls can never over-grant.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn check_and_reserve_slots(
        &self,
        session_id: &str,
        max_concurrent: i64,
        requested: i64,
    ) -> StorageResult<i64> {
        self.db.with_transaction(|conn| {
            let mut state = Self::fetch(conn, session_id)?
                .unwrap_or_else(|| WorkflowState::new(session_id));

            let running = Self::running_count(conn, &state.spawned_agents)?;
            let in_use = state.reserved_slots + running;
            let available = (max_concurrent - in_use).max(0);
            let granted = requested.min(available).max(0);

            state.reserved_slots += granted;
            Self::store(conn, &state)?;
            Ok((granted, Vec::new()))
        })
    }

    /// Release `count` reserved slots (floored at zero).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn release_reserved_slots(&self, session_id: &str, count: i64) -> StorageResult<()> {
        self.mutate(session_id, |state| {
            state.reserved_slots = (state.reserved_slots - count).max(0);
        })?;
        Ok(())
    }

    /// Append spawned-agent records atomically.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn append_spawned_agents(
        &self,
        session_id: &str,
        agents: &[SpawnedAgent],
    ) -> StorageResult<WorkflowState> {
        self.mutate(session_id, |state| {
            state.spawned_agents.extend(agents.iter().cloned());
        })
    }

    /// Zero every reservation in the store.
    ///
    /// Run once at daemon startup: a reservation only means something
    /// inside a live orchestrate call, so anything that survived a
    /// restart is leaked.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn reset_reserved_slots(&self) -> StorageResult<u64> {
        self.db.with_transaction(|conn| {
            let cleared = conn.execute(
                "UPDATE workflow_states SET reserved_slots = 0, updated_at = ?1
                 WHERE reserved_slots != 0",
                params![row::now()],
            )?;
            if cleared > 0 {
                tracing::warn!(rows = cleared, "zeroed leaked slot reservations");
            }
            Ok((cleared as u64, Vec::new()))
        })
    }

    fn mutate(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut WorkflowState),
    ) -> StorageResult<WorkflowState> {
        self.db.with_transaction(|conn| {
            let mut state = Self::fetch(conn, session_id)?
                .unwrap_or_else(|| WorkflowState::new(session_id));
            f(&mut state);
            Self::store(conn, &state)?;
            Ok((
                state,
                vec![ChangeEvent {
                    entity: "workflow_state",
                    op: "updated",
                    id: session_id.to_string(),
                }],
            ))
        })
    }

    /// How many spawned agents still hold their worktree claim.
    fn running_count(conn: &Connection, agents: &[SpawnedAgent]) -> StorageResult<i64> {
        let mut running = 0;
        for agent in agents {
            let claimed: i64 = conn.query_row(
                "SELECT count(*) FROM worktrees
                 WHERE id = ?1 AND agent_session_id IS NOT NULL",
                params![agent.worktree_id],
                |r| r.get(0),
            )?;
            running += claimed;
        }
        Ok(running)
    }

    fn store(conn: &Connection, state: &WorkflowState) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO workflow_states
                 (session_id, workflow_name, step, variables, observations, reserved_slots,
                  spawned_agents, context_injected, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(session_id) DO UPDATE SET
                 workflow_name = excluded.workflow_name,
                 step = excluded.step,
                 variables = excluded.variables,
                 observations = excluded.observations,
                 reserved_slots = excluded.reserved_slots,
                 spawned_agents = excluded.spawned_agents,
                 context_injected = excluded.context_injected,
                 updated_at = excluded.updated_at",
            params![
                state.session_id,
                state.workflow_name,
                state.step,
                serde_json::to_string(&state.variables)?,
                serde_json::to_string(&state.observations)?,
                state.reserved_slots,
                serde_json::to_string(&state.spawned_agents)?,
                i64::from(state.context_injected),
                row::now()
            ],
        )?;
        Ok(())
    }

    fn fetch(conn: &Connection, session_id: &str) -> StorageResult<Option<WorkflowState>> {
        let state = conn
            .query_row(
                "SELECT session_id, workflow_name, step, variables, observations,
                        reserved_slots, spawned_agents, context_injected, updated_at
                 FROM workflow_states WHERE session_id = ?1",
                params![session_id],
                |r| {
                    Ok(WorkflowState {
                        session_id: r.get("session_id")?,
                        workflow_name: r.get("workflow_name")?,
                        step: r.get("step")?,
                        variables: row::json_column(r, "variables")?,
                        observations: row::json_column(r, "observations")?,
                        reserved_slots: r.get("reserved_slots")?,
                        spawned_agents: row::json_column(r, "spawned_agents")?,
                        context_injected: r.get::<_, i64>("context_injected")? != 0,
                        updated_at: row::ts_column(r, "updated_at")?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::ProjectStore;
    use crate::sessions::{RegisterSession, SessionStore};
    use crate::worktrees::{CreateWorktree, WorktreeStore};
    use gobby_core::SessionSource;

    fn fixture() -> (WorkflowStateStore, WorktreeStore, String) {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();
        projects.create("proj", "proj", None).unwrap();
        let sessions = SessionStore::new(db.clone());
        let session = sessions
            .register(&RegisterSession {
                external_id: "ext",
                source: SessionSource::Claude,
                machine_id: "m",
                project_id: "proj",
                parent_session_id: None,
                jsonl_path: None,
            })
            .unwrap();
        (
            WorkflowStateStore::new(db.clone()),
            WorktreeStore::new(db),
            session.id,
        )
    }

    #[test]
    fn test_reserve_caps_at_max_concurrent() {
        let (states, _worktrees, session_id) = fixture();
        let granted = states.check_and_reserve_slots(&session_id, 2, 5).unwrap();
        assert_eq!(granted, 2);

        // A second call while the reservation is held gets nothing.
        let granted = states.check_and_reserve_slots(&session_id, 2, 5).unwrap();
        assert_eq!(granted, 0);

        states.release_reserved_slots(&session_id, 2).unwrap();
        let granted = states.check_and_reserve_slots(&session_id, 2, 1).unwrap();
        assert_eq!(granted, 1);
    }

    #[test]
    fn test_running_agents_count_against_capacity() {
        let (states, worktrees, session_id) = fixture();
        let worktree = worktrees
            .create(&CreateWorktree {
                project_id: "proj",
                branch_name: "task/a",
                worktree_path: "/tmp/wt/a",
                base_branch: "main",
                task_id: None,
            })
            .unwrap();
        worktrees.claim(&worktree.id, "child-session").unwrap();

        states
            .append_spawned_agents(
                &session_id,
                &[SpawnedAgent {
                    task_id: "t".into(),
                    agent_id: "a".into(),
                    session_id: "child-session".into(),
                    worktree_id: worktree.id.clone(),
                    branch_name: "task/a".into(),
                }],
            )
            .unwrap();

        // One running agent leaves one slot at capacity 2.
        let granted = states.check_and_reserve_slots(&session_id, 2, 5).unwrap();
        assert_eq!(granted, 1);

        // Release of the worktree frees the slot.
        states.release_reserved_slots(&session_id, 1).unwrap();
        worktrees.release(&worktree.id).unwrap();
        let granted = states.check_and_reserve_slots(&session_id, 2, 5).unwrap();
        assert_eq!(granted, 2);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let (states, _worktrees, session_id) = fixture();
        states.release_reserved_slots(&session_id, 10).unwrap();
        let state = states.get(&session_id).unwrap().unwrap();
        assert_eq!(state.reserved_slots, 0);
    }

    #[test]
    fn test_variables_merge_and_observations_append() {
        let (states, _worktrees, session_id) = fixture();
        let mut vars = HashMap::new();
        vars.insert("coding_provider".to_string(), serde_json::json!("claude"));
        states.update_variables(&session_id, &vars).unwrap();

        let mut more = HashMap::new();
        more.insert("terminal".to_string(), serde_json::json!("ghostty"));
        let state = states.update_variables(&session_id, &more).unwrap();
        assert_eq!(state.variables.len(), 2);

        states
            .append_observation(&session_id, serde_json::json!({"note": "one"}))
            .unwrap();
        let state = states
            .append_observation(&session_id, serde_json::json!({"note": "two"}))
            .unwrap();
        assert_eq!(state.observations.len(), 2);
    }

    #[test]
    fn test_reset_reserved_slots() {
        let (states, _worktrees, session_id) = fixture();
        states.check_and_reserve_slots(&session_id, 3, 3).unwrap();
        let cleared = states.reset_reserved_slots().unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(states.get(&session_id).unwrap().unwrap().reserved_slots, 0);
        // Idempotent.
        assert_eq!(states.reset_reserved_slots().unwrap(), 0);
    }

    #[test]
    fn test_state_cascades_with_session() {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();
        projects.create("proj", "proj", None).unwrap();
        let sessions = SessionStore::new(db.clone());
        let session = sessions
            .register(&RegisterSession {
                external_id: "ext",
                source: SessionSource::Claude,
                machine_id: "m",
                project_id: "proj",
                parent_session_id: None,
                jsonl_path: None,
            })
            .unwrap();
        let states = WorkflowStateStore::new(db.clone());
        states.set_step(&session.id, Some("wf"), Some("s1")).unwrap();

        db.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session.id])?;
            Ok(())
        })
        .unwrap();
        assert!(states.get(&session.id).unwrap().is_none());
    }
}
