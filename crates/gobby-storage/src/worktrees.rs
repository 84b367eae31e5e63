//! Worktree registry.
//!
//! The store tracks which git worktrees exist, which branch they carry,
//! and which agent session currently owns them. Claiming is atomic: the
//! UPDATE only matches an unclaimed active row, so a double-claim fails
//! instead of silently stealing.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{Worktree, WorktreeStatus};
use crate::row;

/// Arguments for [`WorktreeStore::create`].
#[derive(Debug, Clone)]
pub struct CreateWorktree<'a> {
    /// Owning project.
    pub project_id: &'a str,
    /// Branch checked out in the worktree.
    pub branch_name: &'a str,
    /// Absolute path on disk.
    pub worktree_path: &'a str,
    /// Branch the worktree was created from.
    pub base_branch: &'a str,
    /// Task the worktree serves, if any.
    pub task_id: Option<&'a str>,
}

/// CRUD and claim/release over worktree rows.
#[derive(Debug, Clone)]
pub struct WorktreeStore {
    db: Database,
}

impl WorktreeStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a worktree. At most one *active* worktree may exist per
    /// `(project, branch)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the branch already has an
    /// active worktree.
    pub fn create(&self, args: &CreateWorktree<'_>) -> StorageResult<Worktree> {
        self.db.with_transaction(|conn| {
            let id = Uuid::new_v4().to_string();
            let now = row::now();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO worktrees
                     (id, project_id, branch_name, worktree_path, base_branch, status,
                      task_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?7)",
                params![
                    id,
                    args.project_id,
                    args.branch_name,
                    args.worktree_path,
                    args.base_branch,
                    args.task_id,
                    now
                ],
            )?;
            if inserted == 0 {
                return Err(StorageError::Conflict(format!(
                    "branch '{}' already has an active worktree",
                    args.branch_name
                )));
            }
            let worktree = Self::fetch(conn, &id)?
                .ok_or_else(|| StorageError::not_found("worktree", &id))?;
            Ok((
                worktree,
                vec![ChangeEvent {
                    entity: "worktree",
                    op: "created",
                    id,
                }],
            ))
        })
    }

    /// Fetch by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get(&self, id: &str) -> StorageResult<Option<Worktree>> {
        self.db.with_conn(|conn| Self::fetch(conn, id))
    }

    /// Active worktree registered for a task.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_by_task(&self, task_id: &str) -> StorageResult<Option<Worktree>> {
        self.db.with_conn(|conn| {
            let worktree = conn
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM worktrees
                         WHERE task_id = ?1 AND status = 'active'"
                    ),
                    params![task_id],
                    Self::map_row,
                )
                .optional()?;
            Ok(worktree)
        })
    }

    /// Active worktree for a branch.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_by_branch(
        &self,
        project_id: &str,
        branch_name: &str,
    ) -> StorageResult<Option<Worktree>> {
        self.db.with_conn(|conn| {
            let worktree = conn
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM worktrees
                         WHERE project_id = ?1 AND branch_name = ?2 AND status = 'active'"
                    ),
                    params![project_id, branch_name],
                    Self::map_row,
                )
                .optional()?;
            Ok(worktree)
        })
    }

    /// List worktrees for a project, optionally by status.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list(
        &self,
        project_id: &str,
        status: Option<WorktreeStatus>,
    ) -> StorageResult<Vec<Worktree>> {
        self.db.with_conn(|conn| {
            let mut worktrees = Vec::new();
            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM worktrees
                         WHERE project_id = ?1 AND status = ?2 ORDER BY created_at"
                    ))?;
                    let rows =
                        stmt.query_map(params![project_id, status.as_str()], Self::map_row)?;
                    for worktree in rows {
                        worktrees.push(worktree?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM worktrees
                         WHERE project_id = ?1 ORDER BY created_at"
                    ))?;
                    let rows = stmt.query_map(params![project_id], Self::map_row)?;
                    for worktree in rows {
                        worktrees.push(worktree?);
                    }
                }
            }
            Ok(worktrees)
        })
    }

    /// Link a task to an existing worktree.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown worktrees.
    pub fn set_task(&self, id: &str, task_id: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let updated = conn.execute(
                "UPDATE worktrees SET task_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, task_id, row::now()],
            )?;
            if updated == 0 {
                return Err(StorageError::not_found("worktree", id));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "worktree",
                    op: "updated",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Claim a worktree for an agent session. Fails when the worktree is
    /// already claimed or not active.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] on a lost race and
    /// [`StorageError::NotFound`] for unknown ids.
    pub fn claim(&self, id: &str, agent_session_id: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let updated = conn.execute(
                "UPDATE worktrees SET agent_session_id = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'active' AND agent_session_id IS NULL",
                params![id, agent_session_id, row::now()],
            )?;
            if updated == 0 {
                return match Self::fetch(conn, id)? {
                    Some(worktree) => Err(StorageError::Conflict(format!(
                        "worktree {id} already claimed by {}",
                        worktree.agent_session_id.as_deref().unwrap_or("(released)")
                    ))),
                    None => Err(StorageError::not_found("worktree", id)),
                };
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "worktree",
                    op: "claimed",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Release a worktree (clears the claiming session).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown ids.
    pub fn release(&self, id: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let updated = conn.execute(
                "UPDATE worktrees SET agent_session_id = NULL, updated_at = ?2 WHERE id = ?1",
                params![id, row::now()],
            )?;
            if updated == 0 {
                return Err(StorageError::not_found("worktree", id));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "worktree",
                    op: "released",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Delete a worktree row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown ids.
    pub fn delete(&self, id: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let deleted = conn.execute("DELETE FROM worktrees WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(StorageError::not_found("worktree", id));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "worktree",
                    op: "deleted",
                    id: id.to_string(),
                }],
            ))
        })
    }

    fn fetch(conn: &Connection, id: &str) -> StorageResult<Option<Worktree>> {
        let worktree = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM worktrees WHERE id = ?1"),
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(worktree)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Worktree> {
        let status: String = row.get("status")?;
        Ok(Worktree {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            branch_name: row.get("branch_name")?,
            worktree_path: row.get("worktree_path")?,
            base_branch: row.get("base_branch")?,
            status: WorktreeStatus::parse(&status).unwrap_or(WorktreeStatus::Active),
            task_id: row.get("task_id")?,
            agent_session_id: row.get("agent_session_id")?,
            created_at: row::ts_column(row, "created_at")?,
            updated_at: row::ts_column(row, "updated_at")?,
        })
    }
}

const COLUMNS: &str = "id, project_id, branch_name, worktree_path, base_branch, status, \
                       task_id, agent_session_id, created_at, updated_at";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::ProjectStore;

    fn store() -> WorktreeStore {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();
        projects.create("proj", "proj", None).unwrap();
        WorktreeStore::new(db)
    }

    fn create(store: &WorktreeStore, branch: &str) -> Worktree {
        store
            .create(&CreateWorktree {
                project_id: "proj",
                branch_name: branch,
                worktree_path: &format!("/tmp/wt/{branch}"),
                base_branch: "main",
                task_id: None,
            })
            .unwrap()
    }

    #[test]
    fn test_one_active_worktree_per_branch() {
        let store = store();
        create(&store, "task/a");
        assert!(matches!(
            store.create(&CreateWorktree {
                project_id: "proj",
                branch_name: "task/a",
                worktree_path: "/tmp/wt/other",
                base_branch: "main",
                task_id: None,
            }),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn test_claim_is_atomic() {
        let store = store();
        let worktree = create(&store, "task/a");
        store.claim(&worktree.id, "session-1").unwrap();
        // Second claim fails; first claim survives.
        assert!(matches!(
            store.claim(&worktree.id, "session-2"),
            Err(StorageError::Conflict(_))
        ));
        let fetched = store.get(&worktree.id).unwrap().unwrap();
        assert_eq!(fetched.agent_session_id.as_deref(), Some("session-1"));
    }

    #[test]
    fn test_release_then_reclaim() {
        let store = store();
        let worktree = create(&store, "task/a");
        store.claim(&worktree.id, "session-1").unwrap();
        store.release(&worktree.id).unwrap();
        store.claim(&worktree.id, "session-2").unwrap();
        let fetched = store.get(&worktree.id).unwrap().unwrap();
        assert_eq!(fetched.agent_session_id.as_deref(), Some("session-2"));
    }

    #[test]
    fn test_lookup_by_task_and_branch() {
        let store = store();
        let worktree = create(&store, "task/a");
        store.set_task(&worktree.id, &worktree.id).ok();

        assert!(store.get_by_branch("proj", "task/a").unwrap().is_some());
        assert!(store.get_by_branch("proj", "task/b").unwrap().is_none());
    }

    #[test]
    fn test_delete_frees_branch() {
        let store = store();
        let worktree = create(&store, "task/a");
        store.delete(&worktree.id).unwrap();
        // The branch slot is free again.
        create(&store, "task/a");
    }

    #[test]
    fn test_list_filters_by_status() {
        let store = store();
        create(&store, "task/a");
        create(&store, "task/b");
        let active = store.list("proj", Some(WorktreeStatus::Active)).unwrap();
        assert_eq!(active.len(), 2);
        let released = store.list("proj", Some(WorktreeStatus::Released)).unwrap();
        assert!(released.is_empty());
    }
}
