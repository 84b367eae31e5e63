//! Session↔task links.
//!
//! The most recent `worked_on` link is how dispatch resolves the active
//! task for a session.

use rusqlite::params;

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{SessionTaskLink, Task};
use crate::row;
use crate::tasks::TaskStore;

/// Link action recorded when a session starts focusing a task.
pub const ACTION_WORKED_ON: &str = "worked_on";

/// CRUD over session↔task links.
#[derive(Debug, Clone)]
pub struct SessionTaskStore {
    db: Database,
}

impl SessionTaskStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a link; re-linking refreshes the timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure (including FK violations for
    /// unknown sessions/tasks).
    pub fn link(&self, session_id: &str, task_id: &str, action: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session_tasks (session_id, task_id, action, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, task_id, action, row::now()],
            )?;
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "session_task",
                    op: "created",
                    id: format!("{session_id}:{task_id}"),
                }],
            ))
        })
    }

    /// Remove a link.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the link does not exist.
    pub fn unlink(&self, session_id: &str, task_id: &str, action: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let deleted = conn.execute(
                "DELETE FROM session_tasks
                 WHERE session_id = ?1 AND task_id = ?2 AND action = ?3",
                params![session_id, task_id, action],
            )?;
            if deleted == 0 {
                return Err(StorageError::not_found(
                    "session_task",
                    format!("{session_id}:{task_id}"),
                ));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "session_task",
                    op: "deleted",
                    id: format!("{session_id}:{task_id}"),
                }],
            ))
        })
    }

    /// Links for a session, newest first, with their tasks.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn session_tasks(&self, session_id: &str) -> StorageResult<Vec<(SessionTaskLink, Task)>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT st.session_id, st.task_id, st.action, st.created_at
                 FROM session_tasks st
                 WHERE st.session_id = ?1
                 ORDER BY st.created_at DESC",
            )?;
            let links = stmt.query_map(params![session_id], |r| {
                Ok(SessionTaskLink {
                    session_id: r.get(0)?,
                    task_id: r.get(1)?,
                    action: r.get(2)?,
                    created_at: row::ts_column(r, "created_at")?,
                })
            })?;

            let mut pairs = Vec::new();
            for link in links {
                let link = link?;
                if let Some(task) = TaskStore::fetch(conn, &link.task_id)? {
                    pairs.push((link, task));
                }
            }
            Ok(pairs)
        })
    }

    /// The most recently `worked_on` task for a session.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn active_task(&self, session_id: &str) -> StorageResult<Option<Task>> {
        Ok(self
            .session_tasks(session_id)?
            .into_iter()
            .find(|(link, _)| link.action == ACTION_WORKED_ON)
            .map(|(_, task)| task))
    }
}
