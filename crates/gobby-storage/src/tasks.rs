//! Task store.
//!
//! Tasks form a tree (`parent_task_id`) with a per-project monotonic
//! `seq_num` and a dotted `path_cache` ("1.2.3") maintained on every
//! reparent. Dependency edges live in [`crate::dependencies`]; the
//! ready/blocked queries here treat a blocker that is a *descendant* of
//! the task as non-blocking — children gate closing, not starting.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashSet;
use uuid::Uuid;

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{Task, TaskComment, TaskStatus, UNSET_PRIORITY, ValidationStatus};
use crate::row;

/// Bounded retries when a freshly minted task id collides.
const MAX_ID_ATTEMPTS: u32 = 3;

/// Resolves commit references to normalized short SHAs.
///
/// The store never talks to git itself; callers supply a resolver (the
/// daemon wires in one that shells out, tests use closures).
pub trait CommitResolver {
    /// Resolve `reference` to a short SHA, or `None` when it does not
    /// exist in the repository.
    fn resolve_short(&self, reference: &str) -> Option<String>;
}

impl<F> CommitResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve_short(&self, reference: &str) -> Option<String> {
        self(reference)
    }
}

/// Arguments for [`TaskStore::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateTask {
    /// Owning project.
    pub project_id: String,
    /// One-line title.
    pub title: String,
    /// Long-form description.
    pub description: Option<String>,
    /// Hierarchy parent.
    pub parent_task_id: Option<String>,
    /// Priority; lower is more urgent.
    pub priority: Option<i64>,
    /// Category.
    pub task_type: Option<String>,
    /// Labels (deduped on write).
    pub labels: Vec<String>,
    /// Assignee.
    pub assignee: Option<String>,
    /// Workflow attached to the task.
    pub workflow_name: Option<String>,
    /// Ordering within a workflow.
    pub sequence_order: Option<i64>,
    /// Validation criteria text.
    pub validation_criteria: Option<String>,
}

/// Field changes for [`TaskStore::update`]. Outer `Option` = "change this
/// field"; inner `Option` = the new value, where `None` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New title.
    pub title: Option<String>,
    /// New description (`Some(None)` clears).
    pub description: Option<Option<String>>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<i64>,
    /// New category (`Some(None)` clears).
    pub task_type: Option<Option<String>>,
    /// New labels; `Some(None)` resets to the empty set.
    pub labels: Option<Option<Vec<String>>>,
    /// New assignee (`Some(None)` clears).
    pub assignee: Option<Option<String>>,
    /// New parent (`Some(None)` makes the task a root).
    pub parent_task_id: Option<Option<String>>,
    /// New workflow (`Some(None)` clears).
    pub workflow_name: Option<Option<String>>,
    /// New sequence order (`Some(None)` clears).
    pub sequence_order: Option<Option<i64>>,
    /// New validation criteria (`Some(None)` clears).
    pub validation_criteria: Option<Option<String>>,
    /// New validation status.
    pub validation_status: Option<ValidationStatus>,
    /// New escalation reason (`Some(None)` clears).
    pub escalation_reason: Option<Option<String>>,
}

/// Arguments for [`TaskStore::close`].
#[derive(Debug, Clone, Default)]
pub struct CloseTask<'a> {
    /// Reason recorded on the task.
    pub reason: Option<&'a str>,
    /// Commit reference to normalize and record.
    pub commit_sha: Option<&'a str>,
    /// Session performing the close.
    pub session_id: Option<&'a str>,
    /// Close even with open children.
    pub force: bool,
}

/// Listing filters for [`TaskStore::list`] and the ready/blocked queries.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one project.
    pub project_id: Option<String>,
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<TaskStatus>,
    /// Substring match on the title.
    pub title_like: Option<String>,
    /// Require a label.
    pub label: Option<String>,
    /// Require an assignee.
    pub assignee: Option<String>,
    /// Require a category.
    pub task_type: Option<String>,
    /// Restrict to children of this task.
    pub parent_task_id: Option<String>,
    /// Restrict to a workflow.
    pub workflow_name: Option<String>,
    /// Keep tasks at or above this urgency (`priority <= max_priority`).
    pub max_priority: Option<i64>,
    /// Page size.
    pub limit: Option<i64>,
    /// Page offset.
    pub offset: Option<i64>,
}

/// CRUD, lifecycle, queries and comments over task rows.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // CRUD

    /// Create a task, assigning the next per-project `seq_num` and
    /// computing `path_cache`. Retries a bounded number of times on id
    /// collision.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for an unknown parent and
    /// [`StorageError::IdCollision`] when retries are exhausted.
    pub fn create(&self, args: &CreateTask) -> StorageResult<Task> {
        self.db.with_transaction(|conn| {
            let parent_path = match &args.parent_task_id {
                Some(parent_id) => {
                    let parent = Self::fetch(conn, parent_id)?
                        .ok_or_else(|| StorageError::not_found("task", parent_id))?;
                    Some(parent.path_cache)
                }
                None => None,
            };

            let seq_num: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq_num), 0) + 1 FROM tasks WHERE project_id = ?1",
                params![args.project_id],
                |r| r.get(0),
            )?;
            let path_cache = match parent_path {
                Some(parent) => format!("{parent}.{seq_num}"),
                None => seq_num.to_string(),
            };

            let labels = dedupe_labels(&args.labels);
            let labels_json = serde_json::to_string(&labels)?;
            let priority = args.priority.unwrap_or(UNSET_PRIORITY);
            let now = row::now();

            let mut task_id = None;
            for attempt in 1..=MAX_ID_ATTEMPTS {
                let candidate = Uuid::new_v4().to_string();
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO tasks
                         (id, project_id, parent_task_id, title, description, status, priority,
                          task_type, labels, assignee, workflow_name, sequence_order,
                          validation_criteria, seq_num, path_cache, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                             ?14, ?15, ?15)",
                    params![
                        candidate,
                        args.project_id,
                        args.parent_task_id,
                        args.title,
                        args.description,
                        priority,
                        args.task_type,
                        labels_json,
                        args.assignee,
                        args.workflow_name,
                        args.sequence_order,
                        args.validation_criteria,
                        seq_num,
                        path_cache,
                        now
                    ],
                )?;
                if inserted == 1 {
                    task_id = Some(candidate);
                    break;
                }
                tracing::warn!(attempt, "task id collision; retrying");
            }
            let id = task_id.ok_or(StorageError::IdCollision {
                attempts: MAX_ID_ATTEMPTS,
            })?;

            let task =
                Self::fetch(conn, &id)?.ok_or_else(|| StorageError::not_found("task", &id))?;
            Ok((
                task,
                vec![ChangeEvent {
                    entity: "task",
                    op: "created",
                    id,
                }],
            ))
        })
    }

    /// Fetch a task by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get(&self, id: &str) -> StorageResult<Option<Task>> {
        self.db.with_conn(|conn| Self::fetch(conn, id))
    }

    /// Fetch a task, erroring when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the task does not exist.
    pub fn require(&self, id: &str) -> StorageResult<Task> {
        self.get(id)?
            .ok_or_else(|| StorageError::not_found("task", id))
    }

    /// Apply field changes. Reparenting recomputes `path_cache` for the
    /// task and its whole subtree.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown task or parent.
    pub fn update(&self, id: &str, changes: &TaskUpdate) -> StorageResult<Task> {
        self.db.with_transaction(|conn| {
            let current = Self::fetch(conn, id)?
                .ok_or_else(|| StorageError::not_found("task", id))?;

            let title = changes.title.clone().unwrap_or(current.title);
            let description = resolve(&changes.description, current.description);
            let status = changes.status.unwrap_or(current.status);
            let priority = changes.priority.unwrap_or(current.priority);
            let task_type = resolve(&changes.task_type, current.task_type);
            let labels = match &changes.labels {
                Some(Some(labels)) => dedupe_labels(labels),
                Some(None) => Vec::new(),
                None => current.labels,
            };
            let assignee = resolve(&changes.assignee, current.assignee);
            let workflow_name = resolve(&changes.workflow_name, current.workflow_name);
            let sequence_order = resolve(&changes.sequence_order, current.sequence_order);
            let validation_criteria =
                resolve(&changes.validation_criteria, current.validation_criteria);
            let validation_status = changes
                .validation_status
                .unwrap_or(current.validation_status);
            let escalation_reason = resolve(&changes.escalation_reason, current.escalation_reason);

            let (parent_task_id, new_path) = match &changes.parent_task_id {
                None => (current.parent_task_id.clone(), None),
                Some(None) => (None, Some(current.seq_num.to_string())),
                Some(Some(parent_id)) => {
                    if parent_id == id {
                        return Err(StorageError::Conflict(
                            "task cannot be its own parent".to_string(),
                        ));
                    }
                    let parent = Self::fetch(conn, parent_id)?
                        .ok_or_else(|| StorageError::not_found("task", parent_id))?;
                    (
                        Some(parent_id.clone()),
                        Some(format!("{}.{}", parent.path_cache, current.seq_num)),
                    )
                }
            };

            conn.execute(
                "UPDATE tasks SET title = ?2, description = ?3, status = ?4, priority = ?5,
                        task_type = ?6, labels = ?7, assignee = ?8, parent_task_id = ?9,
                        workflow_name = ?10, sequence_order = ?11, validation_criteria = ?12,
                        validation_status = ?13, escalation_reason = ?14, updated_at = ?15
                 WHERE id = ?1",
                params![
                    id,
                    title,
                    description,
                    status.as_str(),
                    priority,
                    serde_json::to_string(&labels)?,
                    assignee,
                    parent_task_id,
                    workflow_name,
                    sequence_order,
                    validation_criteria,
                    validation_status.as_str(),
                    escalation_reason,
                    row::now()
                ],
            )?;

            if let Some(new_path) = new_path {
                Self::repath_subtree(conn, &current.path_cache, &new_path, id)?;
            }

            let task =
                Self::fetch(conn, id)?.ok_or_else(|| StorageError::not_found("task", id))?;
            Ok((
                task,
                vec![ChangeEvent {
                    entity: "task",
                    op: "updated",
                    id: id.to_string(),
                }],
            ))
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle

    /// Close a task. Refuses when open direct children exist unless
    /// `force`; normalizes and records the commit when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] on open children,
    /// [`StorageError::InvalidCommit`] on an unresolvable SHA, and
    /// [`StorageError::NotFound`] for unknown ids.
    pub fn close(
        &self,
        id: &str,
        args: &CloseTask<'_>,
        resolver: &dyn CommitResolver,
    ) -> StorageResult<Task> {
        let normalized = match args.commit_sha {
            Some(reference) => Some(
                resolver
                    .resolve_short(reference)
                    .ok_or_else(|| StorageError::InvalidCommit(reference.to_string()))?,
            ),
            None => None,
        };

        self.db.with_transaction(|conn| {
            let task = Self::fetch(conn, id)?
                .ok_or_else(|| StorageError::not_found("task", id))?;

            if !args.force {
                let open_children: i64 = conn.query_row(
                    "SELECT count(*) FROM tasks WHERE parent_task_id = ?1 AND status != 'closed'",
                    params![id],
                    |r| r.get(0),
                )?;
                if open_children > 0 {
                    return Err(StorageError::Conflict(format!(
                        "cannot close {}: {open_children} open children (pass force to override)",
                        task.reference()
                    )));
                }
            }

            let mut commits = task.commits.clone();
            if let Some(sha) = &normalized {
                if !commits.iter().any(|c| c == sha) {
                    commits.push(sha.clone());
                }
            }

            let now = row::now();
            conn.execute(
                "UPDATE tasks SET status = 'closed', closed_reason = ?2, closed_commit_sha = ?3,
                        closed_in_session_id = ?4, closed_at = ?5, commits = ?6, updated_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    args.reason,
                    normalized,
                    args.session_id,
                    now,
                    serde_json::to_string(&commits)?
                ],
            )?;

            // Record the close on the session as well.
            if let Some(session_id) = args.session_id {
                conn.execute(
                    "INSERT OR REPLACE INTO session_tasks (session_id, task_id, action, created_at)
                     VALUES (?1, ?2, 'closed', ?3)",
                    params![session_id, id, now],
                )?;
            }

            let task =
                Self::fetch(conn, id)?.ok_or_else(|| StorageError::not_found("task", id))?;
            Ok((
                task,
                vec![ChangeEvent {
                    entity: "task",
                    op: "closed",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Reopen a closed task, clearing the closed-* fields.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the task is not closed.
    pub fn reopen(&self, id: &str, reason: Option<&str>) -> StorageResult<Task> {
        self.db.with_transaction(|conn| {
            let task = Self::fetch(conn, id)?
                .ok_or_else(|| StorageError::not_found("task", id))?;
            if task.status != TaskStatus::Closed {
                return Err(StorageError::Conflict(format!(
                    "task {} is already open",
                    task.reference()
                )));
            }

            let description = match reason {
                Some(reason) => {
                    let suffix = format!("[Reopened: {reason}]");
                    Some(match task.description {
                        Some(existing) => format!("{existing}\n\n{suffix}"),
                        None => suffix,
                    })
                }
                None => task.description,
            };

            conn.execute(
                "UPDATE tasks SET status = 'open', closed_reason = NULL, closed_commit_sha = NULL,
                        closed_in_session_id = NULL, closed_at = NULL, description = ?2,
                        updated_at = ?3
                 WHERE id = ?1",
                params![id, description, row::now()],
            )?;

            let task =
                Self::fetch(conn, id)?.ok_or_else(|| StorageError::not_found("task", id))?;
            Ok((
                task,
                vec![ChangeEvent {
                    entity: "task",
                    op: "reopened",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Escalate a task for human attention.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown ids.
    pub fn escalate(&self, id: &str, reason: &str) -> StorageResult<Task> {
        self.update(
            id,
            &TaskUpdate {
                status: Some(TaskStatus::Escalated),
                escalation_reason: Some(Some(reason.to_string())),
                ..TaskUpdate::default()
            },
        )
    }

    /// Clear an escalation back to `open`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the task is not escalated.
    pub fn de_escalate(&self, id: &str) -> StorageResult<Task> {
        let task = self.require(id)?;
        if task.status != TaskStatus::Escalated {
            return Err(StorageError::Conflict(format!(
                "task {} is not escalated",
                task.reference()
            )));
        }
        self.update(
            id,
            &TaskUpdate {
                status: Some(TaskStatus::Open),
                escalation_reason: Some(None),
                ..TaskUpdate::default()
            },
        )
    }

    // ------------------------------------------------------------------
    // Deletion

    /// Delete a task.
    ///
    /// Without flags, a task with children or dependents is refused with
    /// an error naming the blocking references. `cascade` deletes the
    /// whole subtree plus transitive dependents (cycle-safe via a visited
    /// set); `unlink` deletes only the task, letting the schema detach
    /// children and cascade dependency rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when flags are required.
    pub fn delete(&self, id: &str, cascade: bool, unlink: bool) -> StorageResult<bool> {
        self.db.with_transaction(|conn| {
            if Self::fetch(conn, id)?.is_none() {
                return Ok((false, Vec::new()));
            }

            if !cascade && !unlink {
                let mut blockers: Vec<String> = Vec::new();
                let mut stmt = conn.prepare(
                    "SELECT seq_num FROM tasks WHERE parent_task_id = ?1 ORDER BY seq_num",
                )?;
                let children = stmt.query_map(params![id], |r| r.get::<_, i64>(0))?;
                for seq in children {
                    blockers.push(format!("child #{}", seq?));
                }
                let mut stmt = conn.prepare(
                    "SELECT t.seq_num FROM task_dependencies d
                     JOIN tasks t ON t.id = d.task_id
                     WHERE d.depends_on_task_id = ?1 ORDER BY t.seq_num",
                )?;
                let dependents = stmt.query_map(params![id], |r| r.get::<_, i64>(0))?;
                for seq in dependents {
                    blockers.push(format!("dependent #{}", seq?));
                }
                if !blockers.is_empty() {
                    return Err(StorageError::Conflict(format!(
                        "cannot delete task: referenced by {} (pass cascade or unlink)",
                        blockers.join(", ")
                    )));
                }
            }

            let events = if cascade {
                let doomed = Self::collect_cascade(conn, id)?;
                let mut events = Vec::with_capacity(doomed.len());
                for doomed_id in &doomed {
                    conn.execute("DELETE FROM tasks WHERE id = ?1", params![doomed_id])?;
                    events.push(ChangeEvent {
                        entity: "task",
                        op: "deleted",
                        id: doomed_id.clone(),
                    });
                }
                events
            } else {
                // unlink (or a leaf delete): children detach via
                // ON DELETE SET NULL, dependency rows cascade.
                let orphans: Vec<(String, i64, String)> = {
                    let mut stmt = conn.prepare(
                        "SELECT id, seq_num, path_cache FROM tasks WHERE parent_task_id = ?1",
                    )?;
                    let rows = stmt.query_map(params![id], |r| {
                        Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                    })?;
                    rows.collect::<Result<_, _>>()?
                };
                conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
                // Orphaned subtrees become roots; fix their paths.
                for (orphan_id, seq_num, old_path) in orphans {
                    Self::repath_subtree(conn, &old_path, &seq_num.to_string(), &orphan_id)?;
                }
                vec![ChangeEvent {
                    entity: "task",
                    op: "deleted",
                    id: id.to_string(),
                }]
            };

            Ok((true, events))
        })
    }

    /// Breadth-first walk over children and dependents with a visited
    /// set. Terminates on parent↔child dependency cycles because nodes
    /// are never re-enqueued.
    fn collect_cascade(conn: &Connection, root: &str) -> StorageResult<Vec<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();
        let mut queue: Vec<String> = vec![root.to_string()];

        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            order.push(current.clone());

            let mut stmt =
                conn.prepare("SELECT id FROM tasks WHERE parent_task_id = ?1")?;
            let children = stmt.query_map(params![current], |r| r.get::<_, String>(0))?;
            for child in children {
                let child = child?;
                if !visited.contains(&child) {
                    queue.push(child);
                }
            }

            let mut stmt = conn.prepare(
                "SELECT task_id FROM task_dependencies
                 WHERE depends_on_task_id = ?1 AND dep_type = 'blocks'",
            )?;
            let dependents = stmt.query_map(params![current], |r| r.get::<_, String>(0))?;
            for dependent in dependents {
                let dependent = dependent?;
                if !visited.contains(&dependent) {
                    queue.push(dependent);
                }
            }
        }

        // Delete leaves-first so parent rows never dangle mid-loop.
        order.reverse();
        Ok(order)
    }

    fn repath_subtree(
        conn: &Connection,
        old_path: &str,
        new_path: &str,
        task_id: &str,
    ) -> StorageResult<()> {
        conn.execute(
            "UPDATE tasks SET path_cache = ?2 WHERE id = ?1",
            params![task_id, new_path],
        )?;
        conn.execute(
            "UPDATE tasks
             SET path_cache = ?2 || substr(path_cache, ?3)
             WHERE path_cache LIKE ?1 || '.%'",
            params![old_path, new_path, old_path.len() + 1],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commits

    /// Link a commit to a task (idempotent; set semantics).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidCommit`] when the reference cannot
    /// be resolved.
    pub fn link_commit(
        &self,
        id: &str,
        reference: &str,
        resolver: &dyn CommitResolver,
    ) -> StorageResult<Task> {
        let sha = resolver
            .resolve_short(reference)
            .ok_or_else(|| StorageError::InvalidCommit(reference.to_string()))?;
        self.mutate_commits(id, |commits| {
            if !commits.iter().any(|c| c == &sha) {
                commits.push(sha.clone());
            }
        })
    }

    /// Unlink a commit from a task. Removing an absent SHA is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidCommit`] when the reference cannot
    /// be resolved.
    pub fn unlink_commit(
        &self,
        id: &str,
        reference: &str,
        resolver: &dyn CommitResolver,
    ) -> StorageResult<Task> {
        let sha = resolver
            .resolve_short(reference)
            .ok_or_else(|| StorageError::InvalidCommit(reference.to_string()))?;
        self.mutate_commits(id, |commits| {
            commits.retain(|c| c != &sha);
        })
    }

    fn mutate_commits(&self, id: &str, f: impl FnOnce(&mut Vec<String>)) -> StorageResult<Task> {
        self.db.with_transaction(|conn| {
            let task = Self::fetch(conn, id)?
                .ok_or_else(|| StorageError::not_found("task", id))?;
            let mut commits = task.commits;
            f(&mut commits);
            conn.execute(
                "UPDATE tasks SET commits = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, serde_json::to_string(&commits)?, row::now()],
            )?;
            let task =
                Self::fetch(conn, id)?.ok_or_else(|| StorageError::not_found("task", id))?;
            Ok((
                task,
                vec![ChangeEvent {
                    entity: "task",
                    op: "updated",
                    id: id.to_string(),
                }],
            ))
        })
    }

    // ------------------------------------------------------------------
    // Queries

    /// List tasks matching `filter`, ordered by `path_cache`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list(&self, filter: &TaskFilter) -> StorageResult<Vec<Task>> {
        let (clause, params) = filter_clause(filter);
        let sql = format!(
            "SELECT {COLUMNS} FROM tasks WHERE 1=1{clause} ORDER BY path_cache{}",
            paging(filter)
        );
        self.query_tasks(&sql, params)
    }

    /// Non-closed tasks with no open non-descendant blockers.
    ///
    /// A parent blocked only by its own children is ready: children mean
    /// "cannot close until done", not "cannot start".
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list_ready(&self, filter: &TaskFilter) -> StorageResult<Vec<Task>> {
        let (clause, params) = filter_clause(filter);
        let sql = format!(
            "SELECT {COLUMNS} FROM tasks t
             WHERE t.status != 'closed'{clause}
               AND NOT EXISTS (
                   SELECT 1 FROM task_dependencies d
                   JOIN tasks b ON b.id = d.depends_on_task_id
                   WHERE d.task_id = t.id AND d.dep_type = 'blocks'
                     AND b.status != 'closed'
                     AND b.path_cache NOT LIKE t.path_cache || '.%'
               )
             ORDER BY t.priority, t.path_cache{}",
            paging(filter)
        );
        self.query_tasks(&sql, params)
    }

    /// Non-closed tasks blocked by at least one open non-descendant task.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list_blocked(&self, filter: &TaskFilter) -> StorageResult<Vec<Task>> {
        let (clause, params) = filter_clause(filter);
        let sql = format!(
            "SELECT {COLUMNS} FROM tasks t
             WHERE t.status != 'closed'{clause}
               AND EXISTS (
                   SELECT 1 FROM task_dependencies d
                   JOIN tasks b ON b.id = d.depends_on_task_id
                   WHERE d.task_id = t.id AND d.dep_type = 'blocks'
                     AND b.status != 'closed'
                     AND b.path_cache NOT LIKE t.path_cache || '.%'
               )
             ORDER BY t.priority, t.path_cache{}",
            paging(filter)
        );
        self.query_tasks(&sql, params)
    }

    /// Ready descendants of a parent task (the orchestrator's work list).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for an unknown parent.
    pub fn list_ready_descendants(&self, parent_id: &str) -> StorageResult<Vec<Task>> {
        let parent = self.require(parent_id)?;
        let ready = self.list_ready(&TaskFilter {
            project_id: Some(parent.project_id.clone()),
            ..TaskFilter::default()
        })?;
        let prefix = format!("{}.", parent.path_cache);
        Ok(ready
            .into_iter()
            .filter(|t| t.path_cache.starts_with(&prefix))
            .collect())
    }

    /// Count tasks, optionally restricted to one status.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn count(&self, project_id: &str, status: Option<TaskStatus>) -> StorageResult<i64> {
        self.db.with_conn(|conn| {
            let count = match status {
                Some(status) => conn.query_row(
                    "SELECT count(*) FROM tasks WHERE project_id = ?1 AND status = ?2",
                    params![project_id, status.as_str()],
                    |r| r.get(0),
                )?,
                None => conn.query_row(
                    "SELECT count(*) FROM tasks WHERE project_id = ?1",
                    params![project_id],
                    |r| r.get(0),
                )?,
            };
            Ok(count)
        })
    }

    /// Counts per status for a project.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn count_by_status(&self, project_id: &str) -> StorageResult<Vec<(TaskStatus, i64)>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, count(*) FROM tasks WHERE project_id = ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![project_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?;
            let mut counts = Vec::new();
            for entry in rows {
                let (status, count) = entry?;
                if let Some(status) = TaskStatus::parse(&status) {
                    counts.push((status, count));
                }
            }
            Ok(counts)
        })
    }

    // ------------------------------------------------------------------
    // References

    /// Resolve a task reference: UUID, unique UUID prefix, `#N`, bare
    /// `N`, or dotted path `1.2.3`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidReference`] when nothing matches
    /// (or a prefix is ambiguous).
    pub fn resolve_reference(
        &self,
        project_id: Option<&str>,
        reference: &str,
    ) -> StorageResult<Task> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }

        // Full UUID.
        if Uuid::parse_str(reference).is_ok() {
            return self.require(reference);
        }

        // #N or bare N.
        let seq_text = reference.strip_prefix('#').unwrap_or(reference);
        if seq_text.chars().all(|c| c.is_ascii_digit()) && !seq_text.contains('.') {
            if let Ok(seq_num) = seq_text.parse::<i64>() {
                return self.lookup_unique(
                    project_id,
                    "seq_num = ?",
                    SqlValue::Integer(seq_num),
                    reference,
                );
            }
        }

        // Dotted path.
        if reference.contains('.')
            && reference.chars().all(|c| c.is_ascii_digit() || c == '.')
        {
            return self.lookup_unique(
                project_id,
                "path_cache = ?",
                SqlValue::Text(reference.to_string()),
                reference,
            );
        }

        // UUID prefix (8+ chars of a hyphenless/hyphenated UUID head).
        if reference.len() >= 8
            && reference
                .chars()
                .all(|c| c.is_ascii_hexdigit() || c == '-')
        {
            return self.lookup_unique(
                project_id,
                "id LIKE ? || '%'",
                SqlValue::Text(reference.to_string()),
                reference,
            );
        }

        Err(StorageError::InvalidReference(reference.to_string()))
    }

    fn lookup_unique(
        &self,
        project_id: Option<&str>,
        predicate: &str,
        value: SqlValue,
        reference: &str,
    ) -> StorageResult<Task> {
        self.db.with_conn(|conn| {
            let (sql, params): (String, Vec<SqlValue>) = match project_id {
                Some(project) => (
                    format!(
                        "SELECT {COLUMNS} FROM tasks WHERE project_id = ? AND {predicate} LIMIT 2"
                    ),
                    vec![SqlValue::Text(project.to_string()), value],
                ),
                None => (
                    format!("SELECT {COLUMNS} FROM tasks WHERE {predicate} LIMIT 2"),
                    vec![value],
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params), Self::map_row)?;
            let mut matches: Vec<Task> = Vec::new();
            for task in rows {
                matches.push(task?);
            }
            match matches.len() {
                1 => Ok(matches.remove(0)),
                0 => Err(StorageError::InvalidReference(reference.to_string())),
                _ => Err(StorageError::InvalidReference(format!(
                    "{reference} (ambiguous)"
                ))),
            }
        })
    }

    // ------------------------------------------------------------------
    // Comments

    /// Add a comment.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown tasks.
    pub fn add_comment(
        &self,
        task_id: &str,
        body: &str,
        author: Option<&str>,
    ) -> StorageResult<TaskComment> {
        self.db.with_transaction(|conn| {
            if Self::fetch(conn, task_id)?.is_none() {
                return Err(StorageError::not_found("task", task_id));
            }
            let id = Uuid::new_v4().to_string();
            let now = row::now();
            conn.execute(
                "INSERT INTO task_comments (id, task_id, body, author, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, task_id, body, author, now],
            )?;
            Ok((
                TaskComment {
                    id: id.clone(),
                    task_id: task_id.to_string(),
                    body: body.to_string(),
                    author: author.map(str::to_string),
                    created_at: row::parse_ts(&now),
                },
                vec![ChangeEvent {
                    entity: "task_comment",
                    op: "created",
                    id,
                }],
            ))
        })
    }

    /// List comments oldest-first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list_comments(&self, task_id: &str) -> StorageResult<Vec<TaskComment>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, body, author, created_at FROM task_comments
                 WHERE task_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![task_id], |r| {
                Ok(TaskComment {
                    id: r.get(0)?,
                    task_id: r.get(1)?,
                    body: r.get(2)?,
                    author: r.get(3)?,
                    created_at: row::ts_column(r, "created_at")?,
                })
            })?;
            let mut comments = Vec::new();
            for comment in rows {
                comments.push(comment?);
            }
            Ok(comments)
        })
    }

    /// Delete a comment.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown comments.
    pub fn delete_comment(&self, comment_id: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let deleted =
                conn.execute("DELETE FROM task_comments WHERE id = ?1", params![comment_id])?;
            if deleted == 0 {
                return Err(StorageError::not_found("comment", comment_id));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "task_comment",
                    op: "deleted",
                    id: comment_id.to_string(),
                }],
            ))
        })
    }

    // ------------------------------------------------------------------
    // Row plumbing

    fn query_tasks(&self, sql: &str, params: Vec<SqlValue>) -> StorageResult<Vec<Task>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params_from_iter(params), Self::map_row)?;
            let mut tasks = Vec::new();
            for task in rows {
                tasks.push(task?);
            }
            Ok(tasks)
        })
    }

    pub(crate) fn fetch(conn: &Connection, id: &str) -> StorageResult<Option<Task>> {
        let task = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(task)
    }

    pub(crate) fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
        let status: String = row.get("status")?;
        let validation: String = row.get("validation_status")?;
        Ok(Task {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            parent_task_id: row.get("parent_task_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Open),
            priority: row.get("priority")?,
            task_type: row.get("task_type")?,
            labels: row::json_column(row, "labels")?,
            assignee: row.get("assignee")?,
            commits: row::json_column(row, "commits")?,
            workflow_name: row.get("workflow_name")?,
            sequence_order: row.get("sequence_order")?,
            validation_criteria: row.get("validation_criteria")?,
            validation_status: ValidationStatus::parse(&validation).unwrap_or_default(),
            escalation_reason: row.get("escalation_reason")?,
            closed_in_session_id: row.get("closed_in_session_id")?,
            closed_commit_sha: row.get("closed_commit_sha")?,
            closed_reason: row.get("closed_reason")?,
            closed_at: row::opt_ts_column(row, "closed_at")?,
            seq_num: row.get("seq_num")?,
            path_cache: row.get("path_cache")?,
            created_at: row::ts_column(row, "created_at")?,
            updated_at: row::ts_column(row, "updated_at")?,
        })
    }
}

const COLUMNS: &str = "id, project_id, parent_task_id, title, description, status, priority, \
                       task_type, labels, assignee, commits, workflow_name, sequence_order, \
                       validation_criteria, validation_status, escalation_reason, \
                       closed_in_session_id, closed_commit_sha, closed_reason, closed_at, \
                       seq_num, path_cache, created_at, updated_at";

fn resolve<T: Clone>(change: &Option<Option<T>>, current: Option<T>) -> Option<T> {
    match change {
        Some(value) => value.clone(),
        None => current,
    }
}

fn dedupe_labels(labels: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .filter(|l| seen.insert((*l).clone()))
        .cloned()
        .collect()
}

fn filter_clause(filter: &TaskFilter) -> (String, Vec<SqlValue>) {
    let mut clause = String::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(project) = &filter.project_id {
        clause.push_str(" AND project_id = ?");
        params.push(SqlValue::Text(project.clone()));
    }
    if !filter.statuses.is_empty() {
        let marks = vec!["?"; filter.statuses.len()].join(", ");
        clause.push_str(&format!(" AND status IN ({marks})"));
        for status in &filter.statuses {
            params.push(SqlValue::Text(status.as_str().to_string()));
        }
    }
    if let Some(title) = &filter.title_like {
        clause.push_str(" AND title LIKE '%' || ? || '%'");
        params.push(SqlValue::Text(title.clone()));
    }
    if let Some(label) = &filter.label {
        clause.push_str(" AND labels LIKE '%' || ? || '%'");
        params.push(SqlValue::Text(format!("\"{label}\"")));
    }
    if let Some(assignee) = &filter.assignee {
        clause.push_str(" AND assignee = ?");
        params.push(SqlValue::Text(assignee.clone()));
    }
    if let Some(task_type) = &filter.task_type {
        clause.push_str(" AND task_type = ?");
        params.push(SqlValue::Text(task_type.clone()));
    }
    if let Some(parent) = &filter.parent_task_id {
        clause.push_str(" AND parent_task_id = ?");
        params.push(SqlValue::Text(parent.clone()));
    }
    if let Some(workflow) = &filter.workflow_name {
        clause.push_str(" AND workflow_name = ?");
        params.push(SqlValue::Text(workflow.clone()));
    }
    if let Some(max_priority) = filter.max_priority {
        clause.push_str(" AND priority <= ?");
        params.push(SqlValue::Integer(max_priority));
    }
    (clause, params)
}

fn paging(filter: &TaskFilter) -> String {
    let mut suffix = String::new();
    if let Some(limit) = filter.limit {
        suffix.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = filter.offset {
            suffix.push_str(&format!(" OFFSET {offset}"));
        }
    }
    suffix
}

/// Normalize a priority value: ints pass through, named strings map to
/// the conventional scale, anything else is [`UNSET_PRIORITY`].
#[must_use]
pub fn normalize_priority(value: Option<&serde_json::Value>) -> i64 {
    match value {
        None | Some(serde_json::Value::Null) => UNSET_PRIORITY,
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(UNSET_PRIORITY),
        Some(serde_json::Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "critical" => 0,
            "high" => 1,
            "medium" => 2,
            "low" => 3,
            other => other.parse().unwrap_or(UNSET_PRIORITY),
        },
        Some(_) => UNSET_PRIORITY,
    }
}

/// Order tasks parents-before-children using `path_cache`, comparing
/// segments numerically. Orphaned parent references order as roots.
#[must_use]
pub fn order_hierarchically(mut tasks: Vec<Task>) -> Vec<Task> {
    fn key(path: &str) -> Vec<i64> {
        path.split('.').filter_map(|s| s.parse().ok()).collect()
    }
    tasks.sort_by(|a, b| key(&a.path_cache).cmp(&key(&b.path_cache)));
    tasks
}
