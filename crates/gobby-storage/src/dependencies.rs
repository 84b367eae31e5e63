//! Task dependency edges.
//!
//! The dependency graph is a DAG and stays one: every insert runs a
//! reachability check first, inside the same transaction, so a cycle can
//! never be committed.

use rusqlite::{Connection, params};
use std::collections::HashSet;

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{DependencyType, TaskDependency};
use crate::tasks::TaskStore;

/// CRUD over dependency rows.
#[derive(Debug, Clone)]
pub struct DependencyStore {
    db: Database,
}

impl DependencyStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add `task_id depends-on depends_on_task_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] for self-dependencies,
    /// [`StorageError::DependencyCycle`] when the edge would close a
    /// cycle, and [`StorageError::NotFound`] for unknown tasks.
    pub fn add(
        &self,
        task_id: &str,
        depends_on_task_id: &str,
        dep_type: DependencyType,
    ) -> StorageResult<TaskDependency> {
        if task_id == depends_on_task_id {
            return Err(StorageError::Conflict(
                "a task cannot depend on itself".to_string(),
            ));
        }

        self.db.with_transaction(|conn| {
            for id in [task_id, depends_on_task_id] {
                if TaskStore::fetch(conn, id)?.is_none() {
                    return Err(StorageError::not_found("task", id));
                }
            }

            // Would `depends_on` (transitively) depend on `task`? Then the
            // new edge closes a cycle.
            if Self::reaches(conn, depends_on_task_id, task_id)? {
                return Err(StorageError::DependencyCycle {
                    task: task_id.to_string(),
                    depends_on: depends_on_task_id.to_string(),
                });
            }

            conn.execute(
                "INSERT OR REPLACE INTO task_dependencies (task_id, depends_on_task_id, dep_type)
                 VALUES (?1, ?2, ?3)",
                params![task_id, depends_on_task_id, dep_type.as_str()],
            )?;

            Ok((
                TaskDependency {
                    task_id: task_id.to_string(),
                    depends_on_task_id: depends_on_task_id.to_string(),
                    dep_type,
                },
                vec![ChangeEvent {
                    entity: "task_dependency",
                    op: "created",
                    id: format!("{task_id}->{depends_on_task_id}"),
                }],
            ))
        })
    }

    /// Remove an edge.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the edge does not exist.
    pub fn remove(&self, task_id: &str, depends_on_task_id: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let deleted = conn.execute(
                "DELETE FROM task_dependencies WHERE task_id = ?1 AND depends_on_task_id = ?2",
                params![task_id, depends_on_task_id],
            )?;
            if deleted == 0 {
                return Err(StorageError::not_found(
                    "dependency",
                    format!("{task_id}->{depends_on_task_id}"),
                ));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "task_dependency",
                    op: "deleted",
                    id: format!("{task_id}->{depends_on_task_id}"),
                }],
            ))
        })
    }

    /// Edges where `task_id` is the dependent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list_for_task(&self, task_id: &str) -> StorageResult<Vec<TaskDependency>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, depends_on_task_id, dep_type FROM task_dependencies
                 WHERE task_id = ?1",
            )?;
            let rows = stmt.query_map(params![task_id], Self::map_row)?;
            let mut edges = Vec::new();
            for edge in rows {
                edges.push(edge?);
            }
            Ok(edges)
        })
    }

    /// Edges where `task_id` is depended upon.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list_dependents(&self, task_id: &str) -> StorageResult<Vec<TaskDependency>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, depends_on_task_id, dep_type FROM task_dependencies
                 WHERE depends_on_task_id = ?1",
            )?;
            let rows = stmt.query_map(params![task_id], Self::map_row)?;
            let mut edges = Vec::new();
            for edge in rows {
                edges.push(edge?);
            }
            Ok(edges)
        })
    }

    /// Depth-first reachability over dependency edges with a visited set.
    fn reaches(conn: &Connection, from: &str, to: &str) -> StorageResult<bool> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = vec![from.to_string()];
        while let Some(current) = stack.pop() {
            if current == to {
                return Ok(true);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            let mut stmt = conn.prepare(
                "SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ?1",
            )?;
            let next = stmt.query_map(params![current], |r| r.get::<_, String>(0))?;
            for id in next {
                let id = id?;
                if !visited.contains(&id) {
                    stack.push(id);
                }
            }
        }
        Ok(false)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskDependency> {
        let dep_type: String = row.get("dep_type")?;
        Ok(TaskDependency {
            task_id: row.get("task_id")?,
            depends_on_task_id: row.get("depends_on_task_id")?,
            dep_type: DependencyType::parse(&dep_type).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::ProjectStore;
    use crate::tasks::{CreateTask, TaskStore};

    fn fixture() -> (TaskStore, DependencyStore) {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();
        projects.create("proj", "proj", None).unwrap();
        (TaskStore::new(db.clone()), DependencyStore::new(db))
    }

    fn make(tasks: &TaskStore, title: &str) -> String {
        tasks
            .create(&CreateTask {
                project_id: "proj".into(),
                title: title.into(),
                ..CreateTask::default()
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_self_dependency_rejected() {
        let (tasks, deps) = fixture();
        let a = make(&tasks, "a");
        assert!(matches!(
            deps.add(&a, &a, DependencyType::Blocks),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn test_direct_cycle_rejected() {
        let (tasks, deps) = fixture();
        let a = make(&tasks, "a");
        let b = make(&tasks, "b");
        deps.add(&a, &b, DependencyType::Blocks).unwrap();
        let err = deps.add(&b, &a, DependencyType::Blocks).unwrap_err();
        assert!(matches!(err, StorageError::DependencyCycle { .. }));
        // No row was written.
        assert!(deps.list_for_task(&b).unwrap().is_empty());
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let (tasks, deps) = fixture();
        let a = make(&tasks, "a");
        let b = make(&tasks, "b");
        let c = make(&tasks, "c");
        deps.add(&a, &b, DependencyType::Blocks).unwrap();
        deps.add(&b, &c, DependencyType::Blocks).unwrap();
        assert!(matches!(
            deps.add(&c, &a, DependencyType::Blocks),
            Err(StorageError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_add_remove_list() {
        let (tasks, deps) = fixture();
        let a = make(&tasks, "a");
        let b = make(&tasks, "b");
        deps.add(&a, &b, DependencyType::Related).unwrap();

        let forward = deps.list_for_task(&a).unwrap();
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].dep_type, DependencyType::Related);

        let reverse = deps.list_dependents(&b).unwrap();
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].task_id, a);

        deps.remove(&a, &b).unwrap();
        assert!(deps.list_for_task(&a).unwrap().is_empty());
        assert!(deps.remove(&a, &b).is_err());
    }

    #[test]
    fn test_unknown_task_rejected() {
        let (tasks, deps) = fixture();
        let a = make(&tasks, "a");
        assert!(matches!(
            deps.add(&a, "missing", DependencyType::Blocks),
            Err(StorageError::NotFound { .. })
        ));
    }
}
