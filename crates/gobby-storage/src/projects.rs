//! Project store.
//!
//! Three ids are reserved: `_personal` (always present, renders as
//! "Personal"), and the hidden system projects `_orphaned` and
//! `_migrated`, which never appear in listings and cannot be deleted.

use rusqlite::{OptionalExtension, params};

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{HIDDEN_PROJECTS, PERSONAL_PROJECT, Project};
use crate::row;

/// CRUD over project rows.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    db: Database,
}

impl ProjectStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Make sure the reserved projects exist. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn ensure_reserved(&self) -> StorageResult<()> {
        self.db.with_conn(|conn| {
            let now = row::now();
            for (id, name) in [
                (PERSONAL_PROJECT, "Personal"),
                ("_orphaned", "_orphaned"),
                ("_migrated", "_migrated"),
            ] {
                conn.execute(
                    "INSERT OR IGNORE INTO projects (id, name, path, created_at, updated_at)
                     VALUES (?1, ?2, NULL, ?3, ?3)",
                    params![id, name, now],
                )?;
            }
            Ok(())
        })
    }

    /// Insert a project row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the id already exists.
    pub fn create(&self, id: &str, name: &str, path: Option<&str>) -> StorageResult<Project> {
        self.db.with_transaction(|conn| {
            let now = row::now();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO projects (id, name, path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, name, path, now],
            )?;
            if inserted == 0 {
                return Err(StorageError::Conflict(format!(
                    "project '{id}' already exists"
                )));
            }
            let project = Self::fetch(conn, id)?
                .ok_or_else(|| StorageError::not_found("project", id))?;
            Ok((
                project,
                vec![ChangeEvent {
                    entity: "project",
                    op: "created",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Fetch a project by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get(&self, id: &str) -> StorageResult<Option<Project>> {
        self.db.with_conn(|conn| Self::fetch(conn, id))
    }

    /// List visible projects (`_orphaned`/`_migrated` excluded).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list(&self) -> StorageResult<Vec<Project>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, path, created_at, updated_at FROM projects
                 WHERE id NOT IN ('_orphaned', '_migrated')
                 ORDER BY name COLLATE NOCASE",
            )?;
            let rows = stmt.query_map([], Self::map_row)?;
            let mut projects = Vec::new();
            for project in rows {
                projects.push(project?);
            }
            Ok(projects)
        })
    }

    /// Rename / repath a project.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for an unknown id.
    pub fn update(&self, id: &str, name: Option<&str>, path: Option<&str>) -> StorageResult<Project> {
        self.db.with_transaction(|conn| {
            let mut project = Self::fetch(conn, id)?
                .ok_or_else(|| StorageError::not_found("project", id))?;
            if let Some(name) = name {
                project.name = name.to_string();
            }
            if let Some(path) = path {
                project.path = Some(path.to_string());
            }
            conn.execute(
                "UPDATE projects SET name = ?2, path = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, project.name, project.path, row::now()],
            )?;
            Ok((
                project,
                vec![ChangeEvent {
                    entity: "project",
                    op: "updated",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Delete a project. Hidden system projects are refused.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] for `_orphaned`/`_migrated` and
    /// [`StorageError::NotFound`] for unknown ids.
    pub fn delete(&self, id: &str) -> StorageResult<()> {
        if HIDDEN_PROJECTS.contains(&id) {
            return Err(StorageError::Conflict(format!(
                "project '{id}' is a system project and cannot be deleted"
            )));
        }
        self.db.with_transaction(|conn| {
            let deleted = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(StorageError::not_found("project", id));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "project",
                    op: "deleted",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Fetch or create the project for an on-disk root, minting a new id
    /// when none is registered yet.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn ensure(&self, id: &str, name: &str, path: Option<&str>) -> StorageResult<Project> {
        if let Some(existing) = self.get(id)? {
            return Ok(existing);
        }
        self.create(id, name, path)
    }

    fn fetch(conn: &rusqlite::Connection, id: &str) -> StorageResult<Option<Project>> {
        let project = conn
            .query_row(
                "SELECT id, name, path, created_at, updated_at FROM projects WHERE id = ?1",
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(project)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
        let id: String = row.get("id")?;
        let mut name: String = row.get("name")?;
        if id == PERSONAL_PROJECT {
            name = "Personal".to_string();
        }
        Ok(Project {
            id,
            name,
            path: row.get("path")?,
            created_at: row::ts_column(row, "created_at")?,
            updated_at: row::ts_column(row, "updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProjectStore {
        let db = Database::open_in_memory().unwrap();
        let store = ProjectStore::new(db);
        store.ensure_reserved().unwrap();
        store
    }

    #[test]
    fn test_reserved_projects_exist() {
        let store = store();
        assert!(store.get("_personal").unwrap().is_some());
        assert!(store.get("_orphaned").unwrap().is_some());
        assert!(store.get("_migrated").unwrap().is_some());
    }

    #[test]
    fn test_personal_renders_as_personal() {
        let store = store();
        let personal = store.get("_personal").unwrap().unwrap();
        assert_eq!(personal.name, "Personal");
    }

    #[test]
    fn test_hidden_projects_not_listed() {
        let store = store();
        store.create("p1", "Alpha", None).unwrap();
        let listed = store.list().unwrap();
        let ids: Vec<_> = listed.iter().map(|p| p.id.as_str()).collect();
        assert!(ids.contains(&"p1"));
        assert!(ids.contains(&"_personal"));
        assert!(!ids.contains(&"_orphaned"));
        assert!(!ids.contains(&"_migrated"));
    }

    #[test]
    fn test_hidden_projects_undeletable() {
        let store = store();
        assert!(store.delete("_orphaned").is_err());
        assert!(store.delete("_migrated").is_err());
    }

    #[test]
    fn test_create_duplicate_conflicts() {
        let store = store();
        store.create("p1", "Alpha", None).unwrap();
        assert!(matches!(
            store.create("p1", "Alpha", None),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let store = store();
        store.create("p1", "Alpha", None).unwrap();
        let updated = store.update("p1", Some("Beta"), Some("/tmp/beta")).unwrap();
        assert_eq!(updated.name, "Beta");
        store.delete("p1").unwrap();
        assert!(store.get("p1").unwrap().is_none());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let store = store();
        let a = store.ensure("p2", "Two", None).unwrap();
        let b = store.ensure("p2", "Renamed", None).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.name, "Two");
    }
}
