//! The store handle.
//!
//! One SQLite connection behind a mutex. Everything the daemon persists
//! goes through this handle; the per-entity stores
//! ([`crate::tasks::TaskStore`], [`crate::sessions::SessionStore`], ...)
//! borrow it and run their statements inside `with_conn` /
//! `with_transaction`.
//!
//! Change listeners registered on the handle are notified *after* a
//! successful commit; a panicking or slow listener can never fail or
//! roll back the write that triggered it.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::migrations;

/// What changed, delivered to listeners after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Entity kind ("task", "session", "worktree", ...).
    pub entity: &'static str,
    /// Operation ("created", "updated", "deleted", ...).
    pub op: &'static str,
    /// Primary id of the affected row.
    pub id: String,
}

type Listener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Shared handle to the embedded store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl Database {
    /// Open (and migrate) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a migration fails.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Conflict(format!(
                        "cannot create store directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (tests).
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            listeners: Arc::new(Mutex::new(Vec::new())),
        };
        db.with_conn(migrations::run)?;
        debug!("store opened and migrated");
        Ok(db)
    }

    /// Run `f` with the connection locked.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f`.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Run `f` inside a transaction; commit on `Ok`, roll back on `Err`.
    /// Change events returned by `f` are delivered to listeners after the
    /// commit.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` or from commit.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<(T, Vec<ChangeEvent>)>,
    ) -> StorageResult<T> {
        let (value, events) = {
            let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = conn.transaction()?;
            let (value, events) = f(&tx)?;
            tx.commit()?;
            (value, events)
        };
        // Listeners run outside the lock, after commit.
        for event in &events {
            self.notify(event);
        }
        Ok(value)
    }

    /// Register a post-commit change listener.
    pub fn add_listener(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    /// Deliver one event to every listener. Listener panics are caught;
    /// they are logged and the remaining listeners still run.
    pub fn notify(&self, event: &ChangeEvent) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(event);
            }));
            if outcome.is_err() {
                warn!(
                    entity = event.entity,
                    op = event.op,
                    id = %event.id,
                    "change listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(count > 5);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("gobby.sqlite");
        let db = Database::open(&path).unwrap();
        drop(db);
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: StorageResult<()> = db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at, updated_at)
                 VALUES ('p-tx', 'tx', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(StorageError::Conflict("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM projects WHERE id = 'p-tx'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_listener_fires_after_commit() {
        let db = Database::open_in_memory().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        db.add_listener(move |event| {
            assert_eq!(event.entity, "project");
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at, updated_at)
                 VALUES ('p-l', 'l', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "project",
                    op: "created",
                    id: "p-l".into(),
                }],
            ))
        })
        .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_panic_does_not_break_write() {
        let db = Database::open_in_memory().unwrap();
        db.add_listener(|_| panic!("bad listener"));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        db.add_listener(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at, updated_at)
                 VALUES ('p-x', 'x', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "project",
                    op: "created",
                    id: "p-x".into(),
                }],
            ))
        })
        .unwrap();

        // The write survived and the second listener still ran.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
