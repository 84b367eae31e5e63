//! Session store.
//!
//! Sessions are never hard-deleted; a superseded session is marked
//! `expired`, which frees its `(external_id, source, machine_id)` slot
//! for the successor (the uniqueness index is partial on non-expired
//! rows).

use rusqlite::{Connection, OptionalExtension, params};

use gobby_core::SessionSource;

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{Session, SessionStatus};
use crate::row;

/// Arguments for [`SessionStore::register`].
#[derive(Debug, Clone)]
pub struct RegisterSession<'a> {
    /// CLI-assigned external id.
    pub external_id: &'a str,
    /// Originating CLI.
    pub source: SessionSource,
    /// Stable machine id.
    pub machine_id: &'a str,
    /// Owning project.
    pub project_id: &'a str,
    /// Handoff predecessor, if any.
    pub parent_session_id: Option<&'a str>,
    /// Transcript path, if known.
    pub jsonl_path: Option<&'a str>,
}

/// CRUD and lifecycle over session rows.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a session, or return the existing non-expired session for
    /// the same `(external_id, source, machine_id)` triple. Idempotent,
    /// which is what makes concurrent auto-registration safe.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn register(&self, args: &RegisterSession<'_>) -> StorageResult<Session> {
        self.db.with_transaction(|conn| {
            if let Some(existing) =
                Self::fetch_by_external(conn, args.external_id, args.source, args.machine_id)?
            {
                // Refresh the transcript path if the CLI now knows it.
                if args.jsonl_path.is_some() && existing.jsonl_path.is_none() {
                    conn.execute(
                        "UPDATE sessions SET jsonl_path = ?2, updated_at = ?3 WHERE id = ?1",
                        params![existing.id, args.jsonl_path, row::now()],
                    )?;
                }
                return Ok((existing, Vec::new()));
            }

            let id = uuid::Uuid::new_v4().to_string();
            let now = row::now();
            conn.execute(
                "INSERT INTO sessions (id, external_id, source, machine_id, project_id,
                                       parent_session_id, status, jsonl_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, ?8)",
                params![
                    id,
                    args.external_id,
                    args.source.to_string(),
                    args.machine_id,
                    args.project_id,
                    args.parent_session_id,
                    args.jsonl_path,
                    now
                ],
            )?;
            let session =
                Self::fetch(conn, &id)?.ok_or_else(|| StorageError::not_found("session", &id))?;
            Ok((
                session,
                vec![ChangeEvent {
                    entity: "session",
                    op: "created",
                    id,
                }],
            ))
        })
    }

    /// Fetch a session by internal id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get(&self, id: &str) -> StorageResult<Option<Session>> {
        self.db.with_conn(|conn| Self::fetch(conn, id))
    }

    /// Look up the non-expired session for an external id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn lookup_by_external(
        &self,
        external_id: &str,
        source: SessionSource,
        machine_id: &str,
    ) -> StorageResult<Option<Session>> {
        self.db
            .with_conn(|conn| Self::fetch_by_external(conn, external_id, source, machine_id))
    }

    /// Most recent `handoff_ready` session for a machine/source/project.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn find_parent_session(
        &self,
        machine_id: &str,
        source: SessionSource,
        project_id: &str,
    ) -> StorageResult<Option<Session>> {
        self.db.with_conn(|conn| {
            let session = conn
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM sessions
                         WHERE machine_id = ?1 AND source = ?2 AND project_id = ?3
                           AND status = 'handoff_ready'
                         ORDER BY updated_at DESC LIMIT 1"
                    ),
                    params![machine_id, source.to_string(), project_id],
                    Self::map_row,
                )
                .optional()?;
            Ok(session)
        })
    }

    /// Update the lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown ids.
    pub fn update_status(&self, id: &str, status: SessionStatus) -> StorageResult<()> {
        self.update_column(id, "status", status.as_str())
    }

    /// Mark a session expired (terminal).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown ids.
    pub fn mark_expired(&self, id: &str) -> StorageResult<()> {
        self.update_status(id, SessionStatus::Expired)
    }

    /// Store the LLM handoff summary and flip to `handoff_ready`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown ids.
    pub fn store_summary(&self, id: &str, summary_markdown: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let updated = conn.execute(
                "UPDATE sessions SET summary_markdown = ?2, status = 'handoff_ready',
                        updated_at = ?3 WHERE id = ?1",
                params![id, summary_markdown, row::now()],
            )?;
            if updated == 0 {
                return Err(StorageError::not_found("session", id));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "session",
                    op: "updated",
                    id: id.to_string(),
                }],
            ))
        })
    }

    /// Store the compact-handoff markdown.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown ids.
    pub fn update_compact_markdown(&self, id: &str, markdown: &str) -> StorageResult<()> {
        self.update_column(id, "compact_markdown", markdown)
    }

    fn update_column(&self, id: &str, column: &str, value: &str) -> StorageResult<()> {
        // `column` is always a compile-time constant from this module.
        let sql = format!("UPDATE sessions SET {column} = ?2, updated_at = ?3 WHERE id = ?1");
        self.db.with_transaction(|conn| {
            let updated = conn.execute(&sql, params![id, value, row::now()])?;
            if updated == 0 {
                return Err(StorageError::not_found("session", id));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "session",
                    op: "updated",
                    id: id.to_string(),
                }],
            ))
        })
    }

    fn fetch(conn: &Connection, id: &str) -> StorageResult<Option<Session>> {
        let session = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(session)
    }

    fn fetch_by_external(
        conn: &Connection,
        external_id: &str,
        source: SessionSource,
        machine_id: &str,
    ) -> StorageResult<Option<Session>> {
        let session = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM sessions
                     WHERE external_id = ?1 AND source = ?2 AND machine_id = ?3
                       AND status != 'expired'"
                ),
                params![external_id, source.to_string(), machine_id],
                Self::map_row,
            )
            .optional()?;
        Ok(session)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
        let source: String = row.get("source")?;
        let status: String = row.get("status")?;
        Ok(Session {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            source: SessionSource::parse(&source).unwrap_or(SessionSource::Claude),
            machine_id: row.get("machine_id")?,
            project_id: row.get("project_id")?,
            parent_session_id: row.get("parent_session_id")?,
            status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Active),
            jsonl_path: row.get("jsonl_path")?,
            summary_markdown: row.get("summary_markdown")?,
            compact_markdown: row.get("compact_markdown")?,
            created_at: row::ts_column(row, "created_at")?,
            updated_at: row::ts_column(row, "updated_at")?,
        })
    }
}

const COLUMNS: &str = "id, external_id, source, machine_id, project_id, parent_session_id, \
                       status, jsonl_path, summary_markdown, compact_markdown, created_at, \
                       updated_at";
