//! Schema migrations.
//!
//! Versioned by `PRAGMA user_version`. Each entry runs once, in order,
//! inside the caller's connection; a fresh store replays the whole list.

use rusqlite::Connection;

use crate::error::StorageResult;

const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    r"
    CREATE TABLE projects (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        path        TEXT,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );

    CREATE TABLE sessions (
        id                 TEXT PRIMARY KEY,
        external_id        TEXT NOT NULL,
        source             TEXT NOT NULL,
        machine_id         TEXT NOT NULL,
        project_id         TEXT NOT NULL REFERENCES projects(id),
        parent_session_id  TEXT REFERENCES sessions(id),
        status             TEXT NOT NULL DEFAULT 'active',
        jsonl_path         TEXT,
        summary_markdown   TEXT,
        compact_markdown   TEXT,
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL
    );
    CREATE UNIQUE INDEX idx_sessions_external
        ON sessions(external_id, source, machine_id)
        WHERE status != 'expired';
    CREATE INDEX idx_sessions_handoff
        ON sessions(machine_id, source, project_id, status);

    CREATE TABLE tasks (
        id                    TEXT PRIMARY KEY,
        project_id            TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        parent_task_id        TEXT REFERENCES tasks(id) ON DELETE SET NULL,
        title                 TEXT NOT NULL,
        description           TEXT,
        status                TEXT NOT NULL DEFAULT 'open',
        priority              INTEGER NOT NULL DEFAULT 999,
        task_type             TEXT,
        labels                TEXT NOT NULL DEFAULT '[]',
        assignee              TEXT,
        commits               TEXT NOT NULL DEFAULT '[]',
        workflow_name         TEXT,
        sequence_order        INTEGER,
        validation_criteria   TEXT,
        validation_status     TEXT NOT NULL DEFAULT 'none',
        escalation_reason     TEXT,
        closed_in_session_id  TEXT,
        closed_commit_sha     TEXT,
        closed_reason         TEXT,
        closed_at             TEXT,
        seq_num               INTEGER NOT NULL,
        path_cache            TEXT NOT NULL,
        created_at            TEXT NOT NULL,
        updated_at            TEXT NOT NULL,
        UNIQUE (project_id, seq_num)
    );
    CREATE INDEX idx_tasks_parent ON tasks(parent_task_id);
    CREATE INDEX idx_tasks_project_status ON tasks(project_id, status);

    CREATE TABLE task_dependencies (
        task_id             TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        depends_on_task_id  TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        dep_type            TEXT NOT NULL DEFAULT 'blocks',
        PRIMARY KEY (task_id, depends_on_task_id)
    );
    CREATE INDEX idx_deps_reverse ON task_dependencies(depends_on_task_id);

    CREATE TABLE task_comments (
        id          TEXT PRIMARY KEY,
        task_id     TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        body        TEXT NOT NULL,
        author      TEXT,
        created_at  TEXT NOT NULL
    );

    CREATE TABLE session_tasks (
        session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        task_id     TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        action      TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        PRIMARY KEY (session_id, task_id, action)
    );

    CREATE TABLE worktrees (
        id                TEXT PRIMARY KEY,
        project_id        TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        branch_name       TEXT NOT NULL,
        worktree_path     TEXT NOT NULL,
        base_branch       TEXT NOT NULL,
        status            TEXT NOT NULL DEFAULT 'active',
        task_id           TEXT REFERENCES tasks(id) ON DELETE SET NULL,
        agent_session_id  TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL
    );
    CREATE UNIQUE INDEX idx_worktrees_branch
        ON worktrees(project_id, branch_name)
        WHERE status = 'active';
    CREATE INDEX idx_worktrees_task ON worktrees(task_id);

    CREATE TABLE workflow_states (
        session_id        TEXT PRIMARY KEY REFERENCES sessions(id) ON DELETE CASCADE,
        workflow_name     TEXT,
        step              TEXT,
        variables         TEXT NOT NULL DEFAULT '{}',
        observations      TEXT NOT NULL DEFAULT '[]',
        reserved_slots    INTEGER NOT NULL DEFAULT 0,
        spawned_agents    TEXT NOT NULL DEFAULT '[]',
        context_injected  INTEGER NOT NULL DEFAULT 0,
        updated_at        TEXT NOT NULL
    );

    CREATE TABLE mcp_servers (
        name        TEXT NOT NULL,
        project_id  TEXT NOT NULL DEFAULT '',
        transport   TEXT NOT NULL,
        url         TEXT,
        command     TEXT,
        args        TEXT NOT NULL DEFAULT '[]',
        env         TEXT NOT NULL DEFAULT '{}',
        headers     TEXT NOT NULL DEFAULT '{}',
        enabled     INTEGER NOT NULL DEFAULT 1,
        description TEXT,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        PRIMARY KEY (name, project_id)
    );

    CREATE TABLE cached_tools (
        server_name   TEXT NOT NULL,
        project_id    TEXT NOT NULL DEFAULT '',
        tool_name     TEXT NOT NULL,
        description   TEXT,
        input_schema  TEXT NOT NULL DEFAULT '{}',
        schema_hash   TEXT NOT NULL,
        updated_at    TEXT NOT NULL,
        PRIMARY KEY (server_name, project_id, tool_name)
    );

    CREATE TABLE tool_metrics (
        project_id        TEXT NOT NULL,
        server_name       TEXT NOT NULL,
        tool_name         TEXT NOT NULL,
        call_count        INTEGER NOT NULL DEFAULT 0,
        success_count     INTEGER NOT NULL DEFAULT 0,
        total_latency_ms  INTEGER NOT NULL DEFAULT 0,
        last_called_at    TEXT,
        PRIMARY KEY (project_id, server_name, tool_name)
    );

    CREATE TABLE secrets (
        name        TEXT PRIMARY KEY,
        category    TEXT NOT NULL DEFAULT 'general',
        ciphertext  BLOB NOT NULL,
        nonce       BLOB NOT NULL,
        created_at  TEXT NOT NULL
    );
    ",
];

/// Apply pending migrations.
///
/// # Errors
///
/// Returns an error if any migration statement fails.
pub fn run(conn: &Connection) -> StorageResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let applied = usize::try_from(version).unwrap_or(0);

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
        conn.execute_batch(sql)?;
        let next = index + 1;
        conn.pragma_update(None, "user_version", next as i64)?;
        tracing::info!(version = next, "applied store migration");
    }
    Ok(())
}
