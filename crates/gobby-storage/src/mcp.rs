//! MCP persistence: server configs, cached tool schemas, call metrics.
//!
//! Project scope is stored as an empty string for install-global servers
//! so the composite keys stay NOT NULL.

use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{CachedTool, McpServerConfig, McpTransport, ToolMetric};
use crate::row;

/// Outcome of a cached-tool refresh, keyed by schema hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RefreshDiff {
    /// Tools seen for the first time.
    pub new: u32,
    /// Tools whose schema hash changed.
    pub changed: u32,
    /// Tools whose schema hash is identical.
    pub unchanged: u32,
    /// Previously cached tools that disappeared.
    pub removed: u32,
}

/// Store for MCP server configs, tool caches and metrics.
#[derive(Debug, Clone)]
pub struct McpStore {
    db: Database,
}

impl McpStore {
    /// Wrap the shared handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Server configs

    /// Insert or replace a server config.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn upsert_server(&self, config: &McpServerConfig) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO mcp_servers
                     (name, project_id, transport, url, command, args, env, headers, enabled,
                      description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT(name, project_id) DO UPDATE SET
                     transport = excluded.transport,
                     url = excluded.url,
                     command = excluded.command,
                     args = excluded.args,
                     env = excluded.env,
                     headers = excluded.headers,
                     enabled = excluded.enabled,
                     description = excluded.description,
                     updated_at = excluded.updated_at",
                params![
                    config.name,
                    scope(config.project_id.as_deref()),
                    config.transport.as_str(),
                    config.url,
                    config.command,
                    serde_json::to_string(&config.args)?,
                    serde_json::to_string(&config.env)?,
                    serde_json::to_string(&config.headers)?,
                    i64::from(config.enabled),
                    config.description,
                    row::now()
                ],
            )?;
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "mcp_server",
                    op: "updated",
                    id: config.name.clone(),
                }],
            ))
        })
    }

    /// Remove a server config (cached tools cascade via explicit delete).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the server is unknown.
    pub fn remove_server(&self, name: &str, project_id: Option<&str>) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let deleted = conn.execute(
                "DELETE FROM mcp_servers WHERE name = ?1 AND project_id = ?2",
                params![name, scope(project_id)],
            )?;
            if deleted == 0 {
                return Err(StorageError::not_found("mcp server", name));
            }
            conn.execute(
                "DELETE FROM cached_tools WHERE server_name = ?1 AND project_id = ?2",
                params![name, scope(project_id)],
            )?;
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "mcp_server",
                    op: "deleted",
                    id: name.to_string(),
                }],
            ))
        })
    }

    /// Fetch one server config.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_server(
        &self,
        name: &str,
        project_id: Option<&str>,
    ) -> StorageResult<Option<McpServerConfig>> {
        self.db.with_conn(|conn| {
            let config = conn
                .query_row(
                    "SELECT name, project_id, transport, url, command, args, env, headers,
                            enabled, description
                     FROM mcp_servers WHERE name = ?1 AND project_id = ?2",
                    params![name, scope(project_id)],
                    Self::map_server,
                )
                .optional()?;
            Ok(config)
        })
    }

    /// List configs visible to a project (its own plus install-global).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list_servers(&self, project_id: Option<&str>) -> StorageResult<Vec<McpServerConfig>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, project_id, transport, url, command, args, env, headers,
                        enabled, description
                 FROM mcp_servers
                 WHERE project_id = '' OR project_id = ?1
                 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![project_id.unwrap_or("")], Self::map_server)?;
            let mut configs = Vec::new();
            for config in rows {
                configs.push(config?);
            }
            Ok(configs)
        })
    }

    // ------------------------------------------------------------------
    // Cached tools

    /// Replace the cached tool list for a server, diffing by schema hash.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn refresh_tools(
        &self,
        server_name: &str,
        project_id: Option<&str>,
        tools: &[(String, Option<String>, Value)],
    ) -> StorageResult<RefreshDiff> {
        self.db.with_transaction(|conn| {
            let mut previous: std::collections::HashMap<String, String> = {
                let mut stmt = conn.prepare(
                    "SELECT tool_name, schema_hash FROM cached_tools
                     WHERE server_name = ?1 AND project_id = ?2",
                )?;
                let rows = stmt.query_map(params![server_name, scope(project_id)], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                })?;
                let mut map = std::collections::HashMap::new();
                for entry in rows {
                    let (name, hash) = entry?;
                    map.insert(name, hash);
                }
                map
            };

            let mut diff = RefreshDiff::default();
            let now = row::now();
            for (tool_name, description, input_schema) in tools {
                let hash = schema_hash(input_schema);
                match previous.remove(tool_name) {
                    None => diff.new += 1,
                    Some(old) if old == hash => diff.unchanged += 1,
                    Some(_) => diff.changed += 1,
                }
                conn.execute(
                    "INSERT INTO cached_tools
                         (server_name, project_id, tool_name, description, input_schema,
                          schema_hash, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(server_name, project_id, tool_name) DO UPDATE SET
                         description = excluded.description,
                         input_schema = excluded.input_schema,
                         schema_hash = excluded.schema_hash,
                         updated_at = excluded.updated_at",
                    params![
                        server_name,
                        scope(project_id),
                        tool_name,
                        description,
                        serde_json::to_string(input_schema)?,
                        hash,
                        now
                    ],
                )?;
            }

            // Whatever is left disappeared upstream.
            for (tool_name, _) in previous {
                diff.removed += 1;
                conn.execute(
                    "DELETE FROM cached_tools
                     WHERE server_name = ?1 AND project_id = ?2 AND tool_name = ?3",
                    params![server_name, scope(project_id), tool_name],
                )?;
            }

            Ok((diff, Vec::new()))
        })
    }

    /// Cached tools for a server.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn cached_tools(
        &self,
        server_name: &str,
        project_id: Option<&str>,
    ) -> StorageResult<Vec<CachedTool>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT server_name, project_id, tool_name, description, input_schema, schema_hash
                 FROM cached_tools
                 WHERE server_name = ?1 AND project_id = ?2
                 ORDER BY tool_name",
            )?;
            let rows = stmt.query_map(params![server_name, scope(project_id)], |r| {
                let project: String = r.get("project_id")?;
                let raw_schema: String = r.get("input_schema")?;
                Ok(CachedTool {
                    server_name: r.get("server_name")?,
                    project_id: if project.is_empty() { None } else { Some(project) },
                    tool_name: r.get("tool_name")?,
                    description: r.get("description")?,
                    input_schema: serde_json::from_str(&raw_schema).unwrap_or(Value::Null),
                    schema_hash: r.get("schema_hash")?,
                })
            })?;
            let mut tools = Vec::new();
            for tool in rows {
                tools.push(tool?);
            }
            Ok(tools)
        })
    }

    // ------------------------------------------------------------------
    // Metrics

    /// Record one tool call. Success bumps `success_count`; latency
    /// accumulates either way.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn record_tool_call(
        &self,
        project_id: &str,
        server_name: &str,
        tool_name: &str,
        success: bool,
        latency_ms: i64,
    ) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO tool_metrics
                     (project_id, server_name, tool_name, call_count, success_count,
                      total_latency_ms, last_called_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
                 ON CONFLICT(project_id, server_name, tool_name) DO UPDATE SET
                     call_count = call_count + 1,
                     success_count = success_count + ?4,
                     total_latency_ms = total_latency_ms + ?5,
                     last_called_at = ?6",
                params![
                    project_id,
                    server_name,
                    tool_name,
                    i64::from(success),
                    latency_ms.max(0),
                    row::now()
                ],
            )?;
            Ok(((), Vec::new()))
        })
    }

    /// Fetch metrics for one tool.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn tool_metric(
        &self,
        project_id: &str,
        server_name: &str,
        tool_name: &str,
    ) -> StorageResult<ToolMetric> {
        self.db.with_conn(|conn| {
            let metric = conn
                .query_row(
                    "SELECT call_count, success_count, total_latency_ms, last_called_at
                     FROM tool_metrics
                     WHERE project_id = ?1 AND server_name = ?2 AND tool_name = ?3",
                    params![project_id, server_name, tool_name],
                    |r| {
                        Ok(ToolMetric {
                            call_count: r.get(0)?,
                            success_count: r.get(1)?,
                            total_latency_ms: r.get(2)?,
                            last_called_at: row::opt_ts_column(r, "last_called_at")?,
                        })
                    },
                )
                .optional()?;
            Ok(metric.unwrap_or_default())
        })
    }

    fn map_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<McpServerConfig> {
        let project: String = row.get("project_id")?;
        let transport: String = row.get("transport")?;
        Ok(McpServerConfig {
            name: row.get("name")?,
            project_id: if project.is_empty() { None } else { Some(project) },
            transport: McpTransport::parse(&transport).unwrap_or(McpTransport::Stdio),
            url: row.get("url")?,
            command: row.get("command")?,
            args: row::json_column(row, "args")?,
            env: row::json_column(row, "env")?,
            headers: row::json_column(row, "headers")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            description: row.get("description")?,
        })
    }
}

fn scope(project_id: Option<&str>) -> String {
    project_id.unwrap_or("").to_string()
}

/// Stable hash of a tool input schema.
#[must_use]
pub fn schema_hash(schema: &Value) -> String {
    let canonical = serde_json::to_string(schema).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> McpStore {
        McpStore::new(Database::open_in_memory().unwrap())
    }

    fn config(name: &str, project: Option<&str>) -> McpServerConfig {
        McpServerConfig {
            name: name.into(),
            project_id: project.map(str::to_string),
            transport: McpTransport::Stdio,
            url: None,
            command: Some("server-bin".into()),
            args: vec!["--stdio".into()],
            env: Default::default(),
            headers: Default::default(),
            enabled: true,
            description: None,
        }
    }

    #[test]
    fn test_server_upsert_and_scope() {
        let store = store();
        store.upsert_server(&config("ctx", None)).unwrap();
        store.upsert_server(&config("ctx", Some("proj"))).unwrap();

        // Same name in two scopes coexists.
        assert!(store.get_server("ctx", None).unwrap().is_some());
        assert!(store.get_server("ctx", Some("proj")).unwrap().is_some());

        // A project sees its own and global servers.
        let visible = store.list_servers(Some("proj")).unwrap();
        assert_eq!(visible.len(), 2);
        // Another project sees only global.
        let visible = store.list_servers(Some("other")).unwrap();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].project_id.is_none());
    }

    #[test]
    fn test_remove_server_drops_cached_tools() {
        let store = store();
        store.upsert_server(&config("ctx", None)).unwrap();
        store
            .refresh_tools("ctx", None, &[("lookup".into(), None, json!({"type": "object"}))])
            .unwrap();
        store.remove_server("ctx", None).unwrap();
        assert!(store.cached_tools("ctx", None).unwrap().is_empty());
        assert!(store.remove_server("ctx", None).is_err());
    }

    #[test]
    fn test_refresh_diff_counts() {
        let store = store();
        let first = store
            .refresh_tools(
                "ctx",
                None,
                &[
                    ("a".into(), None, json!({"v": 1})),
                    ("b".into(), None, json!({"v": 1})),
                ],
            )
            .unwrap();
        assert_eq!(first, RefreshDiff { new: 2, ..RefreshDiff::default() });

        let second = store
            .refresh_tools(
                "ctx",
                None,
                &[
                    ("a".into(), None, json!({"v": 2})), // changed
                    ("c".into(), None, json!({"v": 1})), // new
                ],
            )
            .unwrap();
        assert_eq!(second.new, 1);
        assert_eq!(second.changed, 1);
        assert_eq!(second.unchanged, 0);
        assert_eq!(second.removed, 1); // b disappeared

        let tools = store.cached_tools("ctx", None).unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.tool_name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_metrics_accumulate() {
        let store = store();
        store.record_tool_call("proj", "ctx", "lookup", true, 12).unwrap();
        store.record_tool_call("proj", "ctx", "lookup", false, 30).unwrap();

        let metric = store.tool_metric("proj", "ctx", "lookup").unwrap();
        assert_eq!(metric.call_count, 2);
        assert_eq!(metric.success_count, 1);
        assert_eq!(metric.total_latency_ms, 42);
        assert!(metric.last_called_at.is_some());

        let absent = store.tool_metric("proj", "ctx", "other").unwrap();
        assert_eq!(absent.call_count, 0);
    }

    #[test]
    fn test_schema_hash_is_stable() {
        let schema = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        assert_eq!(schema_hash(&schema), schema_hash(&schema.clone()));
        assert_ne!(schema_hash(&schema), schema_hash(&json!({"type": "object"})));
    }
}
