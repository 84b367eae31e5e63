//! The MCP client manager.
//!
//! Registers N server configs, opens transports lazily with per-server
//! single-flight, trips circuit breakers on repeated failures, runs one
//! background health sweep, and records per-call metrics. Metrics and
//! tool-cache writes are best-effort: they never change the outcome of
//! the call that produced them.

use dashmap::DashMap;
use rmcp::model::{CallToolRequestParams, ReadResourceRequestParams};
use rmcp::service::{Peer, RoleClient};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gobby_config::types::McpSection;
use gobby_storage::mcp::{McpStore, RefreshDiff};
use gobby_storage::models::McpServerConfig;

use crate::breaker::{BreakerDecision, CircuitBreaker};
use crate::error::{McpError, McpResult};
use crate::handler::{ProxyClientHandler, ServerNotice};
use crate::transport::{self, ClientSession};
use crate::types::{ConnectionState, HealthState, ServerHealth, ServerStatus, ToolDefinition};

/// Consecutive failed health checks before an out-of-band reconnect is
/// scheduled.
const RECONNECT_AFTER_FAILURES: u32 = 3;

/// Deadline for one background health check.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for closing one session at shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Manager tuning, lifted from the `[mcp]` config section.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Deadline for establishing one connection.
    pub connection_timeout: Duration,
    /// Default deadline for one tool call.
    pub tool_timeout: Duration,
    /// Retries after the initial connect attempt.
    pub max_connection_retries: u32,
    /// Interval between health sweeps.
    pub health_check_interval: Duration,
    /// Failures before the breaker trips.
    pub breaker_threshold: u32,
    /// Breaker cooldown.
    pub breaker_cooldown: Duration,
}

impl From<&McpSection> for ManagerConfig {
    fn from(section: &McpSection) -> Self {
        Self {
            connection_timeout: section.connection_timeout(),
            tool_timeout: section.tool_timeout(),
            max_connection_retries: section.max_connection_retries,
            health_check_interval: section.health_check_interval(),
            breaker_threshold: section.circuit_breaker_failure_threshold,
            breaker_cooldown: section.circuit_breaker_cooldown(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&McpSection::default())
    }
}

struct ServerEntry {
    config: McpServerConfig,
    session: Option<ClientSession>,
    health: ServerHealth,
    breaker: CircuitBreaker,
}

impl ServerEntry {
    fn new(config: McpServerConfig, manager_config: &ManagerConfig) -> Self {
        Self {
            config,
            session: None,
            health: ServerHealth::default(),
            breaker: CircuitBreaker::new(
                manager_config.breaker_threshold,
                manager_config.breaker_cooldown,
            ),
        }
    }
}

/// The manager.
pub struct McpClientManager {
    entries: RwLock<HashMap<String, ServerEntry>>,
    connect_locks: DashMap<String, Arc<Mutex<()>>>,
    config: ManagerConfig,
    store: Option<McpStore>,
    project_id: Option<String>,
    notice_tx: mpsc::UnboundedSender<ServerNotice>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl McpClientManager {
    /// Build a manager over the given configs.
    #[must_use]
    pub fn new(
        configs: Vec<McpServerConfig>,
        config: ManagerConfig,
        store: Option<McpStore>,
        project_id: Option<String>,
    ) -> Arc<Self> {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let entries = configs
            .into_iter()
            .map(|server| (server.name.clone(), ServerEntry::new(server, &config)))
            .collect();

        let manager = Arc::new(Self {
            entries: RwLock::new(entries),
            connect_locks: DashMap::new(),
            config,
            store,
            project_id,
            notice_tx,
            health_task: Mutex::new(None),
            reconnect_tasks: Mutex::new(Vec::new()),
        });

        Self::spawn_notice_listener(&manager, notice_rx);
        manager
    }

    /// Persist server-pushed tool refreshes into the cache.
    fn spawn_notice_listener(
        manager: &Arc<Self>,
        mut notice_rx: mpsc::UnboundedReceiver<ServerNotice>,
    ) {
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            while let Some(notice) = notice_rx.recv().await {
                match notice {
                    ServerNotice::ToolsRefreshed { server_name, tools } => {
                        manager.cache_tools(&server_name, &tools).await;
                        info!(server = %server_name, count = tools.len(), "tools refreshed");
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Configuration surface

    /// Register (or replace) a server config, persisting it.
    ///
    /// # Errors
    ///
    /// Returns an error when persistence fails.
    pub async fn add_server(&self, config: McpServerConfig) -> McpResult<()> {
        if let Some(store) = &self.store {
            store
                .upsert_server(&config)
                .map_err(|e| McpError::Transport(format!("failed to persist server: {e}")))?;
        }
        let mut entries = self.entries.write().await;
        entries.insert(
            config.name.clone(),
            ServerEntry::new(config, &self.config),
        );
        Ok(())
    }

    /// Remove a server: disconnect, drop the entry, delete persistence.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ServerNotConfigured`] for unknown names.
    pub async fn remove_server(&self, name: &str) -> McpResult<()> {
        let entry = {
            let mut entries = self.entries.write().await;
            entries.remove(name).ok_or_else(|| McpError::ServerNotConfigured {
                name: name.to_string(),
            })?
        };
        if let Some(session) = entry.session {
            transport::close_session(name, session, DISCONNECT_TIMEOUT).await;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_server(name, entry.config.project_id.as_deref()) {
                warn!(server = name, error = %e, "failed to remove persisted server");
            }
        }
        Ok(())
    }

    /// Whether a server is configured.
    pub async fn has_server(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// Config for one server.
    pub async fn server_config(&self, name: &str) -> Option<McpServerConfig> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|entry| entry.config.clone())
    }

    /// Status views for every configured server.
    pub async fn server_statuses(&self) -> Vec<ServerStatus> {
        let entries = self.entries.read().await;
        let mut statuses: Vec<ServerStatus> = entries
            .values()
            .map(|entry| ServerStatus {
                name: entry.config.name.clone(),
                project_id: entry.config.project_id.clone(),
                transport: entry.config.transport.to_string(),
                connected: entry.session.is_some(),
                state: entry.health.state,
                description: entry.config.description.clone(),
                enabled: entry.config.enabled,
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Health snapshot for one server.
    pub async fn server_health(&self, name: &str) -> Option<ServerHealth> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|entry| entry.health.clone())
    }

    // ------------------------------------------------------------------
    // Connection lifecycle

    /// Ensure a server is connected and return its peer handle.
    ///
    /// Single-flight per server: concurrent callers serialize on a
    /// per-server lock and re-check after acquisition, so the transport
    /// is opened exactly once.
    ///
    /// # Errors
    ///
    /// Per the connection contract: unknown server, disabled server,
    /// open breaker, timeout, or retries exhausted.
    pub async fn ensure_connected(&self, name: &str) -> McpResult<Peer<RoleClient>> {
        if let Some(peer) = self.connected_peer(name).await? {
            return Ok(peer);
        }

        let lock = self
            .connect_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have connected while we waited.
        if let Some(peer) = self.connected_peer(name).await? {
            return Ok(peer);
        }

        let config = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(name).ok_or_else(|| McpError::ServerNotConfigured {
                name: name.to_string(),
            })?;
            if let BreakerDecision::Refuse { retry_after } = entry.breaker.check() {
                return Err(McpError::CircuitBreakerOpen {
                    name: name.to_string(),
                    retry_after,
                });
            }
            entry.health.state = ConnectionState::Connecting;
            entry.config.clone()
        };

        let attempts = self.config.max_connection_retries.saturating_add(1);
        let mut backoff = Duration::from_millis(500);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let handler =
                ProxyClientHandler::new(name).with_notice_tx(self.notice_tx.clone());
            match tokio::time::timeout(
                self.config.connection_timeout,
                transport::connect(&config, handler),
            )
            .await
            {
                Err(_) => {
                    // A timeout is terminal for this call; the breaker
                    // still learns about it.
                    self.record_connect_failure(name).await;
                    return Err(McpError::ConnectionTimeout);
                }
                Ok(Ok(session)) => {
                    let peer = session.peer().clone();
                    self.record_connected(name, session).await;
                    self.refresh_tool_cache(name, &peer).await;
                    info!(server = name, attempt, "MCP connection established");
                    return Ok(peer);
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    warn!(server = name, attempt, error = %last_error, "connect attempt failed");
                    self.record_connect_failure(name).await;
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(8));
                    }
                }
            }
        }

        Err(McpError::ConnectFailed {
            name: name.to_string(),
            attempts,
            reason: last_error,
        })
    }

    async fn connected_peer(&self, name: &str) -> McpResult<Option<Peer<RoleClient>>> {
        let entries = self.entries.read().await;
        let entry = entries.get(name).ok_or_else(|| McpError::ServerNotConfigured {
            name: name.to_string(),
        })?;
        if !entry.config.enabled {
            return Err(McpError::Disabled {
                name: name.to_string(),
            });
        }
        Ok(entry.session.as_ref().map(|s| s.peer().clone()))
    }

    async fn record_connected(&self, name: &str, session: ClientSession) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.session = Some(session);
            entry.health.state = ConnectionState::Connected;
            entry.health.health = HealthState::Healthy;
            entry.health.consecutive_failures = 0;
            entry.breaker.record_success();
        }
    }

    async fn record_connect_failure(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.health.state = ConnectionState::Failed;
            entry.health.health = HealthState::Unhealthy;
            entry.health.consecutive_failures =
                entry.health.consecutive_failures.saturating_add(1);
            entry.breaker.record_failure();
        }
    }

    /// Disconnect one server (keeps its config).
    pub async fn disconnect(&self, name: &str) {
        let session = {
            let mut entries = self.entries.write().await;
            entries.get_mut(name).and_then(|entry| {
                entry.health.state = ConnectionState::Disconnected;
                entry.session.take()
            })
        };
        if let Some(session) = session {
            transport::close_session(name, session, DISCONNECT_TIMEOUT).await;
        }
    }

    /// Reconnect one server (disconnect, then a fresh connect).
    ///
    /// # Errors
    ///
    /// Propagates `ensure_connected` failures.
    pub async fn reconnect(&self, name: &str) -> McpResult<()> {
        self.disconnect(name).await;
        self.ensure_connected(name).await.map(|_| ())
    }

    /// Cancel background work and close every session with a bounded
    /// timeout. Errors are logged, never raised.
    pub async fn disconnect_all(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.abort();
        }
        for task in self.reconnect_tasks.lock().await.drain(..) {
            task.abort();
        }

        let sessions: Vec<(String, ClientSession)> = {
            let mut entries = self.entries.write().await;
            entries
                .iter_mut()
                .filter_map(|(name, entry)| {
                    entry.health = ServerHealth::default();
                    entry.session.take().map(|s| (name.clone(), s))
                })
                .collect()
        };
        for (name, session) in sessions {
            transport::close_session(&name, session, DISCONNECT_TIMEOUT).await;
        }
        debug!("all MCP servers disconnected");
    }

    // ------------------------------------------------------------------
    // Calls

    /// Call a tool with a hard deadline, recording metrics either way.
    ///
    /// # Errors
    ///
    /// Connection errors, [`McpError::Timeout`] on deadline, or
    /// [`McpError::ToolCallFailed`].
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        let peer = self.ensure_connected(server).await?;
        let deadline = timeout.unwrap_or(self.config.tool_timeout);

        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                Some(map)
            }
        };
        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(tool.to_string()),
            arguments,
            task: None,
        };

        debug!(server, tool, "calling MCP tool");
        let started = Instant::now();
        let outcome = tokio::time::timeout(deadline, peer.call_tool(params)).await;
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match outcome {
            Err(_) => {
                self.record_metrics(server, tool, false, latency_ms).await;
                self.bump_call_failure(server).await;
                Err(McpError::Timeout { timeout: deadline })
            }
            Ok(Err(e)) => {
                self.record_metrics(server, tool, false, latency_ms).await;
                self.bump_call_failure(server).await;
                Err(McpError::ToolCallFailed {
                    server: server.to_string(),
                    tool: tool.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(result)) => {
                self.record_metrics(server, tool, true, latency_ms).await;
                serde_json::to_value(result)
                    .map_err(|e| McpError::Transport(format!("unserializable result: {e}")))
            }
        }
    }

    /// Read a resource from a server.
    ///
    /// # Errors
    ///
    /// Connection or transport errors.
    pub async fn read_resource(&self, server: &str, uri: &str) -> McpResult<Value> {
        let peer = self.ensure_connected(server).await?;
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let result = peer
            .read_resource(params)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        serde_json::to_value(result)
            .map_err(|e| McpError::Transport(format!("unserializable resource: {e}")))
    }

    /// Live tool list for a server (connects lazily).
    ///
    /// # Errors
    ///
    /// Connection or transport errors.
    pub async fn list_tools(&self, server: &str) -> McpResult<Vec<ToolDefinition>> {
        let peer = self.ensure_connected(server).await?;
        let tools = peer
            .list_all_tools()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        Ok(tools
            .iter()
            .map(|t| ToolDefinition::from_rmcp(t, server))
            .collect())
    }

    /// Input schema for one tool, from the cache first, live as a
    /// fallback.
    ///
    /// # Errors
    ///
    /// [`McpError::ToolNotFound`] when neither cache nor server knows
    /// the tool.
    pub async fn get_tool_input_schema(&self, server: &str, tool: &str) -> McpResult<Value> {
        if let (Some(store), Some(config)) = (&self.store, self.server_config(server).await) {
            if let Ok(cached) = store.cached_tools(server, config.project_id.as_deref()) {
                if let Some(hit) = cached.iter().find(|t| t.tool_name == tool) {
                    return Ok(hit.input_schema.clone());
                }
            }
        }
        let live = self.list_tools(server).await?;
        live.into_iter()
            .find(|t| t.name == tool)
            .map(|t| t.input_schema)
            .ok_or_else(|| McpError::ToolNotFound {
                server: server.to_string(),
                tool: tool.to_string(),
            })
    }

    /// Refresh the persisted tool cache for one server, diffing by
    /// schema hash.
    ///
    /// # Errors
    ///
    /// Connection or transport errors; cache write failures are logged.
    pub async fn refresh_tools(&self, server: &str) -> McpResult<RefreshDiff> {
        let tools = self.list_tools(server).await?;
        Ok(self.cache_tools(server, &tools).await)
    }

    async fn refresh_tool_cache(&self, server: &str, peer: &Peer<RoleClient>) {
        match peer.list_all_tools().await {
            Ok(tools) => {
                let tools: Vec<ToolDefinition> = tools
                    .iter()
                    .map(|t| ToolDefinition::from_rmcp(t, server))
                    .collect();
                self.cache_tools(server, &tools).await;
            }
            Err(e) => warn!(server, error = %e, "failed to list tools after connect"),
        }
    }

    async fn cache_tools(&self, server: &str, tools: &[ToolDefinition]) -> RefreshDiff {
        let Some(store) = &self.store else {
            return RefreshDiff::default();
        };
        let project = self
            .server_config(server)
            .await
            .and_then(|c| c.project_id)
            .or_else(|| self.project_id.clone());
        let rows: Vec<(String, Option<String>, Value)> = tools
            .iter()
            .map(|t| (t.name.clone(), t.description.clone(), t.input_schema.clone()))
            .collect();
        match store.refresh_tools(server, project.as_deref(), &rows) {
            Ok(diff) => diff,
            Err(e) => {
                warn!(server, error = %e, "failed to persist tool cache");
                RefreshDiff::default()
            }
        }
    }

    async fn record_metrics(&self, server: &str, tool: &str, success: bool, latency_ms: i64) {
        let Some(store) = &self.store else { return };
        let project = self
            .server_config(server)
            .await
            .and_then(|c| c.project_id)
            .or_else(|| self.project_id.clone());
        let Some(project) = project else { return };
        // Metrics failures never affect the call result.
        if let Err(e) = store.record_tool_call(&project, server, tool, success, latency_ms) {
            warn!(server, tool, error = %e, "failed to record tool metrics");
        }
    }

    async fn bump_call_failure(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.health.consecutive_failures =
                entry.health.consecutive_failures.saturating_add(1);
        }
    }

    // ------------------------------------------------------------------
    // Health monitor

    /// Start the background health sweep. Idempotent.
    pub async fn start_health_monitor(self: &Arc<Self>) {
        let mut slot = self.health_task.lock().await;
        if slot.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(manager.config.health_check_interval).await;
                manager.health_sweep().await;
            }
        }));
        debug!("MCP health monitor started");
    }

    /// One sweep over every connected server. Never dies on errors.
    async fn health_sweep(self: &Arc<Self>) {
        let peers: Vec<(String, Peer<RoleClient>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter_map(|(name, entry)| {
                    entry
                        .session
                        .as_ref()
                        .map(|s| (name.clone(), s.peer().clone()))
                })
                .collect()
        };

        for (name, peer) in peers {
            let started = Instant::now();
            let healthy = matches!(
                tokio::time::timeout(HEALTH_CHECK_TIMEOUT, peer.list_all_tools()).await,
                Ok(Ok(_))
            );
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let schedule_reconnect = {
                let mut entries = self.entries.write().await;
                let Some(entry) = entries.get_mut(&name) else {
                    continue;
                };
                entry.health.last_health_check = Some(chrono::Utc::now());
                if healthy {
                    entry.health.health = HealthState::Healthy;
                    entry.health.response_time_ms = Some(elapsed_ms);
                    entry.health.consecutive_failures = 0;
                    false
                } else {
                    entry.health.health = HealthState::Unhealthy;
                    entry.health.consecutive_failures =
                        entry.health.consecutive_failures.saturating_add(1);
                    entry.health.consecutive_failures >= RECONNECT_AFTER_FAILURES
                }
            };

            if schedule_reconnect {
                warn!(server = %name, "sustained unhealthy; scheduling reconnect");
                let manager = Arc::clone(self);
                let server = name.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = manager.reconnect(&server).await {
                        warn!(server = %server, error = %e, "background reconnect failed");
                    }
                });
                self.reconnect_tasks.lock().await.push(task);
            }
        }
    }
}

impl std::fmt::Debug for McpClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobby_storage::Database;
    use gobby_storage::models::McpTransport;

    fn stdio_config(name: &str, enabled: bool) -> McpServerConfig {
        McpServerConfig {
            name: name.into(),
            project_id: Some("proj".into()),
            transport: McpTransport::Stdio,
            url: None,
            command: Some("definitely-not-a-real-mcp-binary".into()),
            args: Vec::new(),
            env: HashMap::new(),
            headers: HashMap::new(),
            enabled,
            description: None,
        }
    }

    fn fast_config() -> ManagerConfig {
        ManagerConfig {
            connection_timeout: Duration::from_millis(500),
            tool_timeout: Duration::from_secs(1),
            max_connection_retries: 1,
            health_check_interval: Duration::from_secs(60),
            breaker_threshold: 2,
            breaker_cooldown: Duration::from_secs(60),
        }
    }

    fn manager(configs: Vec<McpServerConfig>) -> Arc<McpClientManager> {
        let store = McpStore::new(Database::open_in_memory().unwrap());
        McpClientManager::new(configs, fast_config(), Some(store), Some("proj".into()))
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let manager = manager(vec![]);
        let err = manager.ensure_connected("unknown").await.unwrap_err();
        assert_eq!(err.to_string(), "Server 'unknown' not configured");
    }

    #[tokio::test]
    async fn test_disabled_server() {
        let manager = manager(vec![stdio_config("off", false)]);
        let err = manager.ensure_connected("off").await.unwrap_err();
        assert_eq!(err.to_string(), "Server 'off' is disabled");
    }

    #[tokio::test]
    async fn test_connect_failure_retries_then_errors() {
        let manager = manager(vec![stdio_config("bad", true)]);
        let err = manager.ensure_connected("bad").await.unwrap_err();
        assert!(matches!(err, McpError::ConnectFailed { attempts: 2, .. }));

        let health = manager.server_health("bad").await.unwrap();
        assert_eq!(health.state, ConnectionState::Failed);
        assert!(health.consecutive_failures >= 2);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_threshold() {
        let manager = manager(vec![stdio_config("bad", true)]);
        // Threshold 2, so one call (initial + 1 retry) trips it.
        let _ = manager.ensure_connected("bad").await;
        let err = manager.ensure_connected("bad").await.unwrap_err();
        assert!(matches!(
            err,
            McpError::CircuitBreakerOpen {
                retry_after: Some(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_breaker_half_open_after_cooldown() {
        let mut config = fast_config();
        config.breaker_cooldown = Duration::from_millis(10);
        let store = McpStore::new(Database::open_in_memory().unwrap());
        let manager = McpClientManager::new(
            vec![stdio_config("bad", true)],
            config,
            Some(store),
            Some("proj".into()),
        );

        let _ = manager.ensure_connected("bad").await; // trips the breaker
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Cooldown elapsed: the probe goes through (and fails again on
        // connect, not on the breaker).
        let err = manager.ensure_connected("bad").await.unwrap_err();
        assert!(matches!(err, McpError::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_callers_single_flight() {
        let manager = manager(vec![stdio_config("bad", true)]);
        let (a, b) = tokio::join!(
            manager.ensure_connected("bad"),
            manager.ensure_connected("bad")
        );
        // Both observe an error; the second call either saw the breaker
        // (the first exhausted it) or its own connect failure. Neither
        // panics and no session leaked.
        assert!(a.is_err());
        assert!(b.is_err());
        assert!(manager.server_health("bad").await.unwrap().state != ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_call_tool_on_unconfigured_server() {
        let manager = manager(vec![]);
        let err = manager
            .call_tool("ghost", "tool", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ServerNotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_add_and_remove_server() {
        let manager = manager(vec![]);
        manager.add_server(stdio_config("dyn", true)).await.unwrap();
        assert!(manager.has_server("dyn").await);

        let statuses = manager.server_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "dyn");
        assert!(!statuses[0].connected);

        manager.remove_server("dyn").await.unwrap();
        assert!(!manager.has_server("dyn").await);
        assert!(manager.remove_server("dyn").await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_all_clears_state() {
        let manager = manager(vec![stdio_config("bad", true)]);
        let _ = manager.ensure_connected("bad").await;
        manager.start_health_monitor().await;
        manager.disconnect_all().await;

        let health = manager.server_health("bad").await.unwrap();
        assert_eq!(health.state, ConnectionState::Disconnected);
        assert_eq!(health.consecutive_failures, 0);
        // Config survives a disconnect.
        assert!(manager.has_server("bad").await);
    }
}
