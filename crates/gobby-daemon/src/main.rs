//! `gobbyd` — the Gobby daemon.
//!
//! Wires the stack together: rotating file logs under `~/.gobby/logs`,
//! layered config, the SQLite store (with startup reconciliation of
//! leaked orchestration reservations), the workflow engine, the hook
//! dispatcher, the MCP client manager, and the HTTP/WS boundary.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use gobby_agents::{
    AgentOrchestrator, AgentRunner, GitCli, GitStatusCli, OrchestratorDefaults, SpawnerSet,
};
use gobby_hooks::{DaemonStatus, HealthMonitor, HookBroadcaster, HookDispatcher, StatusProbe};
use gobby_llm::DisabledProvider;
use gobby_mcp::{ManagerConfig, McpClientManager};
use gobby_server::DaemonContext;
use gobby_storage::Database;
use gobby_storage::dependencies::DependencyStore;
use gobby_storage::mcp::McpStore;
use gobby_storage::projects::ProjectStore;
use gobby_storage::secrets::SecretStore;
use gobby_storage::session_tasks::SessionTaskStore;
use gobby_storage::sessions::SessionStore;
use gobby_storage::tasks::TaskStore;
use gobby_storage::workflow_state::WorkflowStateStore;
use gobby_storage::worktrees::WorktreeStore;
use gobby_workflows::{ActionExecutor, WorkflowEngine, WorkflowLoader};

#[derive(Debug, Parser)]
#[command(name = "gobbyd", about = "Gobby developer daemon", version)]
struct Args {
    /// HTTP port (overrides configuration).
    #[arg(long)]
    port: Option<u16>,

    /// Log to stderr instead of the rotating file.
    #[arg(long)]
    stderr_logs: bool,
}

/// Readiness probe backed by the store: the daemon is ready when its
/// database answers.
struct StoreProbe {
    db: Database,
}

#[async_trait]
impl StatusProbe for StoreProbe {
    async fn check(&self) -> DaemonStatus {
        let probe = self
            .db
            .with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?));
        match probe {
            Ok(_) => DaemonStatus::ready(),
            Err(e) => DaemonStatus::not_ready("degraded", e.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(args.stderr_logs)?;

    let mut config = gobby_config::load(None).context("loading configuration")?;
    if let Some(port) = args.port {
        config.daemon.port = port;
    }

    let db_path = gobby_core::dirs::database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("opening store at {}", db_path.display()))?;

    let projects = ProjectStore::new(db.clone());
    projects.ensure_reserved().context("seeding reserved projects")?;

    // Reservations only mean something inside a live orchestrate call;
    // anything that survived a restart is leaked.
    let states = WorkflowStateStore::new(db.clone());
    let cleared = states
        .reset_reserved_slots()
        .context("reconciling orchestration reservations")?;
    if cleared > 0 {
        warn!(rows = cleared, "cleared leaked orchestration reservations at startup");
    }

    let sessions = SessionStore::new(db.clone());
    let session_tasks = SessionTaskStore::new(db.clone());
    let tasks = TaskStore::new(db.clone());
    let worktrees = WorktreeStore::new(db.clone());
    let llm: Arc<dyn gobby_llm::LlmProvider> = Arc::new(DisabledProvider);

    // MCP manager over the persisted global server configs.
    let mcp_store = McpStore::new(db.clone());
    let mcp = McpClientManager::new(
        mcp_store.list_servers(None).unwrap_or_default(),
        ManagerConfig::from(&config.mcp),
        Some(mcp_store),
        None,
    );
    mcp.start_health_monitor().await;

    // Workflow engine with the orchestrator wired into its actions.
    let loader = WorkflowLoader::new();
    let orchestrator = Arc::new(AgentOrchestrator::new(
        tasks.clone(),
        worktrees.clone(),
        states.clone(),
        projects.clone(),
        AgentRunner::new(sessions.clone(), config.agents.max_agent_depth),
        Arc::new(GitCli::new()),
        SpawnerSet::process_backed(),
        loader.clone(),
        OrchestratorDefaults {
            provider: config.agents.default_provider.clone(),
            workflow: config.agents.default_workflow.clone(),
            max_concurrent: i64::from(config.agents.default_max_concurrent),
        },
    ));
    let executor = ActionExecutor::new(
        sessions.clone(),
        session_tasks.clone(),
        worktrees.clone(),
        states.clone(),
        llm.clone(),
    )
    .with_git(Arc::new(GitStatusCli))
    .with_orchestrator(orchestrator)
    .with_compact_handoff(config.workflows.enable_compact_handoff);
    let engine = Arc::new(WorkflowEngine::new(loader, states.clone(), executor));

    let health = HealthMonitor::start(
        Arc::new(StoreProbe { db: db.clone() }),
        config.health_check_interval(),
    );
    let dispatcher = Arc::new(HookDispatcher::new(
        sessions.clone(),
        session_tasks,
        projects.clone(),
        engine,
        health,
        HookBroadcaster::new(),
    ));

    let context = DaemonContext {
        dispatcher: Some(dispatcher.clone()),
        db: db.clone(),
        tasks,
        dependencies: DependencyStore::new(db.clone()),
        projects,
        sessions,
        secrets: SecretStore::new(db.clone()),
        mcp: mcp.clone(),
        llm,
        config_home: None,
    };

    write_pid_file()?;

    // Dedicated event-stream listener; subscribers that only want the
    // websocket feed never touch the REST port.
    let ws_address = format!("127.0.0.1:{}", config.daemon.websocket_port);
    let ws_listener = tokio::net::TcpListener::bind(&ws_address)
        .await
        .with_context(|| format!("binding {ws_address}"))?;
    let ws_router = gobby_server::router(context.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(ws_listener, ws_router).await {
            warn!(error = %e, "websocket listener exited");
        }
    });
    info!(address = %ws_address, "event stream listening");

    let address = format!("127.0.0.1:{}", config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(address = %address, "gobby daemon listening");

    axum::serve(listener, gobby_server::router(context))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving HTTP")?;

    dispatcher.shutdown();
    mcp.disconnect_all().await;
    remove_pid_file();
    info!("gobby daemon stopped");
    Ok(())
}

fn init_logging(stderr: bool) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    }

    let logs_dir = gobby_core::dirs::logs_dir();
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating {}", logs_dir.display()))?;
    let appender = tracing_appender::rolling::daily(&logs_dir, "gobby.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}

fn write_pid_file() -> anyhow::Result<()> {
    let path = gobby_core::dirs::pid_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, std::process::id().to_string())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn remove_pid_file() {
    let path = gobby_core::dirs::pid_path();
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove pid file");
        }
    }
}
