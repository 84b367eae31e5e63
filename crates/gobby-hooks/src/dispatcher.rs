//! The hook dispatch engine.
//!
//! One entry point: [`HookDispatcher::handle`]. It gates on cached
//! daemon health, resolves the session (auto-registering unknown ones),
//! lets the workflow engine intercept, runs the per-event handler, and
//! broadcasts the result — and it never returns an error. Every failure
//! on this path degrades to `allow` with a reason, because a CLI must
//! not be blocked by daemon bugs.

use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use gobby_core::{
    CoreError, Decision, HookEvent, HookEventType, HookResponse, ProjectContext, ProjectId,
    machine_id,
};
use gobby_storage::error::StorageError;
use gobby_storage::models::{PERSONAL_PROJECT, SessionStatus};
use gobby_storage::projects::ProjectStore;
use gobby_storage::session_tasks::SessionTaskStore;
use gobby_storage::sessions::{RegisterSession, SessionStore};
use gobby_workflows::WorkflowEngine;

use crate::broadcast::HookBroadcaster;
use crate::health::HealthMonitor;

/// Failures inside the dispatch path. Callers never see these — `handle`
/// converts them to fail-open responses — but handlers use them for
/// `?`-style plumbing.
#[derive(Debug, Error)]
enum DispatchError {
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Core(#[from] CoreError),
}

impl DispatchError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "StorageError",
            Self::Core(_) => "CoreError",
        }
    }
}

type DispatchResult<T> = Result<T, DispatchError>;

/// The session-aware hook dispatcher.
pub struct HookDispatcher {
    sessions: SessionStore,
    session_tasks: SessionTaskStore,
    projects: ProjectStore,
    engine: Arc<WorkflowEngine>,
    health: HealthMonitor,
    broadcaster: HookBroadcaster,
    /// `source:external_id` → internal session id.
    session_cache: DashMap<String, String>,
    /// Serializes the miss path of session resolution so two concurrent
    /// hooks for the same unknown session register exactly once.
    lookup_lock: tokio::sync::Mutex<()>,
}

impl HookDispatcher {
    /// Assemble a dispatcher.
    #[must_use]
    pub fn new(
        sessions: SessionStore,
        session_tasks: SessionTaskStore,
        projects: ProjectStore,
        engine: Arc<WorkflowEngine>,
        health: HealthMonitor,
        broadcaster: HookBroadcaster,
    ) -> Self {
        Self {
            sessions,
            session_tasks,
            projects,
            engine,
            health,
            broadcaster,
            session_cache: DashMap::new(),
            lookup_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The broadcaster, for WebSocket subscriptions.
    #[must_use]
    pub fn broadcaster(&self) -> &HookBroadcaster {
        &self.broadcaster
    }

    /// Handle one event. Always returns a response; never errors.
    pub async fn handle(&self, mut event: HookEvent) -> HookResponse {
        // Health gate: cache read only, no I/O on the hot path.
        let status = self.health.cached();
        if !status.is_ready {
            warn!(
                event_type = %event.event_type,
                status = %status.status,
                "daemon not ready; skipping hook"
            );
            return HookResponse::allow_with_reason(format!(
                "Daemon {}: {}",
                status.status,
                status.error.as_deref().unwrap_or("Unknown")
            ));
        }

        let response = match self.handle_inner(&mut event).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    event_type = %event.event_type,
                    session_id = %event.session_id,
                    error = %e,
                    "dispatch failed; failing open"
                );
                HookResponse::allow_with_reason(format!("{}: {e}", e.kind()))
            }
        };

        // Fire-and-forget; can never alter the response.
        self.broadcaster.publish(event, response.clone());
        response
    }

    /// Stop background work. No health tick is scheduled afterwards.
    pub fn shutdown(&self) {
        self.health.shutdown();
        debug!("hook dispatcher shut down");
    }

    async fn handle_inner(&self, event: &mut HookEvent) -> DispatchResult<HookResponse> {
        self.resolve_session(event).await?;

        // Workflow engine gets first say.
        let workflow = self.engine.evaluate(event).await;
        if workflow.decision != Decision::Allow {
            debug!(
                event_type = %event.event_type,
                decision = %workflow.decision,
                "workflow intercepted event"
            );
            return Ok(HookResponse {
                decision: workflow.decision,
                reason: workflow.reason,
                context: workflow.context,
                system_message: workflow.system_message,
                ..HookResponse::default()
            });
        }

        let mut response = match event.event_type {
            HookEventType::SessionStart => self.on_session_start(event).await?,
            HookEventType::SessionEnd => self.on_session_end(event).await,
            HookEventType::BeforeAgent => self.on_before_agent(event).await,
            HookEventType::AfterAgent => self.on_after_agent(event),
            HookEventType::AfterTool => self.on_after_tool(event),
            HookEventType::Notification => self.on_notification(event),
            // Observational and extension-point events allow.
            HookEventType::BeforeTool
            | HookEventType::PreCompact
            | HookEventType::SubagentStart
            | HookEventType::SubagentStop
            | HookEventType::PermissionRequest
            | HookEventType::BeforeToolSelection
            | HookEventType::BeforeModel
            | HookEventType::AfterModel => {
                debug!(event_type = %event.event_type, "observational event");
                HookResponse::allow()
            }
        };

        if let Some(context) = workflow.context {
            response.append_context(&context);
        }
        if response.system_message.is_none() {
            response.system_message = workflow.system_message;
        }
        Ok(response)
    }

    // ------------------------------------------------------------------
    // Session resolution

    async fn resolve_session(&self, event: &mut HookEvent) -> DispatchResult<()> {
        if event.session_id.is_empty() {
            return Ok(());
        }
        let cache_key = format!("{}:{}", event.source, event.session_id);

        let mut platform_id = self.session_cache.get(&cache_key).map(|e| e.value().clone());

        if platform_id.is_none() && event.event_type != HookEventType::SessionStart {
            let _guard = self.lookup_lock.lock().await;
            // Another hook may have finished the lookup while we waited.
            platform_id = self.session_cache.get(&cache_key).map(|e| e.value().clone());

            if platform_id.is_none() {
                let machine = event
                    .machine_id
                    .clone()
                    .unwrap_or_else(|| machine_id().to_string());
                let found = self.sessions.lookup_by_external(
                    &event.session_id,
                    event.source,
                    &machine,
                )?;
                let session = match found {
                    Some(session) => session,
                    None => {
                        debug!(
                            external_id = %event.session_id,
                            "unknown session; auto-registering"
                        );
                        let project_id =
                            self.resolve_project(event.data_str("project_id"), event.cwd.as_deref())?;
                        self.sessions.register(&RegisterSession {
                            external_id: &event.session_id,
                            source: event.source,
                            machine_id: &machine,
                            project_id: &project_id,
                            parent_session_id: None,
                            jsonl_path: event.data_str("transcript_path"),
                        })?
                    }
                };
                self.session_cache.insert(cache_key.clone(), session.id.clone());
                platform_id = Some(session.id);
            }
        }

        if let Some(platform_id) = platform_id {
            event
                .metadata
                .insert("_platform_session_id".to_string(), json!(platform_id));
            self.resolve_active_task(event, &platform_id);
        }
        Ok(())
    }

    fn resolve_active_task(&self, event: &mut HookEvent, platform_id: &str) {
        match self.session_tasks.active_task(platform_id) {
            Ok(Some(task)) => {
                event
                    .metadata
                    .insert("_task_title".to_string(), json!(task.title));
                event.task_id = task.id.parse().ok();
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to resolve active task"),
        }
    }

    /// Project id from an explicit id, or from `.gobby/project.json`
    /// discovery under `cwd` (auto-initializing when absent). Falls back
    /// to the personal project without a working directory.
    fn resolve_project(
        &self,
        explicit: Option<&str>,
        cwd: Option<&str>,
    ) -> DispatchResult<String> {
        if let Some(project_id) = explicit.filter(|p| !p.is_empty()) {
            return Ok(project_id.to_string());
        }
        let Some(cwd) = cwd.filter(|c| !c.is_empty()) else {
            return Ok(PERSONAL_PROJECT.to_string());
        };
        let root = std::path::Path::new(cwd);

        if let Some(ctx) = ProjectContext::discover(root) {
            let id = ctx.id.to_string();
            self.projects
                .ensure(&id, &ctx.name, ctx.path.as_deref().and_then(|p| p.to_str()))?;
            return Ok(id);
        }

        // No marker anywhere above: initialize the project here.
        let minted = ProjectId::new();
        let ctx = ProjectContext::initialize(root, minted)?;
        let id = ctx.id.to_string();
        self.projects.ensure(&id, &ctx.name, Some(cwd))?;
        tracing::info!(project = %ctx.name, path = %cwd, "auto-initialized project");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Per-event handlers

    async fn on_session_start(&self, event: &mut HookEvent) -> DispatchResult<HookResponse> {
        let trigger = event.data_str("source").unwrap_or("unknown").to_string();
        let cwd = event
            .cwd
            .clone()
            .or_else(|| event.data_str("cwd").map(str::to_string));
        let project_id = self.resolve_project(event.data_str("project_id"), cwd.as_deref())?;
        let machine = event
            .machine_id
            .clone()
            .unwrap_or_else(|| machine_id().to_string());

        debug!(
            external_id = %event.session_id,
            trigger = %trigger,
            "session start"
        );

        // On /clear, look for a handoff-ready predecessor.
        let mut parent_id: Option<String> = None;
        let mut restored: Option<String> = None;
        if trigger == "clear" {
            if let Some(parent) =
                self.sessions
                    .find_parent_session(&machine, event.source, &project_id)?
            {
                restored = parent
                    .summary_markdown
                    .clone()
                    .filter(|s| !s.is_empty())
                    .or_else(|| read_summary_failback(&parent.external_id));
                parent_id = Some(parent.id);
                if restored.is_none() {
                    warn!(parent = %parent_id.as_deref().unwrap_or(""), "handoff parent found but no summary restored");
                }
            }
        }

        let session = self.sessions.register(&RegisterSession {
            external_id: &event.session_id,
            source: event.source,
            machine_id: &machine,
            project_id: &project_id,
            parent_session_id: parent_id.as_deref(),
            jsonl_path: event.data_str("transcript_path"),
        })?;

        let cache_key = format!("{}:{}", event.source, event.session_id);
        self.session_cache.insert(cache_key, session.id.clone());
        event
            .metadata
            .insert("_platform_session_id".to_string(), json!(session.id));
        self.resolve_active_task(event, &session.id);

        // The predecessor only expires once its context actually moved.
        if let (Some(parent), Some(_)) = (&parent_id, &restored) {
            self.sessions.mark_expired(parent)?;
        }

        let mut context_parts: Vec<String> = vec![format!("Session registered: {}", session.id)];
        if let Some(parent) = &parent_id {
            context_parts.push(format!("Parent session: {parent}"));
            context_parts.push("Handoff completed successfully.".to_string());
        }

        if let Some(summary) = &restored {
            let lifecycle = self
                .engine
                .handle_lifecycle(
                    "session-handoff",
                    "on_session_start",
                    event,
                    Some(json!({
                        "summary": summary,
                        "handoff": {"notes": "Restored summary", "pending_tasks": []},
                    })),
                )
                .await;
            match lifecycle.context {
                Some(rendered) if !rendered.trim().is_empty() => context_parts.push(rendered),
                _ => {
                    context_parts.push(format!("## Previous Session Context\n\n{summary}"));
                }
            }
        }

        if let Some(task_id) = &event.task_id {
            let title = event.metadata_str("_task_title").unwrap_or("Unknown Task");
            context_parts.push(format!(
                "## Active Task Context\nYou are working on task: {title} ({task_id})"
            ));
        }

        let system_message = match (&parent_id, &restored) {
            (Some(parent), Some(_)) => Some(format!(
                "Context restored from previous session.\n  Session ID: {}\n  Parent ID: {parent}\n  External ID: {}",
                session.id, event.session_id
            )),
            _ => None,
        };

        let mut response = HookResponse::allow().with_context(context_parts.join("\n"));
        response.system_message = system_message;
        response.metadata.insert("session_id".into(), json!(session.id));
        response.metadata.insert("machine_id".into(), json!(machine));
        response
            .metadata
            .insert("parent_session_id".into(), json!(parent_id));
        response
            .metadata
            .insert("external_id".into(), json!(event.session_id));
        Ok(response)
    }

    async fn on_session_end(&self, event: &HookEvent) -> HookResponse {
        debug!(session = ?event.platform_session_id(), "session end");
        let outcome = self
            .engine
            .handle_lifecycle("session-handoff", "on_session_end", event, None)
            .await;
        if outcome.decision != Decision::Allow {
            // Lifecycle actions cannot block a session from ending.
            debug!("ignoring non-allow lifecycle outcome on session end");
        }
        HookResponse::allow()
    }

    async fn on_before_agent(&self, event: &HookEvent) -> HookResponse {
        let prompt = event.data_str("prompt").unwrap_or("").trim().to_lowercase();
        let Some(session_id) = event.platform_session_id().map(str::to_string) else {
            return HookResponse::allow();
        };

        if prompt == "/clear" || prompt == "/exit" {
            debug!(session = %session_id, prompt = %prompt, "handoff-triggering prompt");
            let _ = self
                .engine
                .handle_lifecycle("session-handoff", "on_session_end", event, None)
                .await;
        } else if let Err(e) = self.sessions.update_status(&session_id, SessionStatus::Active) {
            warn!(error = %e, "failed to mark session active");
        }
        HookResponse::allow()
    }

    fn on_after_agent(&self, event: &HookEvent) -> HookResponse {
        if let Some(session_id) = event.platform_session_id() {
            if let Err(e) = self.sessions.update_status(session_id, SessionStatus::Paused) {
                warn!(error = %e, "failed to mark session paused");
            }
        }
        HookResponse::allow()
    }

    fn on_after_tool(&self, event: &HookEvent) -> HookResponse {
        let failed = event
            .metadata
            .get("is_failure")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        debug!(
            tool = event.data_str("tool_name").unwrap_or("unknown"),
            failed, "post-tool"
        );
        HookResponse::allow()
    }

    fn on_notification(&self, event: &HookEvent) -> HookResponse {
        if let Some(session_id) = event.platform_session_id() {
            if let Err(e) = self.sessions.update_status(session_id, SessionStatus::Paused) {
                warn!(error = %e, "failed to mark session paused");
            }
        }
        HookResponse::allow()
    }
}

/// Latest failback summary file for an external id.
fn read_summary_failback(external_id: &str) -> Option<String> {
    let dir = gobby_core::dirs::session_summaries_dir();
    let suffix = format!("_{external_id}.md");
    let entries = std::fs::read_dir(dir).ok()?;
    let mut candidates: Vec<std::path::PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("session_") && n.ends_with(&suffix))
        })
        .collect();
    candidates.sort();
    let newest = candidates.pop()?;
    std::fs::read_to_string(newest).ok().filter(|s| !s.is_empty())
}
