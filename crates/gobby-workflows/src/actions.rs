//! Built-in workflow actions.
//!
//! The executor interprets [`ActionSpec`]s against a hook event and the
//! session's persistent workflow state. Actions never raise into the
//! dispatch path: anything unexpected degrades to an `Allow` outcome
//! with a log line, keeping hooks fail-open.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use gobby_core::HookEvent;
use gobby_llm::LlmProvider;
use gobby_storage::models::WorkflowState;
use gobby_storage::session_tasks::SessionTaskStore;
use gobby_storage::sessions::SessionStore;
use gobby_storage::workflow_state::WorkflowStateStore;
use gobby_storage::worktrees::WorktreeStore;

use crate::definition::ActionSpec;
use crate::handoff::{
    GitStatusProvider, HandoffCommit, HandoffContext, HandoffTask, HandoffWorktree,
    format_as_markdown,
};
use crate::template;
use crate::transcript;

/// Result of one action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Continue; optionally contribute context and/or a user-visible
    /// message.
    Allow {
        /// Context text to inject.
        context: Option<String>,
        /// User-visible one-liner.
        message: Option<String>,
    },
    /// Stop evaluating and deny the hook.
    Block {
        /// Reason surfaced to the CLI.
        reason: String,
    },
}

impl ActionOutcome {
    fn nothing() -> Self {
        Self::Allow {
            context: None,
            message: None,
        }
    }

    fn context(text: impl Into<String>) -> Self {
        Self::Allow {
            context: Some(text.into()),
            message: None,
        }
    }
}

/// Spawns agents for ready tasks. Implemented by the agent orchestrator;
/// injected here so workflows can trigger orchestration without a crate
/// cycle.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Run `orchestrate_ready_tasks` with the action's parameters.
    /// Returns the result object (success/spawned/skipped/...).
    async fn orchestrate_ready_tasks(&self, params: Value, parent_session_id: &str) -> Value;
}

/// Executes built-in action verbs.
pub struct ActionExecutor {
    sessions: SessionStore,
    session_tasks: SessionTaskStore,
    worktrees: WorktreeStore,
    states: WorkflowStateStore,
    llm: Arc<dyn LlmProvider>,
    git: Option<Arc<dyn GitStatusProvider>>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    summary_dir: PathBuf,
    compact_handoff_enabled: bool,
}

impl ActionExecutor {
    /// Build an executor over the shared stores.
    #[must_use]
    pub fn new(
        sessions: SessionStore,
        session_tasks: SessionTaskStore,
        worktrees: WorktreeStore,
        states: WorkflowStateStore,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            sessions,
            session_tasks,
            worktrees,
            states,
            llm,
            git: None,
            orchestrator: None,
            summary_dir: gobby_core::dirs::session_summaries_dir(),
            compact_handoff_enabled: true,
        }
    }

    /// Inject a git enrichment provider.
    #[must_use]
    pub fn with_git(mut self, git: Arc<dyn GitStatusProvider>) -> Self {
        self.git = Some(git);
        self
    }

    /// Inject the agent orchestrator.
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Override the summary failback directory (tests).
    #[must_use]
    pub fn with_summary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.summary_dir = dir.into();
        self
    }

    /// Toggle `extract_handoff_context`.
    #[must_use]
    pub fn with_compact_handoff(mut self, enabled: bool) -> Self {
        self.compact_handoff_enabled = enabled;
        self
    }

    /// Execute one action.
    ///
    /// `extra_context` carries caller-supplied template variables (the
    /// dispatcher passes the restored summary through it on handoff).
    pub async fn execute(
        &self,
        spec: &ActionSpec,
        event: &HookEvent,
        state: &WorkflowState,
        step_action_count: usize,
        extra_context: Option<&Value>,
    ) -> ActionOutcome {
        match spec.action.as_str() {
            "inject_context" => self.inject_context(spec, event, state, extra_context),
            "inject_message" => self.inject_message(spec, event, state, step_action_count, extra_context),
            "extract_handoff_context" => self.extract_handoff_context(event),
            "generate_handoff" => self.generate_handoff(event).await,
            "orchestrate_ready_tasks" => self.orchestrate(spec, event).await,
            other => {
                debug!(action = other, "unknown workflow action; allowing");
                ActionOutcome::nothing()
            }
        }
    }

    // ------------------------------------------------------------------
    // inject_context

    fn inject_context(
        &self,
        spec: &ActionSpec,
        event: &HookEvent,
        state: &WorkflowState,
        extra_context: Option<&Value>,
    ) -> ActionOutcome {
        let session_id = event.platform_session_id().unwrap_or_default().to_string();
        let sources = spec.sources();
        if session_id.is_empty() || sources.is_empty() {
            return self.require_or_nothing(spec, "no session or source");
        }

        let mut pieces: Vec<String> = Vec::new();
        for source in &sources {
            let resolved = self.resolve_source(source, spec, event, state, &session_id, extra_context);
            if let Some(text) = resolved {
                if !text.is_empty() {
                    pieces.push(text);
                }
            }
        }

        if pieces.is_empty() {
            return self.require_or_nothing(spec, &format!("no content for {sources:?}"));
        }
        let combined = pieces.join("\n\n");

        let rendered = match spec.str_param("template") {
            Some(template) => {
                let mut ctx = self.base_context(event, state, extra_context);
                ctx.insert("summary".to_string(), json!(combined));
                ctx.insert("content".to_string(), json!(combined));
                let rendered = template::render(template, &Value::Object(ctx));
                if rendered.trim().is_empty() {
                    combined
                } else {
                    rendered
                }
            }
            None => combined,
        };

        if let Err(e) = self.states.set_context_injected(&session_id, true) {
            warn!(error = %e, "failed to persist context_injected flag");
        }
        ActionOutcome::context(rendered)
    }

    fn require_or_nothing(&self, spec: &ActionSpec, why: &str) -> ActionOutcome {
        if spec.bool_param("require") {
            ActionOutcome::Block {
                reason: format!("required context unavailable: {why}"),
            }
        } else {
            ActionOutcome::nothing()
        }
    }

    #[allow(clippy::too_many_lines)]
    fn resolve_source(
        &self,
        source: &str,
        spec: &ActionSpec,
        event: &HookEvent,
        state: &WorkflowState,
        session_id: &str,
        extra_context: Option<&Value>,
    ) -> Option<String> {
        match source {
            // Both read the parent session's stored summary; `handoff`
            // additionally accepts a caller-provided one.
            "handoff" | "previous_session_summary" => {
                if source == "handoff" {
                    if let Some(summary) = extra_context
                        .and_then(|c| c.get("summary"))
                        .and_then(Value::as_str)
                    {
                        return Some(summary.to_string());
                    }
                }
                let session = self.sessions.get(session_id).ok().flatten()?;
                let parent_id = session.parent_session_id?;
                let parent = self.sessions.get(&parent_id).ok().flatten()?;
                match parent.summary_markdown {
                    Some(summary) if !summary.is_empty() => Some(summary),
                    _ => self.read_summary_failback(&parent.external_id),
                }
            }
            "observations" => {
                if state.observations.is_empty() {
                    None
                } else {
                    let lines: Vec<String> = state
                        .observations
                        .iter()
                        .map(|o| match o {
                            Value::String(s) => format!("- {s}"),
                            other => format!("- {other}"),
                        })
                        .collect();
                    Some(format!("## Observations\n{}", lines.join("\n")))
                }
            }
            "workflow_state" => {
                let mut lines = Vec::new();
                if let Some(workflow) = &state.workflow_name {
                    lines.push(format!("workflow: {workflow}"));
                }
                if let Some(step) = &state.step {
                    lines.push(format!("step: {step}"));
                }
                for (key, value) in &state.variables {
                    lines.push(format!("{key}: {value}"));
                }
                if lines.is_empty() {
                    None
                } else {
                    Some(format!("## Workflow State\n{}", lines.join("\n")))
                }
            }
            "compact_handoff" => {
                let session = self.sessions.get(session_id).ok().flatten()?;
                session.compact_markdown.filter(|m| !m.is_empty())
            }
            "skills" => self.load_skills(event, spec.str_param("filter")),
            "task_context" => {
                let task = self.session_tasks.active_task(session_id).ok().flatten()?;
                Some(format!(
                    "## Active Task Context\nYou are working on task: {} ({})",
                    task.title, task.id
                ))
            }
            "memories" => {
                // Requires prompt_text to scope recall; no recall backend
                // is wired in this build, so resolve to nothing.
                spec.str_param("prompt_text")?;
                None
            }
            other => {
                debug!(source = other, "unknown inject_context source");
                None
            }
        }
    }

    /// Latest failback summary file for an external id.
    fn read_summary_failback(&self, external_id: &str) -> Option<String> {
        let suffix = format!("_{external_id}.md");
        let entries = std::fs::read_dir(&self.summary_dir).ok()?;
        let mut candidates: Vec<PathBuf> = entries
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

    fn load_skills(&self, event: &HookEvent, filter: Option<&str>) -> Option<String> {
        let cwd = event.cwd.as_deref()?;
        let skills_dir = Path::new(cwd).join(".gobby").join("skills");
        let entries = std::fs::read_dir(skills_dir).ok()?;

        let mut bodies: Vec<String> = Vec::new();
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        paths.sort();
        for path in paths {
            let Ok(body) = std::fs::read_to_string(&path) else {
                continue;
            };
            if filter == Some("always_apply") && !body.contains("always_apply: true") {
                continue;
            }
            bodies.push(body.trim().to_string());
        }
        if bodies.is_empty() {
            None
        } else {
            Some(bodies.join("\n\n"))
        }
    }

    // ------------------------------------------------------------------
    // inject_message

    fn inject_message(
        &self,
        spec: &ActionSpec,
        event: &HookEvent,
        state: &WorkflowState,
        step_action_count: usize,
        extra_context: Option<&Value>,
    ) -> ActionOutcome {
        let Some(content) = spec.str_param("content").filter(|c| !c.is_empty()) else {
            return ActionOutcome::nothing();
        };

        let mut ctx = self.base_context(event, state, extra_context);
        ctx.insert("step_action_count".to_string(), json!(step_action_count));
        let rendered = template::render(content, &Value::Object(ctx));
        if rendered.trim().is_empty() {
            ActionOutcome::nothing()
        } else {
            ActionOutcome::Allow {
                context: None,
                message: Some(rendered),
            }
        }
    }

    fn base_context(
        &self,
        event: &HookEvent,
        state: &WorkflowState,
        extra_context: Option<&Value>,
    ) -> Map<String, Value> {
        let mut ctx = Map::new();
        ctx.insert(
            "session".to_string(),
            json!({
                "id": event.platform_session_id(),
                "external_id": event.session_id,
                "source": event.source.to_string(),
            }),
        );
        ctx.insert(
            "state".to_string(),
            serde_json::to_value(state).unwrap_or(Value::Null),
        );
        ctx.insert(
            "variables".to_string(),
            serde_json::to_value(&state.variables).unwrap_or(Value::Null),
        );
        ctx.insert("data".to_string(), event.data.clone());
        if let Some(Value::Object(extra)) = extra_context {
            for (key, value) in extra {
                ctx.insert(key.clone(), value.clone());
            }
        }
        ctx
    }

    // ------------------------------------------------------------------
    // extract_handoff_context

    fn extract_handoff_context(&self, event: &HookEvent) -> ActionOutcome {
        if !self.compact_handoff_enabled {
            debug!("compact handoff disabled; skipping extraction");
            return ActionOutcome::nothing();
        }
        let Some(session_id) = event.platform_session_id().map(str::to_string) else {
            return ActionOutcome::nothing();
        };
        let Ok(Some(session)) = self.sessions.get(&session_id) else {
            warn!(session_id = %session_id, "extract_handoff_context: session not found");
            return ActionOutcome::nothing();
        };
        let Some(jsonl_path) = session.jsonl_path.clone() else {
            debug!(session_id = %session_id, "no transcript path; skipping extraction");
            return ActionOutcome::nothing();
        };
        let Ok(body) = std::fs::read_to_string(&jsonl_path) else {
            warn!(path = %jsonl_path, "transcript file unreadable");
            return ActionOutcome::nothing();
        };

        let analysis = transcript::analyze(&body);
        let mut context = HandoffContext {
            files_modified: analysis.files_modified,
            initial_goal: analysis.initial_goal,
            recent_activity: analysis.recent_activity,
            ..HandoffContext::default()
        };

        if let Ok(Some(task)) = self.session_tasks.active_task(&session_id) {
            context.active_task = Some(HandoffTask {
                id: task.id,
                title: task.title,
                status: task.status.as_str().to_string(),
            });
        }

        // Worktree owned by this session, if any.
        if let Ok(worktrees) = self.worktrees.list(&session.project_id, None) {
            if let Some(worktree) = worktrees
                .into_iter()
                .find(|w| w.agent_session_id.as_deref() == Some(session_id.as_str()))
            {
                context.worktree = Some(HandoffWorktree {
                    branch_name: worktree.branch_name,
                    worktree_path: worktree.worktree_path,
                    base_branch: worktree.base_branch,
                    task_id: worktree.task_id,
                });
            }
        }

        if let (Some(git), Some(cwd)) = (&self.git, event.cwd.as_deref()) {
            context.git_status = git.status(cwd).filter(|s| !s.is_empty());
            context.git_commits = git
                .recent_commits(cwd, 5)
                .into_iter()
                .map(|line| {
                    let (hash, message) = line.split_once(' ').unwrap_or((line.as_str(), ""));
                    HandoffCommit {
                        hash: hash.to_string(),
                        message: message.to_string(),
                    }
                })
                .collect();
        }

        let markdown = format_as_markdown(&context);
        if markdown.is_empty() {
            return ActionOutcome::nothing();
        }
        if let Err(e) = self.sessions.update_compact_markdown(&session_id, &markdown) {
            warn!(error = %e, "failed to store compact handoff");
        }
        ActionOutcome::nothing()
    }

    // ------------------------------------------------------------------
    // generate_handoff

    async fn generate_handoff(&self, event: &HookEvent) -> ActionOutcome {
        let Some(session_id) = event.platform_session_id().map(str::to_string) else {
            return ActionOutcome::nothing();
        };
        let Ok(Some(session)) = self.sessions.get(&session_id) else {
            return ActionOutcome::nothing();
        };

        let transcript_tail = session
            .jsonl_path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .map(|body| tail(&body, 8000))
            .unwrap_or_default();

        let prompt = format!(
            "Summarize this coding session for a handoff to a fresh session. \
             Cover: what was being worked on, what was accomplished, what is \
             unfinished, and the next concrete step. Be terse and concrete.\n\n\
             Transcript tail:\n{transcript_tail}"
        );

        let summary = match self.llm.generate(&prompt, None).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => return ActionOutcome::nothing(),
            Err(gobby_llm::LlmError::NotConfigured) => {
                // Fall back to the deterministic compact handoff so the
                // successor still gets something.
                match session.compact_markdown.clone() {
                    Some(markdown) if !markdown.is_empty() => markdown,
                    _ => return ActionOutcome::nothing(),
                }
            }
            Err(e) => {
                warn!(error = %e, "handoff summary generation failed");
                return ActionOutcome::nothing();
            }
        };

        if let Err(e) = self.sessions.store_summary(&session_id, &summary) {
            warn!(error = %e, "failed to store handoff summary");
        }

        // Failback file, in case the row is lost before the successor reads it.
        let date = Utc::now().format("%Y%m%d");
        let file = self
            .summary_dir
            .join(format!("session_{date}_{}.md", session.external_id));
        if std::fs::create_dir_all(&self.summary_dir).is_ok() {
            if let Err(e) = std::fs::write(&file, &summary) {
                warn!(path = %file.display(), error = %e, "failed to write summary failback");
            }
        }

        ActionOutcome::nothing()
    }

    // ------------------------------------------------------------------
    // orchestrate_ready_tasks

    async fn orchestrate(&self, spec: &ActionSpec, event: &HookEvent) -> ActionOutcome {
        let Some(orchestrator) = &self.orchestrator else {
            warn!("orchestrate_ready_tasks requested but no orchestrator wired");
            return ActionOutcome::nothing();
        };
        let Some(session_id) = event.platform_session_id() else {
            return ActionOutcome::nothing();
        };
        let params = Value::Object(
            spec.params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let result = orchestrator.orchestrate_ready_tasks(params, session_id).await;
        let spawned = result
            .get("spawned_count")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if spawned > 0 {
            ActionOutcome::Allow {
                context: None,
                message: Some(format!("Spawned {spawned} agent(s) for ready tasks")),
            }
        } else {
            ActionOutcome::nothing()
        }
    }
}

fn tail(body: &str, max_chars: usize) -> String {
    let count = body.chars().count();
    if count <= max_chars {
        body.to_string()
    } else {
        body.chars().skip(count - max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobby_core::{HookEventType, SessionSource};
    use gobby_llm::{DisabledProvider, StaticProvider};
    use gobby_storage::Database;
    use gobby_storage::projects::ProjectStore;
    use gobby_storage::sessions::RegisterSession;
    use tempfile::TempDir;

    struct Fixture {
        executor: ActionExecutor,
        sessions: SessionStore,
        states: WorkflowStateStore,
        session_id: String,
        _summary_dir: TempDir,
    }

    fn fixture_with_llm(llm: Arc<dyn LlmProvider>) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let projects = ProjectStore::new(db.clone());
        projects.ensure_reserved().unwrap();
        projects.create("proj", "proj", None).unwrap();

        let sessions = SessionStore::new(db.clone());
        let session = sessions
            .register(&RegisterSession {
                external_id: "ext-1",
                source: SessionSource::Claude,
                machine_id: "m",
                project_id: "proj",
                parent_session_id: None,
                jsonl_path: None,
            })
            .unwrap();

        let summary_dir = TempDir::new().unwrap();
        let executor = ActionExecutor::new(
            sessions.clone(),
            SessionTaskStore::new(db.clone()),
            WorktreeStore::new(db.clone()),
            WorkflowStateStore::new(db.clone()),
            llm,
        )
        .with_summary_dir(summary_dir.path());

        Fixture {
            executor,
            sessions,
            states: WorkflowStateStore::new(db),
            session_id: session.id,
            _summary_dir: summary_dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_llm(Arc::new(DisabledProvider))
    }

    fn event_for(fixture: &Fixture, event_type: HookEventType) -> HookEvent {
        let mut event = HookEvent::new(event_type, "ext-1", SessionSource::Claude);
        event.metadata.insert(
            "_platform_session_id".to_string(),
            json!(fixture.session_id),
        );
        event
    }

    fn spec(yaml: &str) -> ActionSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_inject_context_nothing_without_source() {
        let fixture = fixture();
        let event = event_for(&fixture, HookEventType::SessionStart);
        let state = WorkflowState::new(&fixture.session_id);
        let outcome = fixture
            .executor
            .execute(&spec("action: inject_context"), &event, &state, 0, None)
            .await;
        assert_eq!(outcome, ActionOutcome::nothing());
    }

    #[tokio::test]
    async fn test_inject_context_require_blocks_when_empty() {
        let fixture = fixture();
        let event = event_for(&fixture, HookEventType::SessionStart);
        let state = WorkflowState::new(&fixture.session_id);
        let outcome = fixture
            .executor
            .execute(
                &spec("action: inject_context\nsource: compact_handoff\nrequire: true"),
                &event,
                &state,
                0,
                None,
            )
            .await;
        assert!(matches!(outcome, ActionOutcome::Block { .. }));
    }

    #[tokio::test]
    async fn test_inject_context_handoff_uses_extra_summary() {
        let fixture = fixture();
        let event = event_for(&fixture, HookEventType::SessionStart);
        let state = WorkflowState::new(&fixture.session_id);
        let outcome = fixture
            .executor
            .execute(
                &spec("action: inject_context\nsource: handoff"),
                &event,
                &state,
                0,
                Some(&json!({"summary": "Prior"})),
            )
            .await;
        match outcome {
            ActionOutcome::Allow { context, .. } => {
                assert!(context.unwrap().contains("Prior"));
            }
            ActionOutcome::Block { reason } => panic!("blocked: {reason}"),
        }
        // Success flips the persisted flag.
        let state = fixture.states.get(&fixture.session_id).unwrap().unwrap();
        assert!(state.context_injected);
    }

    #[tokio::test]
    async fn test_inject_context_previous_summary_from_parent() {
        let fixture = fixture();
        // Parent with a stored summary, child linked to it.
        let parent = fixture
            .sessions
            .register(&RegisterSession {
                external_id: "parent-ext",
                source: SessionSource::Claude,
                machine_id: "m",
                project_id: "proj",
                parent_session_id: None,
                jsonl_path: None,
            })
            .unwrap();
        fixture.sessions.store_summary(&parent.id, "parent summary").unwrap();
        fixture.sessions.mark_expired(&parent.id).unwrap();
        let child = fixture
            .sessions
            .register(&RegisterSession {
                external_id: "child-ext",
                source: SessionSource::Claude,
                machine_id: "m",
                project_id: "proj",
                parent_session_id: Some(&parent.id),
                jsonl_path: None,
            })
            .unwrap();

        let mut event = HookEvent::new(HookEventType::SessionStart, "child-ext", SessionSource::Claude);
        event
            .metadata
            .insert("_platform_session_id".to_string(), json!(child.id));
        let state = WorkflowState::new(&child.id);
        let outcome = fixture
            .executor
            .execute(
                &spec("action: inject_context\nsource: previous_session_summary"),
                &event,
                &state,
                0,
                None,
            )
            .await;
        match outcome {
            ActionOutcome::Allow { context, .. } => {
                assert_eq!(context.as_deref(), Some("parent summary"));
            }
            ActionOutcome::Block { reason } => panic!("blocked: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_inject_context_observations_and_state() {
        let fixture = fixture();
        let event = event_for(&fixture, HookEventType::BeforeAgent);
        let mut state = WorkflowState::new(&fixture.session_id);
        state.observations.push(json!("saw a flaky test"));
        state.workflow_name = Some("auto-task".into());
        state.step = Some("implement".into());

        let outcome = fixture
            .executor
            .execute(
                &spec("action: inject_context\nsource:\n  - observations\n  - workflow_state"),
                &event,
                &state,
                0,
                None,
            )
            .await;
        match outcome {
            ActionOutcome::Allow { context, .. } => {
                let context = context.unwrap();
                assert!(context.contains("## Observations"));
                assert!(context.contains("saw a flaky test"));
                assert!(context.contains("## Workflow State"));
                assert!(context.contains("step: implement"));
            }
            ActionOutcome::Block { reason } => panic!("blocked: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_inject_message_renders_variables() {
        let fixture = fixture();
        let event = event_for(&fixture, HookEventType::BeforeAgent);
        let mut state = WorkflowState::new(&fixture.session_id);
        state
            .variables
            .insert("phase".to_string(), json!("review"));

        let outcome = fixture
            .executor
            .execute(
                &spec("action: inject_message\ncontent: \"Now in {{ variables.phase }} ({{ step_action_count }})\""),
                &event,
                &state,
                3,
                None,
            )
            .await;
        match outcome {
            ActionOutcome::Allow { message, .. } => {
                assert_eq!(message.as_deref(), Some("Now in review (3)"));
            }
            ActionOutcome::Block { reason } => panic!("blocked: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_extract_handoff_stores_compact_markdown() {
        let fixture = fixture();
        // Give the session a transcript.
        let transcript = TempDir::new().unwrap();
        let path = transcript.path().join("t.jsonl");
        std::fs::write(
            &path,
            r#"{"type": "user", "message": {"content": "build the parser"}}"#,
        )
        .unwrap();
        fixture
            .sessions
            .register(&RegisterSession {
                external_id: "ext-1",
                source: SessionSource::Claude,
                machine_id: "m",
                project_id: "proj",
                parent_session_id: None,
                jsonl_path: Some(path.to_str().unwrap()),
            })
            .unwrap();

        let event = event_for(&fixture, HookEventType::SessionEnd);
        let state = WorkflowState::new(&fixture.session_id);
        fixture
            .executor
            .execute(&spec("action: extract_handoff_context"), &event, &state, 0, None)
            .await;

        let session = fixture.sessions.get(&fixture.session_id).unwrap().unwrap();
        let markdown = session.compact_markdown.unwrap();
        assert!(markdown.contains("## Initial Goal"));
        assert!(markdown.contains("build the parser"));
    }

    #[tokio::test]
    async fn test_extract_handoff_disabled_is_noop() {
        let fixture = fixture();
        let executor = fixture.executor.with_compact_handoff(false);
        let mut event = HookEvent::new(HookEventType::SessionEnd, "ext-1", SessionSource::Claude);
        event
            .metadata
            .insert("_platform_session_id".to_string(), json!(fixture.session_id));
        let state = WorkflowState::new(&fixture.session_id);
        executor
            .execute(&spec("action: extract_handoff_context"), &event, &state, 0, None)
            .await;
        let session = fixture.sessions.get(&fixture.session_id).unwrap().unwrap();
        assert!(session.compact_markdown.is_none());
    }

    #[tokio::test]
    async fn test_generate_handoff_stores_summary_and_failback() {
        let fixture = fixture_with_llm(Arc::new(StaticProvider::new("## Summary\nshipped it")));
        let event = event_for(&fixture, HookEventType::SessionEnd);
        let state = WorkflowState::new(&fixture.session_id);
        fixture
            .executor
            .execute(&spec("action: generate_handoff"), &event, &state, 0, None)
            .await;

        let session = fixture.sessions.get(&fixture.session_id).unwrap().unwrap();
        assert_eq!(session.summary_markdown.as_deref(), Some("## Summary\nshipped it"));
        assert_eq!(
            session.status,
            gobby_storage::SessionStatus::HandoffReady
        );

        // Failback file exists and carries the summary.
        let files: Vec<_> = std::fs::read_dir(fixture._summary_dir.path())
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(files.len(), 1);
        let body = std::fs::read_to_string(files[0].path()).unwrap();
        assert!(body.contains("shipped it"));
    }

    #[tokio::test]
    async fn test_generate_handoff_without_llm_falls_back_to_compact() {
        let fixture = fixture();
        fixture
            .sessions
            .update_compact_markdown(&fixture.session_id, "## Handoff\ndeterministic")
            .unwrap();
        let event = event_for(&fixture, HookEventType::SessionEnd);
        let state = WorkflowState::new(&fixture.session_id);
        fixture
            .executor
            .execute(&spec("action: generate_handoff"), &event, &state, 0, None)
            .await;

        let session = fixture.sessions.get(&fixture.session_id).unwrap().unwrap();
        assert_eq!(
            session.summary_markdown.as_deref(),
            Some("## Handoff\ndeterministic")
        );
    }

    #[tokio::test]
    async fn test_unknown_action_allows() {
        let fixture = fixture();
        let event = event_for(&fixture, HookEventType::BeforeTool);
        let state = WorkflowState::new(&fixture.session_id);
        let outcome = fixture
            .executor
            .execute(&spec("action: launch_rockets"), &event, &state, 0, None)
            .await;
        assert_eq!(outcome, ActionOutcome::nothing());
    }
}
