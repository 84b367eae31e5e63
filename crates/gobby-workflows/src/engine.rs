//! Trigger evaluation.
//!
//! The engine sits between the hook dispatcher and the action executor:
//! for each inbound event it finds matching triggers (file order within
//! a workflow, name order across workflows), evaluates conditions
//! against the event payload plus persisted variables, and runs actions
//! until one returns a non-allow outcome.

use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, warn};

use gobby_core::{Decision, HookEvent};
use gobby_storage::models::WorkflowState;
use gobby_storage::workflow_state::WorkflowStateStore;

use crate::actions::{ActionExecutor, ActionOutcome};
use crate::condition;
use crate::definition::Workflow;
use crate::loader::WorkflowLoader;

/// What the engine decided for an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutcome {
    /// Allow/deny/ask. Non-allow short-circuits the dispatcher.
    pub decision: Decision,
    /// Reason on a non-allow decision.
    pub reason: Option<String>,
    /// Context contributed by `inject_context` actions.
    pub context: Option<String>,
    /// User-visible message contributed by `inject_message` actions.
    pub system_message: Option<String>,
}

impl EngineOutcome {
    fn blocked(reason: String) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason),
            ..Self::default()
        }
    }

    fn merge_allow(&mut self, context: Option<String>, message: Option<String>) {
        if let Some(context) = context {
            match &mut self.context {
                Some(existing) => {
                    existing.push_str("\n\n");
                    existing.push_str(&context);
                }
                None => self.context = Some(context),
            }
        }
        if self.system_message.is_none() {
            self.system_message = message;
        }
    }
}

/// The workflow engine.
pub struct WorkflowEngine {
    loader: WorkflowLoader,
    states: WorkflowStateStore,
    executor: ActionExecutor,
}

impl WorkflowEngine {
    /// Assemble an engine.
    #[must_use]
    pub fn new(loader: WorkflowLoader, states: WorkflowStateStore, executor: ActionExecutor) -> Self {
        Self {
            loader,
            states,
            executor,
        }
    }

    /// The loader (used by callers that validate workflow names).
    #[must_use]
    pub fn loader(&self) -> &WorkflowLoader {
        &self.loader
    }

    /// Evaluate an event against every visible workflow.
    ///
    /// Triggers run in file order within a workflow and name order
    /// across workflows; the first non-allow action wins.
    pub async fn evaluate(&self, event: &HookEvent) -> EngineOutcome {
        let project_path = event.cwd.as_deref().map(Path::new);
        let workflows = self.loader.load_all(project_path);
        let mut names: Vec<&String> = workflows.keys().collect();
        names.sort();

        let state = self.state_for(event);
        let event_name = event.event_type.to_string();
        let mut outcome = EngineOutcome::default();

        for name in names {
            let workflow = &workflows[name];
            match self
                .run_triggers(workflow, &event_name, event, &state, None)
                .await
            {
                TriggerRun::Blocked(reason) => return EngineOutcome::blocked(reason),
                TriggerRun::Allowed { context, message } => {
                    outcome.merge_allow(context, message);
                }
            }
        }
        outcome
    }

    /// Run one named workflow's triggers for a lifecycle phase
    /// (`on_session_start`, `on_session_end`). `context_data` is exposed
    /// to templates (e.g. the restored summary on handoff).
    pub async fn handle_lifecycle(
        &self,
        workflow_name: &str,
        phase: &str,
        event: &HookEvent,
        context_data: Option<Value>,
    ) -> EngineOutcome {
        let project_path = event.cwd.as_deref().map(Path::new);
        let Some(workflow) = self.loader.load(workflow_name, project_path) else {
            debug!(workflow = workflow_name, "lifecycle workflow not found");
            return EngineOutcome::default();
        };

        let state = self.state_for(event);
        match self
            .run_triggers(&workflow, phase, event, &state, context_data.as_ref())
            .await
        {
            TriggerRun::Blocked(reason) => EngineOutcome::blocked(reason),
            TriggerRun::Allowed { context, message } => {
                let mut outcome = EngineOutcome::default();
                outcome.merge_allow(context, message);
                outcome
            }
        }
    }

    async fn run_triggers(
        &self,
        workflow: &Workflow,
        event_name: &str,
        event: &HookEvent,
        state: &WorkflowState,
        extra_context: Option<&Value>,
    ) -> TriggerRun {
        let mut context: Option<String> = None;
        let mut message: Option<String> = None;
        let mut action_count = 0usize;

        for trigger in workflow.triggers_for(event_name) {
            if let Some(expression) = &trigger.when.condition {
                let ctx = condition_context(event, state);
                if !condition::evaluate(expression, &ctx) {
                    continue;
                }
            }

            for spec in &trigger.actions {
                let outcome = self
                    .executor
                    .execute(spec, event, state, action_count, extra_context)
                    .await;
                action_count += 1;
                match outcome {
                    ActionOutcome::Block { reason } => {
                        debug!(
                            workflow = %workflow.name,
                            action = %spec.action,
                            "workflow action blocked event"
                        );
                        return TriggerRun::Blocked(reason);
                    }
                    ActionOutcome::Allow {
                        context: action_context,
                        message: action_message,
                    } => {
                        if let Some(text) = action_context {
                            match &mut context {
                                Some(existing) => {
                                    existing.push_str("\n\n");
                                    existing.push_str(&text);
                                }
                                None => context = Some(text),
                            }
                        }
                        if message.is_none() {
                            message = action_message;
                        }
                    }
                }
            }
        }

        TriggerRun::Allowed { context, message }
    }

    fn state_for(&self, event: &HookEvent) -> WorkflowState {
        match event.platform_session_id() {
            Some(session_id) => self
                .states
                .get_or_default(session_id)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "failed to load workflow state; using empty");
                    WorkflowState::new(session_id)
                }),
            None => WorkflowState::new(""),
        }
    }
}

enum TriggerRun {
    Blocked(String),
    Allowed {
        context: Option<String>,
        message: Option<String>,
    },
}

fn condition_context(event: &HookEvent, state: &WorkflowState) -> Value {
    json!({
        "data": event.data,
        "metadata": event.metadata,
        "variables": state.variables,
        "event_type": event.event_type.to_string(),
        "source": event.source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobby_core::{HookEventType, SessionSource};
    use gobby_llm::DisabledProvider;
    use gobby_storage::Database;
    use gobby_storage::projects::ProjectStore;
    use gobby_storage::session_tasks::SessionTaskStore;
    use gobby_storage::sessions::{RegisterSession, SessionStore};
    use gobby_storage::worktrees::WorktreeStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        engine: WorkflowEngine,
        session_id: String,
        home: TempDir,
    }

    fn fixture() -> Fixture {
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

        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(home.path().join("workflows")).unwrap();

        let executor = ActionExecutor::new(
            sessions,
            SessionTaskStore::new(db.clone()),
            WorktreeStore::new(db.clone()),
            WorkflowStateStore::new(db.clone()),
            Arc::new(DisabledProvider),
        );
        let engine = WorkflowEngine::new(
            WorkflowLoader::with_home(home.path()),
            WorkflowStateStore::new(db),
            executor,
        );
        Fixture {
            engine,
            session_id: session.id,
            home,
        }
    }

    fn write_workflow(fixture: &Fixture, file: &str, body: &str) {
        std::fs::write(fixture.home.path().join("workflows").join(file), body).unwrap();
    }

    fn event(fixture: &Fixture, event_type: HookEventType, data: Value) -> HookEvent {
        let mut event = HookEvent::new(event_type, "ext-1", SessionSource::Claude).with_data(data);
        event.metadata.insert(
            "_platform_session_id".to_string(),
            json!(fixture.session_id),
        );
        event
    }

    #[tokio::test]
    async fn test_no_matching_trigger_allows() {
        let fixture = fixture();
        let outcome = fixture
            .engine
            .evaluate(&event(&fixture, HookEventType::AfterTool, json!({})))
            .await;
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(outcome.context.is_none());
    }

    #[tokio::test]
    async fn test_condition_gates_trigger() {
        let fixture = fixture();
        write_workflow(
            &fixture,
            "guard.yaml",
            r#"
name: guard
triggers:
  - when:
      event: before_agent
      condition: data.prompt == "/clear"
    actions:
      - action: inject_message
        content: clearing now
"#,
        );

        let hit = fixture
            .engine
            .evaluate(&event(
                &fixture,
                HookEventType::BeforeAgent,
                json!({"prompt": "/clear"}),
            ))
            .await;
        assert_eq!(hit.system_message.as_deref(), Some("clearing now"));

        let miss = fixture
            .engine
            .evaluate(&event(
                &fixture,
                HookEventType::BeforeAgent,
                json!({"prompt": "hello"}),
            ))
            .await;
        assert!(miss.system_message.is_none());
    }

    #[tokio::test]
    async fn test_block_short_circuits_remaining_actions() {
        let fixture = fixture();
        write_workflow(
            &fixture,
            "strict.yaml",
            r#"
name: strict
triggers:
  - when:
      event: session_start
    actions:
      - action: inject_context
        source: compact_handoff
        require: true
      - action: inject_message
        content: never reached
"#,
        );

        let outcome = fixture
            .engine
            .evaluate(&event(&fixture, HookEventType::SessionStart, json!({})))
            .await;
        assert_eq!(outcome.decision, Decision::Deny);
        assert!(outcome.reason.unwrap().contains("required context"));
        assert!(outcome.system_message.is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_runs_named_workflow_with_context_data() {
        let fixture = fixture();
        // The builtin session-handoff workflow renders the summary on
        // on_session_start.
        let outcome = fixture
            .engine
            .handle_lifecycle(
                "session-handoff",
                "on_session_start",
                &event(&fixture, HookEventType::SessionStart, json!({})),
                Some(json!({"summary": "Prior", "handoff": {"notes": "keep going"}})),
            )
            .await;
        assert_eq!(outcome.decision, Decision::Allow);
        let context = outcome.context.unwrap();
        assert!(context.contains("## Previous Session Context"));
        assert!(context.contains("Prior"));
        assert!(context.contains("keep going"));
    }

    #[tokio::test]
    async fn test_lifecycle_unknown_workflow_allows() {
        let fixture = fixture();
        let outcome = fixture
            .engine
            .handle_lifecycle(
                "does-not-exist",
                "on_session_end",
                &event(&fixture, HookEventType::SessionEnd, json!({})),
                None,
            )
            .await;
        assert_eq!(outcome, EngineOutcome::default());
    }

    #[tokio::test]
    async fn test_contexts_from_multiple_workflows_merge() {
        let fixture = fixture();
        write_workflow(
            &fixture,
            "a.yaml",
            "name: a\ntriggers:\n  - when:\n      event: before_agent\n    actions:\n      - action: inject_message\n        content: from-a\n",
        );
        write_workflow(
            &fixture,
            "b.yaml",
            "name: b\ntriggers:\n  - when:\n      event: before_agent\n    actions:\n      - action: inject_message\n        content: from-b\n",
        );

        let outcome = fixture
            .engine
            .evaluate(&event(&fixture, HookEventType::BeforeAgent, json!({"prompt": "x"})))
            .await;
        // Name order: workflow "a" wins the single system-message slot.
        assert_eq!(outcome.system_message.as_deref(), Some("from-a"));
    }
}
