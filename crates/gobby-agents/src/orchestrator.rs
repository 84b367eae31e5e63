//! `orchestrate_ready_tasks`.
//!
//! Spawns one agent per ready subtask of a parent task, each in its own
//! git worktree, under an atomically reserved concurrency cap. Every
//! per-task failure becomes a `skipped[].reason` entry; one bad task
//! never aborts the batch, and partially created worktrees are rolled
//! back (store row removed, git worktree force-deleted with its
//! branch).

use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use gobby_core::{ProjectContext, SessionSource, machine_id};
use gobby_storage::models::{SpawnedAgent, Task, TaskStatus};
use gobby_storage::projects::ProjectStore;
use gobby_storage::tasks::{TaskStore, TaskUpdate};
use gobby_storage::workflow_state::WorkflowStateStore;
use gobby_storage::worktrees::{CreateWorktree, WorktreeStore};
use gobby_workflows::WorkflowLoader;

use crate::git::WorktreeGit;
use crate::prompt::build_task_prompt;
use crate::runner::AgentRunner;
use crate::spawn::{SpawnMode, SpawnRequest, SpawnerSet};

/// Inputs to one orchestration call. Mirrors the MCP tool parameters;
/// every field except the task reference and parent session has a
/// default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestrateRequest {
    /// Task reference: UUID, `#N`, `N`, or dotted path.
    pub parent_task_id: String,
    /// Fallback provider.
    pub provider: Option<String>,
    /// Fallback model.
    pub model: Option<String>,
    /// Terminal preference for terminal mode.
    pub terminal: String,
    /// Execution mode (terminal, embedded, headless).
    pub mode: String,
    /// Workflow assigned to spawned agents.
    pub workflow: Option<String>,
    /// Concurrency cap for this parent session.
    pub max_concurrent: Option<i64>,
    /// Parent session (required).
    pub parent_session_id: String,
    /// Project directory override.
    pub project_path: Option<String>,
    /// Provider for implementation work (overrides `provider`).
    pub coding_provider: Option<String>,
    /// Model for implementation work (overrides `model`).
    pub coding_model: Option<String>,
    /// Branch to base worktrees on (auto-detected when absent).
    pub base_branch: Option<String>,
    /// Plan without side effects.
    pub dry_run: bool,
}

impl Default for OrchestrateRequest {
    fn default() -> Self {
        Self {
            parent_task_id: String::new(),
            provider: None,
            model: None,
            terminal: "auto".to_string(),
            mode: "terminal".to_string(),
            workflow: None,
            max_concurrent: None,
            parent_session_id: String::new(),
            project_path: None,
            coding_provider: None,
            coding_model: None,
            base_branch: None,
            dry_run: false,
        }
    }
}

/// Defaults injected from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorDefaults {
    /// Provider when nothing else names one.
    pub provider: String,
    /// Workflow assigned when the request names none.
    pub workflow: String,
    /// Concurrency cap when the request names none.
    pub max_concurrent: i64,
}

impl Default for OrchestratorDefaults {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            workflow: "auto-task".to_string(),
            max_concurrent: 3,
        }
    }
}

/// The agent orchestrator.
pub struct AgentOrchestrator {
    tasks: TaskStore,
    worktrees: WorktreeStore,
    states: WorkflowStateStore,
    projects: ProjectStore,
    runner: AgentRunner,
    git: Arc<dyn WorktreeGit>,
    spawners: SpawnerSet,
    loader: WorkflowLoader,
    defaults: OrchestratorDefaults,
}

impl AgentOrchestrator {
    /// Assemble an orchestrator.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: TaskStore,
        worktrees: WorktreeStore,
        states: WorkflowStateStore,
        projects: ProjectStore,
        runner: AgentRunner,
        git: Arc<dyn WorktreeGit>,
        spawners: SpawnerSet,
        loader: WorkflowLoader,
        defaults: OrchestratorDefaults,
    ) -> Self {
        Self {
            tasks,
            worktrees,
            states,
            projects,
            runner,
            git,
            spawners,
            loader,
            defaults,
        }
    }

    /// Run one orchestration call. Never errors; failures land in the
    /// result object.
    #[allow(clippy::too_many_lines)]
    pub async fn orchestrate(&self, request: OrchestrateRequest) -> Value {
        let Some(mode) = SpawnMode::parse(&request.mode) else {
            return error_result(format!(
                "Invalid mode '{}'. Must be one of: embedded, headless, terminal",
                request.mode
            ));
        };
        if request.parent_session_id.is_empty() {
            return error_result("parent_session_id is required for orchestration");
        }

        let parent = match self.tasks.resolve_reference(None, &request.parent_task_id) {
            Ok(task) => task,
            Err(e) => return error_result(format!("Invalid parent_task_id: {e}")),
        };
        let project_id = parent.project_id.clone();

        let ready = match self.tasks.list_ready_descendants(&parent.id) {
            Ok(ready) => ready,
            Err(e) => return error_result(format!("Failed to list ready tasks: {e}")),
        };
        if ready.is_empty() {
            return json!({
                "success": true,
                "message": format!("No ready subtasks found under {}", parent.id),
                "spawned": [],
                "skipped": [],
            });
        }

        let max_concurrent = request
            .max_concurrent
            .unwrap_or(self.defaults.max_concurrent);
        let reserved = match self.states.check_and_reserve_slots(
            &request.parent_session_id,
            max_concurrent,
            ready.len() as i64,
        ) {
            Ok(reserved) => reserved,
            Err(e) => return error_result(format!("Failed to reserve slots: {e}")),
        };
        if reserved == 0 {
            return json!({
                "success": true,
                "message": format!("Max concurrent limit reached ({max_concurrent} agents running)"),
                "spawned": [],
                "skipped": ready
                    .iter()
                    .map(|t| json!({
                        "task_id": t.id,
                        "title": t.title,
                        "reason": "max_concurrent limit reached",
                    }))
                    .collect::<Vec<_>>(),
                "spawned_count": 0,
                "skipped_count": ready.len(),
                "max_concurrent": max_concurrent,
            });
        }

        let split = usize::try_from(reserved).unwrap_or(ready.len()).min(ready.len());
        let (to_spawn, over_limit) = ready.split_at(split);

        // Provider assignment chain: argument > workflow variable > default.
        let workflow_vars = self
            .states
            .get(&request.parent_session_id)
            .ok()
            .flatten()
            .map(|s| s.variables)
            .unwrap_or_default();
        let var = |key: &str| workflow_vars.get(key).and_then(Value::as_str).map(str::to_string);

        let effective_provider = request
            .coding_provider
            .clone()
            .or_else(|| var("coding_provider"))
            .or_else(|| request.provider.clone())
            .unwrap_or_else(|| self.defaults.provider.clone());
        let effective_model = request
            .coding_model
            .clone()
            .or_else(|| var("coding_model"))
            .or_else(|| request.model.clone());
        let effective_terminal = if request.terminal == "auto" {
            var("terminal").unwrap_or_else(|| "auto".to_string())
        } else {
            request.terminal.clone()
        };
        let workflow_name = request
            .workflow
            .clone()
            .unwrap_or_else(|| self.defaults.workflow.clone());

        let mut skipped: Vec<Value> = over_limit
            .iter()
            .map(|t| {
                json!({
                    "task_id": t.id,
                    "title": t.title,
                    "reason": "max_concurrent limit reached",
                })
            })
            .collect();

        if request.dry_run {
            let planned: Vec<Value> = to_spawn
                .iter()
                .map(|task| {
                    json!({
                        "task_id": task.id,
                        "title": task.title,
                        "category": task.task_type,
                        "prompt": build_task_prompt(task),
                        "provider": effective_provider,
                        "model": effective_model,
                        "mode": request.mode,
                        "workflow": workflow_name,
                    })
                })
                .collect();
            // Nothing was spawned: give every reservation back.
            self.release(&request.parent_session_id, reserved);
            return json!({
                "success": true,
                "dry_run": true,
                "parent_task_id": parent.id,
                "planned": planned,
                "skipped": skipped,
                "planned_count": planned.len(),
                "skipped_count": skipped.len(),
                "max_concurrent": max_concurrent,
                "effective_provider": effective_provider,
                "effective_model": effective_model,
            });
        }

        let repo = self.repo_path(&request, &project_id);
        let base_branch = match &request.base_branch {
            Some(branch) => branch.clone(),
            None => match &repo {
                Some(repo) => self
                    .git
                    .default_branch(repo)
                    .await
                    .unwrap_or_else(|| "main".to_string()),
                None => "main".to_string(),
            },
        };

        let mut spawned: Vec<Value> = Vec::new();
        let mut spawned_agents: Vec<SpawnedAgent> = Vec::new();
        for task in to_spawn {
            match self
                .spawn_one(
                    task,
                    &request,
                    &project_id,
                    repo.as_deref(),
                    &base_branch,
                    mode,
                    &effective_provider,
                    effective_model.as_deref(),
                    &effective_terminal,
                    &workflow_name,
                )
                .await
            {
                Ok((entry, agent)) => {
                    spawned.push(entry);
                    spawned_agents.push(agent);
                }
                Err(reason) => {
                    debug!(task = %task.id, reason = %reason, "task skipped");
                    skipped.push(json!({
                        "task_id": task.id,
                        "title": task.title,
                        "reason": reason,
                    }));
                }
            }
        }

        // Spawned agents are now tracked in workflow state; reservations
        // are released whether they were used or not (failed spawns are
        // not in spawned_agents).
        if !spawned_agents.is_empty() {
            if let Err(e) = self
                .states
                .append_spawned_agents(&request.parent_session_id, &spawned_agents)
            {
                warn!(error = %e, "failed to record spawned agents in workflow state");
            } else {
                info!(count = spawned_agents.len(), "recorded spawned agents");
            }
        }
        self.release(&request.parent_session_id, reserved);

        json!({
            "success": true,
            "parent_task_id": parent.id,
            "spawned": spawned,
            "skipped": skipped,
            "spawned_count": spawned.len(),
            "skipped_count": skipped.len(),
            "max_concurrent": max_concurrent,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn spawn_one(
        &self,
        task: &Task,
        request: &OrchestrateRequest,
        project_id: &str,
        repo: Option<&Path>,
        base_branch: &str,
        mode: SpawnMode,
        provider: &str,
        model: Option<&str>,
        terminal: &str,
        workflow_name: &str,
    ) -> Result<(Value, SpawnedAgent), String> {
        let branch_name = format!("task/{}", task.id);
        let safe_branch = branch_name.replace('/', "-");

        // Reuse/skip rules before anything touches disk.
        let existing_by_task = self
            .worktrees
            .get_by_task(&task.id)
            .map_err(|e| e.to_string())?;
        if let Some(worktree) = &existing_by_task {
            if worktree.agent_session_id.is_some() {
                return Err(format!("Already has active worktree: {}", worktree.id));
            }
        }
        let existing_by_branch = self
            .worktrees
            .get_by_branch(project_id, &branch_name)
            .map_err(|e| e.to_string())?;
        if let Some(worktree) = &existing_by_branch {
            if worktree.agent_session_id.is_some() {
                return Err(format!("Branch {branch_name} has active agent"));
            }
        }

        // Validate the workflow before creating anything to clean up.
        if let Err(e) = self
            .loader
            .validate(workflow_name, request.project_path.as_deref().map(Path::new))
        {
            return Err(format!("Invalid workflow: {e}"));
        }

        let (worktree, newly_created) = match (existing_by_task, existing_by_branch) {
            (Some(worktree), _) => (worktree, false),
            (None, Some(worktree)) => {
                self.worktrees
                    .set_task(&worktree.id, &task.id)
                    .map_err(|e| e.to_string())?;
                (worktree, false)
            }
            (None, None) => {
                let Some(repo) = repo else {
                    return Err("No repository path configured for project".to_string());
                };
                let project_name = repo
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "project".to_string());
                let worktree_path = worktree_base_dir()
                    .join(project_name)
                    .join(&safe_branch);

                self.git
                    .create_worktree(repo, &worktree_path, &branch_name, base_branch)
                    .await
                    .map_err(|e| format!("Failed to create worktree: {e}"))?;

                let row = match self.worktrees.create(&CreateWorktree {
                    project_id,
                    branch_name: &branch_name,
                    worktree_path: &worktree_path.to_string_lossy(),
                    base_branch,
                    task_id: Some(&task.id),
                }) {
                    Ok(row) => row,
                    Err(e) => {
                        // The git worktree exists but the row does not:
                        // remove the worktree so the next call can retry.
                        let _ = self
                            .git
                            .delete_worktree(repo, &worktree_path, true, Some(&branch_name))
                            .await;
                        return Err(format!("Failed to register worktree: {e}"));
                    }
                };

                // Seed the worktree with the project marker so the child
                // agent resolves the same project.
                if let Err(e) = ProjectContext::copy_marker(repo, &worktree_path) {
                    let _ = self.worktrees.delete(&row.id);
                    let _ = self
                        .git
                        .delete_worktree(repo, &worktree_path, true, Some(&branch_name))
                        .await;
                    return Err(format!("Worktree initialization failed: {e}"));
                }
                (row, true)
            }
        };

        let prompt = build_task_prompt(task);

        let (allowed, reason, depth) = self.runner.can_spawn(&request.parent_session_id);
        if !allowed {
            self.rollback_worktree(&worktree, repo, &branch_name, newly_created)
                .await;
            return Err(reason.unwrap_or_else(|| "spawn depth exceeded".to_string()));
        }

        let source = SessionSource::parse(provider).unwrap_or(SessionSource::Claude);
        let prepared = match self.runner.prepare_run(
            &request.parent_session_id,
            project_id,
            machine_id(),
            source,
        ) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.rollback_worktree(&worktree, repo, &branch_name, newly_created)
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self.worktrees.claim(&worktree.id, &prepared.session.id) {
            self.rollback_worktree(&worktree, repo, &branch_name, newly_created)
                .await;
            return Err(format!("Failed to claim worktree: {e}"));
        }

        let spawn_request = SpawnRequest {
            cli: provider.to_string(),
            cwd: PathBuf::from(&worktree.worktree_path),
            session_id: prepared.session.id.clone(),
            parent_session_id: request.parent_session_id.clone(),
            agent_run_id: prepared.run_id.clone(),
            project_id: project_id.to_string(),
            workflow_name: Some(workflow_name.to_string()),
            agent_depth: depth,
            max_agent_depth: self.runner.max_agent_depth(),
            prompt: prompt.clone(),
            terminal: terminal.to_string(),
            model: model.map(str::to_string),
        };
        let outcome = self.spawners.for_mode(mode).spawn_agent(&spawn_request).await;

        if !outcome.success {
            self.rollback_worktree(&worktree, repo, &branch_name, newly_created)
                .await;
            return Err(outcome
                .error
                .unwrap_or_else(|| format!("{} spawn failed", request.mode)));
        }

        if let Err(e) = self.tasks.update(
            &task.id,
            &TaskUpdate {
                status: Some(TaskStatus::InProgress),
                ..TaskUpdate::default()
            },
        ) {
            warn!(task = %task.id, error = %e, "failed to mark task in_progress");
        }

        let mut entry = json!({
            "task_id": task.id,
            "title": task.title,
            "agent_id": prepared.run_id,
            "session_id": prepared.session.id,
            "worktree_id": worktree.id,
            "branch_name": worktree.branch_name,
            "worktree_path": worktree.worktree_path,
        });
        if let Some(pid) = outcome.pid {
            entry["pid"] = json!(pid);
        }
        if let Some(terminal_type) = &outcome.terminal_type {
            entry["terminal_type"] = json!(terminal_type);
        }

        let agent = SpawnedAgent {
            task_id: task.id.clone(),
            agent_id: prepared.run_id,
            session_id: prepared.session.id,
            worktree_id: worktree.id.clone(),
            branch_name: worktree.branch_name.clone(),
        };
        Ok((entry, agent))
    }

    /// Undo a failed spawn attempt: release the claim, and when the
    /// worktree was created by this call, remove it from the store and
    /// from disk (with its branch).
    async fn rollback_worktree(
        &self,
        worktree: &gobby_storage::models::Worktree,
        repo: Option<&Path>,
        branch_name: &str,
        newly_created: bool,
    ) {
        let _ = self.worktrees.release(&worktree.id);
        if newly_created {
            let _ = self.worktrees.delete(&worktree.id);
            if let Some(repo) = repo {
                let _ = self
                    .git
                    .delete_worktree(
                        repo,
                        Path::new(&worktree.worktree_path),
                        true,
                        Some(branch_name),
                    )
                    .await;
            }
        }
    }

    fn repo_path(&self, request: &OrchestrateRequest, project_id: &str) -> Option<PathBuf> {
        if let Some(path) = &request.project_path {
            return Some(PathBuf::from(path));
        }
        self.projects
            .get(project_id)
            .ok()
            .flatten()
            .and_then(|p| p.path)
            .map(PathBuf::from)
    }

    fn release(&self, session_id: &str, reserved: i64) {
        if let Err(e) = self.states.release_reserved_slots(session_id, reserved) {
            warn!(error = %e, "failed to release reserved slots");
        }
    }
}

#[async_trait::async_trait]
impl gobby_workflows::Orchestrator for AgentOrchestrator {
    async fn orchestrate_ready_tasks(&self, params: Value, parent_session_id: &str) -> Value {
        let mut request: OrchestrateRequest =
            serde_json::from_value(params).unwrap_or_default();
        request.parent_session_id = parent_session_id.to_string();
        self.orchestrate(request).await
    }
}

/// `{system_tmp}/gobby-worktrees`.
#[must_use]
pub fn worktree_base_dir() -> PathBuf {
    std::env::temp_dir().join("gobby-worktrees")
}

fn error_result(error: impl Into<String>) -> Value {
    json!({
        "success": false,
        "error": error.into(),
        "spawned": [],
        "skipped": [],
    })
}
