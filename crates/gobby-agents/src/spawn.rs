//! Agent spawners.
//!
//! A spawner starts one child agent process for a task. The orchestrator
//! picks the spawner by mode: `terminal` opens a visible terminal,
//! `headless` runs the CLI detached, `embedded` is an injection point
//! for hosts that manage their own PTYs. Spawners report success/failure
//! through [`SpawnOutcome`] rather than errors — a failed spawn is a
//! per-task skip, never a batch abort.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, warn};

/// Execution mode for spawned agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnMode {
    /// Visible terminal window.
    Terminal,
    /// Host-managed PTY.
    Embedded,
    /// Detached background process.
    Headless,
}

impl SpawnMode {
    /// Parse the wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "terminal" => Some(Self::Terminal),
            "embedded" => Some(Self::Embedded),
            "headless" => Some(Self::Headless),
            _ => None,
        }
    }
}

/// Everything a spawner needs to start one agent.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Provider CLI to run ("claude", "gemini", "codex", ...).
    pub cli: String,
    /// Working directory (the agent's worktree).
    pub cwd: PathBuf,
    /// Child session id.
    pub session_id: String,
    /// Parent session id.
    pub parent_session_id: String,
    /// Agent run id.
    pub agent_run_id: String,
    /// Owning project.
    pub project_id: String,
    /// Workflow assigned to the agent.
    pub workflow_name: Option<String>,
    /// Depth of this agent in the spawn tree.
    pub agent_depth: u32,
    /// Configured maximum depth.
    pub max_agent_depth: u32,
    /// Task prompt.
    pub prompt: String,
    /// Terminal preference for terminal mode ("auto" or a program).
    pub terminal: String,
    /// Model override, when one is set.
    pub model: Option<String>,
}

/// What a spawn attempt produced.
#[derive(Debug, Clone, Default)]
pub struct SpawnOutcome {
    /// Whether the agent process started.
    pub success: bool,
    /// PID when known.
    pub pid: Option<u32>,
    /// Failure detail.
    pub error: Option<String>,
    /// Which terminal program was used (terminal mode only).
    pub terminal_type: Option<String>,
}

impl SpawnOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn ok(pid: Option<u32>) -> Self {
        Self {
            success: true,
            pid,
            ..Self::default()
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Starts one agent process.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Attempt the spawn. Must not panic; failures go in the outcome.
    async fn spawn_agent(&self, request: &SpawnRequest) -> SpawnOutcome;
}

/// The provider CLI invocation for a prompt.
fn provider_command(cli: &str, request: &SpawnRequest) -> (String, Vec<String>) {
    match cli {
        "claude" => {
            let mut args = vec!["-p".to_string(), request.prompt.clone()];
            if let Some(model) = &request.model {
                args.push("--model".to_string());
                args.push(model.clone());
            }
            ("claude".to_string(), args)
        }
        "codex" => ("codex".to_string(), vec!["exec".to_string(), request.prompt.clone()]),
        // Gemini and everything else take the prompt as a flag.
        other => (
            other.to_string(),
            vec!["-p".to_string(), request.prompt.clone()],
        ),
    }
}

fn apply_common_env(command: &mut tokio::process::Command, request: &SpawnRequest) {
    command
        .current_dir(&request.cwd)
        .env("GOBBY_SESSION_ID", &request.session_id)
        .env("GOBBY_PARENT_SESSION_ID", &request.parent_session_id)
        .env("GOBBY_AGENT_RUN_ID", &request.agent_run_id)
        .env("GOBBY_PROJECT_ID", &request.project_id)
        .env("GOBBY_AGENT_DEPTH", request.agent_depth.to_string())
        .env("GOBBY_MAX_AGENT_DEPTH", request.max_agent_depth.to_string());
    if let Some(workflow) = &request.workflow_name {
        command.env("GOBBY_WORKFLOW", workflow);
    }
}

/// Detached background spawner.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSpawner;

#[async_trait]
impl Spawner for HeadlessSpawner {
    async fn spawn_agent(&self, request: &SpawnRequest) -> SpawnOutcome {
        let (program, args) = provider_command(&request.cli, request);
        let mut command = tokio::process::Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        apply_common_env(&mut command, request);

        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                debug!(cli = %request.cli, pid, "spawned headless agent");
                SpawnOutcome::ok(pid)
            }
            Err(e) => {
                warn!(cli = %request.cli, error = %e, "headless spawn failed");
                SpawnOutcome::failed(format!("failed to start {program}: {e}"))
            }
        }
    }
}

/// Spawner that opens a visible terminal running the provider CLI.
#[derive(Debug, Clone, Default)]
pub struct TerminalSpawner;

impl TerminalSpawner {
    /// Pick a terminal program for the request.
    fn terminal_program(request: &SpawnRequest) -> String {
        if request.terminal != "auto" && !request.terminal.is_empty() {
            return request.terminal.clone();
        }
        if let Ok(terminal) = std::env::var("TERMINAL") {
            if !terminal.is_empty() {
                return terminal;
            }
        }
        "x-terminal-emulator".to_string()
    }
}

#[async_trait]
impl Spawner for TerminalSpawner {
    async fn spawn_agent(&self, request: &SpawnRequest) -> SpawnOutcome {
        let terminal = Self::terminal_program(request);
        let (program, args) = provider_command(&request.cli, request);

        let inner: Vec<String> = std::iter::once(program).chain(args).collect();
        let mut command = tokio::process::Command::new(&terminal);
        command.arg("-e").args(&inner);
        apply_common_env(&mut command, request);

        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                debug!(terminal = %terminal, pid, "spawned terminal agent");
                SpawnOutcome {
                    terminal_type: Some(terminal),
                    ..SpawnOutcome::ok(pid)
                }
            }
            Err(e) => SpawnOutcome::failed(format!("failed to open terminal {terminal}: {e}")),
        }
    }
}

/// Placeholder for hosts that embed their own PTY management; without an
/// injected implementation, embedded mode is unavailable.
#[derive(Debug, Clone, Default)]
pub struct UnsupportedEmbeddedSpawner;

#[async_trait]
impl Spawner for UnsupportedEmbeddedSpawner {
    async fn spawn_agent(&self, _request: &SpawnRequest) -> SpawnOutcome {
        SpawnOutcome::failed("embedded spawner not available in this build")
    }
}

/// The three mode-specific spawners as one bundle.
#[derive(Clone)]
pub struct SpawnerSet {
    /// Terminal-mode spawner.
    pub terminal: std::sync::Arc<dyn Spawner>,
    /// Embedded-mode spawner.
    pub embedded: std::sync::Arc<dyn Spawner>,
    /// Headless-mode spawner.
    pub headless: std::sync::Arc<dyn Spawner>,
}

impl SpawnerSet {
    /// The default process-backed set.
    #[must_use]
    pub fn process_backed() -> Self {
        Self {
            terminal: std::sync::Arc::new(TerminalSpawner),
            embedded: std::sync::Arc::new(UnsupportedEmbeddedSpawner),
            headless: std::sync::Arc::new(HeadlessSpawner),
        }
    }

    /// The spawner for a mode.
    #[must_use]
    pub fn for_mode(&self, mode: SpawnMode) -> &std::sync::Arc<dyn Spawner> {
        match mode {
            SpawnMode::Terminal => &self.terminal,
            SpawnMode::Embedded => &self.embedded,
            SpawnMode::Headless => &self.headless,
        }
    }
}

impl std::fmt::Debug for SpawnerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnerSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SpawnRequest {
        SpawnRequest {
            cli: "claude".into(),
            cwd: std::env::temp_dir(),
            session_id: "child".into(),
            parent_session_id: "parent".into(),
            agent_run_id: "run".into(),
            project_id: "proj".into(),
            workflow_name: Some("auto-task".into()),
            agent_depth: 1,
            max_agent_depth: 3,
            prompt: "do the thing".into(),
            terminal: "auto".into(),
            model: None,
        }
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(SpawnMode::parse("terminal"), Some(SpawnMode::Terminal));
        assert_eq!(SpawnMode::parse("headless"), Some(SpawnMode::Headless));
        assert_eq!(SpawnMode::parse("embedded"), Some(SpawnMode::Embedded));
        assert_eq!(SpawnMode::parse("warp-drive"), None);
    }

    #[test]
    fn test_provider_commands() {
        let mut req = request();
        let (program, args) = provider_command("claude", &req);
        assert_eq!(program, "claude");
        assert_eq!(args, vec!["-p", "do the thing"]);

        req.model = Some("opus".into());
        let (_, args) = provider_command("claude", &req);
        assert!(args.contains(&"--model".to_string()));

        let (program, args) = provider_command("codex", &req);
        assert_eq!(program, "codex");
        assert_eq!(args[0], "exec");
    }

    #[tokio::test]
    async fn test_embedded_unsupported() {
        let outcome = UnsupportedEmbeddedSpawner.spawn_agent(&request()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("embedded"));
    }

    #[tokio::test]
    async fn test_headless_missing_binary_fails_cleanly() {
        let mut req = request();
        req.cli = "definitely-not-a-real-cli-binary".into();
        let outcome = HeadlessSpawner.spawn_agent(&req).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_terminal_program_preference() {
        let mut req = request();
        req.terminal = "ghostty".into();
        assert_eq!(TerminalSpawner::terminal_program(&req), "ghostty");
    }
}
