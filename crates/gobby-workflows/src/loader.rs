//! Workflow document discovery.
//!
//! Load order: built-in documents, then `~/.gobby/workflows/`, then
//! `{project}/.gobby/workflows/` — later layers shadow earlier ones by
//! name, so a project can override the built-in handoff behavior.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::definition::Workflow;

/// The built-in session-handoff workflow; always available even on a
/// fresh install with no workflow files.
const BUILTIN_SESSION_HANDOFF: &str = include_str!("builtin/session-handoff.yaml");

/// Loads workflow documents from the layered search path.
#[derive(Debug, Clone, Default)]
pub struct WorkflowLoader {
    home_override: Option<std::path::PathBuf>,
}

impl WorkflowLoader {
    /// Loader over the default `~/.gobby` home.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with an alternate home directory (tests).
    #[must_use]
    pub fn with_home(home: impl Into<std::path::PathBuf>) -> Self {
        Self {
            home_override: Some(home.into()),
        }
    }

    /// Load every visible workflow, keyed by name.
    #[must_use]
    pub fn load_all(&self, project_path: Option<&Path>) -> HashMap<String, Workflow> {
        let mut workflows = HashMap::new();

        for (name, workflow) in builtin_workflows() {
            workflows.insert(name, workflow);
        }

        let home = self
            .home_override
            .clone()
            .unwrap_or_else(gobby_core::dirs::gobby_home);
        load_dir(&home.join("workflows"), &mut workflows);

        if let Some(project) = project_path {
            load_dir(&project.join(".gobby").join("workflows"), &mut workflows);
        }

        workflows
    }

    /// Load one workflow by name.
    #[must_use]
    pub fn load(&self, name: &str, project_path: Option<&Path>) -> Option<Workflow> {
        self.load_all(project_path).remove(name)
    }

    /// Whether `name` resolves to a parseable workflow — used to reject
    /// an agent spawn before any worktree is created.
    #[must_use]
    pub fn validate(&self, name: &str, project_path: Option<&Path>) -> Result<(), String> {
        if self.load(name, project_path).is_some() {
            Ok(())
        } else {
            Err(format!("workflow '{name}' not found"))
        }
    }
}

fn builtin_workflows() -> Vec<(String, Workflow)> {
    match Workflow::parse(BUILTIN_SESSION_HANDOFF) {
        Ok(workflow) => vec![(workflow.name.clone(), workflow)],
        Err(e) => {
            // Unreachable for a well-formed embedded document.
            warn!(error = %e, "builtin workflow failed to parse");
            Vec::new()
        }
    }
}

fn load_dir(dir: &Path, into: &mut HashMap<String, Workflow>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_workflow_file = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"));
        if !is_workflow_file {
            continue;
        }
        match std::fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|body| {
            Workflow::parse(&body).map_err(|e| e.to_string())
        }) {
            Ok(workflow) => {
                debug!(name = %workflow.name, path = %path.display(), "loaded workflow");
                into.insert(workflow.name.clone(), workflow);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed workflow");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_handoff_always_present() {
        let home = TempDir::new().unwrap();
        let loader = WorkflowLoader::with_home(home.path());
        let workflows = loader.load_all(None);
        assert!(workflows.contains_key("session-handoff"));
    }

    #[test]
    fn test_user_file_shadows_builtin() {
        let home = TempDir::new().unwrap();
        let dir = home.path().join("workflows");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("session-handoff.yaml"),
            "name: session-handoff\ndescription: custom\ntriggers: []\n",
        )
        .unwrap();

        let loader = WorkflowLoader::with_home(home.path());
        let workflow = loader.load("session-handoff", None).unwrap();
        assert_eq!(workflow.description.as_deref(), Some("custom"));
    }

    #[test]
    fn test_project_layer_shadows_user_layer() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let user_dir = home.path().join("workflows");
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(user_dir.join("wf.yaml"), "name: wf\ndescription: user\n").unwrap();

        let project_dir = project.path().join(".gobby").join("workflows");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("wf.yaml"), "name: wf\ndescription: project\n").unwrap();

        let loader = WorkflowLoader::with_home(home.path());
        let workflow = loader.load("wf", Some(project.path())).unwrap();
        assert_eq!(workflow.description.as_deref(), Some("project"));
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let home = TempDir::new().unwrap();
        let dir = home.path().join("workflows");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bad.yaml"), ": not yaml {{{{").unwrap();
        std::fs::write(dir.join("good.yaml"), "name: good\n").unwrap();

        let loader = WorkflowLoader::with_home(home.path());
        let workflows = loader.load_all(None);
        assert!(workflows.contains_key("good"));
        assert!(!workflows.contains_key("bad"));
    }

    #[test]
    fn test_validate() {
        let home = TempDir::new().unwrap();
        let loader = WorkflowLoader::with_home(home.path());
        assert!(loader.validate("session-handoff", None).is_ok());
        assert!(loader.validate("nope", None).is_err());
    }
}
