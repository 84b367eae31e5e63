//! Git operations behind traits.
//!
//! The orchestrator only ever sees [`WorktreeGit`]; the store's commit
//! normalization sees [`gobby_storage::tasks::CommitResolver`]; the
//! workflow handoff sees [`gobby_workflows::GitStatusProvider`].
//! [`GitCli`] implements all three by shelling out to `git`, which is
//! exactly what a developer would run by hand — no linked git library,
//! no surprises with worktree semantics.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Git failures surfaced to the orchestrator as skip reasons.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be executed.
    #[error("failed to run git: {0}")]
    Spawn(String),

    /// git exited non-zero.
    #[error("git {operation} failed: {stderr}")]
    Command {
        /// Operation attempted ("worktree add", ...).
        operation: String,
        /// Trimmed stderr.
        stderr: String,
    },
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Worktree lifecycle operations.
#[async_trait]
pub trait WorktreeGit: Send + Sync {
    /// Create a worktree at `worktree_path` on a new `branch` based on
    /// `base_branch`.
    async fn create_worktree(
        &self,
        repo: &Path,
        worktree_path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> GitResult<()>;

    /// Remove a worktree (and optionally its branch).
    async fn delete_worktree(
        &self,
        repo: &Path,
        worktree_path: &Path,
        force: bool,
        delete_branch: Option<&str>,
    ) -> GitResult<()>;

    /// The repository's default branch, when detectable.
    async fn default_branch(&self, repo: &Path) -> Option<String>;
}

/// `git` subprocess implementation.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn run(repo: &Path, args: &[&str]) -> GitResult<String> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .output()
            .await
            .map_err(|e| GitError::Spawn(e.to_string()))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(GitError::Command {
                operation: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl WorktreeGit for GitCli {
    async fn create_worktree(
        &self,
        repo: &Path,
        worktree_path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> GitResult<()> {
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitError::Spawn(e.to_string()))?;
        }
        let path = worktree_path.to_string_lossy();
        Self::run(
            repo,
            &["worktree", "add", "-b", branch, path.as_ref(), base_branch],
        )
        .await?;
        debug!(branch, path = %path, "created git worktree");
        Ok(())
    }

    async fn delete_worktree(
        &self,
        repo: &Path,
        worktree_path: &Path,
        force: bool,
        delete_branch: Option<&str>,
    ) -> GitResult<()> {
        let path = worktree_path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path.as_ref());
        Self::run(repo, &args).await?;

        if let Some(branch) = delete_branch {
            if let Err(e) = Self::run(repo, &["branch", "-D", branch]).await {
                warn!(branch, error = %e, "failed to delete worktree branch");
            }
        }
        Ok(())
    }

    async fn default_branch(&self, repo: &Path) -> Option<String> {
        // origin/HEAD first; fall back to the current branch.
        if let Ok(reference) =
            Self::run(repo, &["symbolic-ref", "refs/remotes/origin/HEAD", "--short"]).await
        {
            if let Some(branch) = reference.strip_prefix("origin/") {
                return Some(branch.to_string());
            }
        }
        Self::run(repo, &["branch", "--show-current"])
            .await
            .ok()
            .filter(|b| !b.is_empty())
    }
}

/// Sync commit resolver bound to one repository, for the task store.
#[derive(Debug, Clone)]
pub struct RepoCommitResolver {
    repo: PathBuf,
}

impl RepoCommitResolver {
    /// Resolver for `repo`.
    #[must_use]
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }
}

impl gobby_storage::tasks::CommitResolver for RepoCommitResolver {
    fn resolve_short(&self, reference: &str) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(["rev-parse", "--short", reference])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() { None } else { Some(sha) }
    }
}

/// Sync status/log provider for the workflow handoff.
#[derive(Debug, Clone, Default)]
pub struct GitStatusCli;

impl gobby_workflows::GitStatusProvider for GitStatusCli {
    fn status(&self, cwd: &str) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(cwd)
            .args(["status", "--short"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let status = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if status.is_empty() { None } else { Some(status) }
    }

    fn recent_commits(&self, cwd: &str, limit: usize) -> Vec<String> {
        let Ok(output) = Command::new("git")
            .arg("-C")
            .arg(cwd)
            .args(["log", "--oneline", "-n", &limit.to_string()])
            .output()
        else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect()
    }
}
