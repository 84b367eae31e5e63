//! Compact-handoff context: assembly and markdown rendering.

use serde::{Deserialize, Serialize};

/// Live git enrichment for handoffs.
///
/// The workflow crate never talks to git itself; the daemon injects an
/// implementation (tests inject fixtures).
pub trait GitStatusProvider: Send + Sync {
    /// `git status --short` equivalent for a directory, if it is a repo.
    fn status(&self, cwd: &str) -> Option<String>;
    /// Recent commit lines (`<short-sha> <subject>`), newest first.
    fn recent_commits(&self, cwd: &str, limit: usize) -> Vec<String>;
}

/// A commit line for the handoff.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandoffCommit {
    /// Short SHA.
    pub hash: String,
    /// Subject line.
    pub message: String,
}

/// Task snapshot carried into the handoff.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandoffTask {
    /// Task id.
    pub id: String,
    /// Task title.
    pub title: String,
    /// Status string ("open", "in_progress", ...).
    pub status: String,
}

/// Worktree snapshot carried into the handoff.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandoffWorktree {
    /// Branch checked out.
    pub branch_name: String,
    /// Path on disk.
    pub worktree_path: String,
    /// Branch the worktree was created from.
    pub base_branch: String,
    /// Task the worktree serves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Everything the compact handoff knows about a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandoffContext {
    /// Active task, when the session had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<HandoffTask>,
    /// Worktree the session ran in, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<HandoffWorktree>,
    /// Recent commits, newest first.
    #[serde(default)]
    pub git_commits: Vec<HandoffCommit>,
    /// Short git status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_status: Option<String>,
    /// Files the transcript says were modified.
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// First user message of the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_goal: Option<String>,
    /// Tail of recent transcript activity.
    #[serde(default)]
    pub recent_activity: Vec<String>,
}

impl HandoffContext {
    /// Whether there is anything worth rendering.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_task.is_none()
            && self.worktree.is_none()
            && self.git_commits.is_empty()
            && self.git_status.is_none()
            && self.files_modified.is_empty()
            && self.initial_goal.is_none()
            && self.recent_activity.is_empty()
    }
}

/// Render the handoff as markdown. Empty context renders to the empty
/// string; empty sections are omitted entirely.
#[must_use]
pub fn format_as_markdown(context: &HandoffContext) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(task) = &context.active_task {
        let title = if task.title.is_empty() { "(untitled)" } else { &task.title };
        sections.push(format!(
            "## Active Task\n- {title} ({id}) — {status}",
            id = if task.id.is_empty() { "unknown" } else { &task.id },
            status = if task.status.is_empty() { "unknown" } else { &task.status },
        ));
    }

    if let Some(worktree) = &context.worktree {
        let mut body = format!(
            "## Worktree\n- branch: {}\n- path: {}\n- base: {}",
            worktree.branch_name, worktree.worktree_path, worktree.base_branch
        );
        if let Some(task_id) = &worktree.task_id {
            body.push_str(&format!("\n- task: {task_id}"));
        }
        sections.push(body);
    }

    let commits: Vec<&HandoffCommit> = context
        .git_commits
        .iter()
        .filter(|c| !c.hash.is_empty())
        .collect();
    if !commits.is_empty() {
        let lines: Vec<String> = commits
            .iter()
            .map(|c| format!("- {} {}", c.hash, c.message))
            .collect();
        sections.push(format!("## Recent Commits\n{}", lines.join("\n")));
    }

    if let Some(status) = context.git_status.as_deref().filter(|s| !s.is_empty()) {
        sections.push(format!("## Git Status\n```\n{status}\n```"));

        // Only meaningful alongside git status: drop files already
        // captured by a commit.
        let committed: Vec<&str> = context
            .git_commits
            .iter()
            .map(|c| c.message.as_str())
            .collect();
        let pending: Vec<&String> = context
            .files_modified
            .iter()
            .filter(|f| !committed.iter().any(|msg| msg.contains(f.as_str())))
            .collect();
        if !pending.is_empty() {
            let lines: Vec<String> = pending.iter().map(|f| format!("- {f}")).collect();
            sections.push(format!("## Files Modified\n{}", lines.join("\n")));
        }
    }

    // The initial goal only matters while the task is still in flight.
    let task_open = context
        .active_task
        .as_ref()
        .is_none_or(|t| matches!(t.status.as_str(), "open" | "in_progress" | ""));
    if task_open {
        if let Some(goal) = context.initial_goal.as_deref().filter(|g| !g.is_empty()) {
            sections.push(format!("## Initial Goal\n{goal}"));
        }
    }

    if !context.recent_activity.is_empty() {
        let lines: Vec<String> = context
            .recent_activity
            .iter()
            .map(|a| format!("- {a}"))
            .collect();
        sections.push(format!("## Recent Activity\n{}", lines.join("\n")));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context_renders_empty() {
        assert_eq!(format_as_markdown(&HandoffContext::default()), "");
    }

    #[test]
    fn test_active_task_section() {
        let context = HandoffContext {
            active_task: Some(HandoffTask {
                id: "t-1".into(),
                title: "Fix auth".into(),
                status: "in_progress".into(),
            }),
            ..HandoffContext::default()
        };
        let markdown = format_as_markdown(&context);
        assert!(markdown.contains("## Active Task"));
        assert!(markdown.contains("Fix auth (t-1) — in_progress"));
    }

    #[test]
    fn test_active_task_missing_fields() {
        let context = HandoffContext {
            active_task: Some(HandoffTask::default()),
            ..HandoffContext::default()
        };
        let markdown = format_as_markdown(&context);
        assert!(markdown.contains("(untitled) (unknown) — unknown"));
    }

    #[test]
    fn test_worktree_with_and_without_task() {
        let mut context = HandoffContext {
            worktree: Some(HandoffWorktree {
                branch_name: "task/abc".into(),
                worktree_path: "/tmp/wt".into(),
                base_branch: "main".into(),
                task_id: Some("t-1".into()),
            }),
            ..HandoffContext::default()
        };
        let markdown = format_as_markdown(&context);
        assert!(markdown.contains("- base: main"));
        assert!(markdown.contains("- task: t-1"));

        context.worktree.as_mut().unwrap().task_id = None;
        assert!(!format_as_markdown(&context).contains("- task:"));
    }

    #[test]
    fn test_commit_with_empty_hash_dropped() {
        let context = HandoffContext {
            git_commits: vec![
                HandoffCommit { hash: String::new(), message: "ghost".into() },
                HandoffCommit { hash: "abc1234".into(), message: "real".into() },
            ],
            ..HandoffContext::default()
        };
        let markdown = format_as_markdown(&context);
        assert!(markdown.contains("abc1234 real"));
        assert!(!markdown.contains("ghost"));
    }

    #[test]
    fn test_files_modified_requires_git_status() {
        let context = HandoffContext {
            files_modified: vec!["src/a.rs".into()],
            ..HandoffContext::default()
        };
        assert!(!format_as_markdown(&context).contains("Files Modified"));

        let context = HandoffContext {
            git_status: Some("M src/a.rs".into()),
            files_modified: vec!["src/a.rs".into()],
            ..HandoffContext::default()
        };
        assert!(format_as_markdown(&context).contains("## Files Modified\n- src/a.rs"));
    }

    #[test]
    fn test_files_modified_filters_committed() {
        let context = HandoffContext {
            git_status: Some("M src/b.rs".into()),
            git_commits: vec![HandoffCommit {
                hash: "abc".into(),
                message: "update src/a.rs".into(),
            }],
            files_modified: vec!["src/a.rs".into(), "src/b.rs".into()],
            ..HandoffContext::default()
        };
        let markdown = format_as_markdown(&context);
        assert!(markdown.contains("- src/b.rs"));
        assert!(!markdown.contains("- src/a.rs\n"));
    }

    #[test]
    fn test_initial_goal_hidden_for_closed_task() {
        let mut context = HandoffContext {
            active_task: Some(HandoffTask {
                id: "t".into(),
                title: "t".into(),
                status: "open".into(),
            }),
            initial_goal: Some("build the thing".into()),
            ..HandoffContext::default()
        };
        assert!(format_as_markdown(&context).contains("## Initial Goal"));

        context.active_task.as_mut().unwrap().status = "closed".into();
        assert!(!format_as_markdown(&context).contains("## Initial Goal"));
    }

    #[test]
    fn test_multiple_sections_joined() {
        let context = HandoffContext {
            active_task: Some(HandoffTask {
                id: "t".into(),
                title: "t".into(),
                status: "open".into(),
            }),
            recent_activity: vec!["user: hi".into()],
            ..HandoffContext::default()
        };
        let markdown = format_as_markdown(&context);
        assert!(markdown.contains("## Active Task"));
        assert!(markdown.contains("## Recent Activity\n- user: hi"));
    }
}
