//! Transcript analysis.
//!
//! CLI transcripts are JSONL: one object per line, empty lines skipped,
//! shapes varying slightly per CLI. The analyzer pulls out what the
//! handoff needs — the initial goal, files touched by write-ish tools,
//! and a tail of recent activity — and nothing else.

use serde_json::Value;

/// How many recent entries the activity tail keeps; the handoff renders
/// at most this many lines.
const RECENT_ACTIVITY_LIMIT: usize = 5;

/// What a transcript tells us.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptAnalysis {
    /// First user message — the session's initial goal.
    pub initial_goal: Option<String>,
    /// Files touched by Write/Edit-style tools, deduped in order.
    pub files_modified: Vec<String>,
    /// Short lines describing the most recent entries.
    pub recent_activity: Vec<String>,
    /// Total parsed entries.
    pub entry_count: usize,
}

/// Parse and analyze a JSONL transcript body.
#[must_use]
pub fn analyze(body: &str) -> TranscriptAnalysis {
    let mut analysis = TranscriptAnalysis::default();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        analysis.entry_count += 1;

        let entry_type = entry.get("type").and_then(Value::as_str).unwrap_or("");
        match entry_type {
            "user" => {
                if let Some(text) = message_text(&entry) {
                    if analysis.initial_goal.is_none() {
                        analysis.initial_goal = Some(clip(&text, 300));
                    }
                    push_activity(&mut analysis.recent_activity, format!("user: {}", clip(&text, 120)));
                }
            }
            "assistant" => {
                if let Some(text) = message_text(&entry) {
                    push_activity(
                        &mut analysis.recent_activity,
                        format!("assistant: {}", clip(&text, 120)),
                    );
                }
                for (tool, file) in tool_uses(&entry) {
                    if let Some(file) = file {
                        if is_write_tool(&tool) && !analysis.files_modified.contains(&file) {
                            analysis.files_modified.push(file.clone());
                        }
                        push_activity(&mut analysis.recent_activity, format!("{tool}: {file}"));
                    } else {
                        push_activity(&mut analysis.recent_activity, format!("{tool}"));
                    }
                }
            }
            _ => {}
        }
    }

    analysis
}

fn is_write_tool(tool: &str) -> bool {
    matches!(tool, "Write" | "Edit" | "MultiEdit" | "NotebookEdit")
}

/// Text of a message entry; content may be a string or a block list.
fn message_text(entry: &Value) -> Option<String> {
    let content = entry.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let text: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if text.is_empty() {
                None
            } else {
                Some(text.join("\n"))
            }
        }
        _ => None,
    }
}

/// `(tool_name, file_path?)` pairs from an assistant entry's tool_use
/// blocks.
fn tool_uses(entry: &Value) -> Vec<(String, Option<String>)> {
    let Some(Value::Array(blocks)) = entry.get("message").and_then(|m| m.get("content")) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|b| {
            let name = b.get("name").and_then(Value::as_str)?.to_string();
            let file = b
                .get("input")
                .and_then(|i| i.get("file_path"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some((name, file))
        })
        .collect()
}

fn push_activity(activity: &mut Vec<String>, line: String) {
    activity.push(line);
    if activity.len() > RECENT_ACTIVITY_LIMIT {
        activity.remove(0);
    }
}

fn clip(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        trimmed.to_string()
    } else {
        let clipped: String = trimmed.chars().take(max).collect();
        format!("{clipped}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> String {
        [
            r#"{"type": "user", "message": {"content": "fix the login bug"}}"#,
            "",
            r#"{"type": "assistant", "message": {"content": [{"type": "text", "text": "Looking at auth.rs"}, {"type": "tool_use", "name": "Read", "input": {"file_path": "src/auth.rs"}}]}}"#,
            r#"{"type": "assistant", "message": {"content": [{"type": "tool_use", "name": "Edit", "input": {"file_path": "src/auth.rs"}}]}}"#,
            r#"{"type": "assistant", "message": {"content": [{"type": "tool_use", "name": "Write", "input": {"file_path": "src/auth_test.rs"}}]}}"#,
            "not json at all",
            r#"{"type": "user", "message": {"content": "now add a test"}}"#,
        ]
        .join("\n")
    }

    #[test]
    fn test_initial_goal_is_first_user_message() {
        let analysis = analyze(&transcript());
        assert_eq!(analysis.initial_goal.as_deref(), Some("fix the login bug"));
    }

    #[test]
    fn test_files_modified_are_write_tools_only() {
        let analysis = analyze(&transcript());
        assert_eq!(analysis.files_modified, vec!["src/auth.rs", "src/auth_test.rs"]);
    }

    #[test]
    fn test_empty_and_garbage_lines_skipped() {
        let analysis = analyze(&transcript());
        // 5 valid entries: garbage line and blank line don't count.
        assert_eq!(analysis.entry_count, 5);
    }

    #[test]
    fn test_recent_activity_tail_is_bounded() {
        let mut lines = Vec::new();
        for i in 0..30 {
            lines.push(format!(
                r#"{{"type": "user", "message": {{"content": "message {i}"}}}}"#
            ));
        }
        let analysis = analyze(&lines.join("\n"));
        assert_eq!(analysis.recent_activity.len(), RECENT_ACTIVITY_LIMIT);
        assert!(analysis.recent_activity.last().unwrap().contains("message 29"));
    }

    #[test]
    fn test_empty_transcript() {
        let analysis = analyze("");
        assert_eq!(analysis, TranscriptAnalysis::default());
    }
}
