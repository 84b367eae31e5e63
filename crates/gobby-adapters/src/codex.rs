//! Codex adapter.
//!
//! Codex has no hook system; it has a single `notify` program invoked
//! with a JSON blob when a turn completes. The adapter maps that blob to
//! an `AfterAgent` event and acknowledges with an empty object — the
//! notify path is fire-and-forget, so nothing in the response can
//! influence Codex.

use regex::Regex;
use serde_json::{Value, json};

use gobby_core::{HookEvent, HookEventType, HookResponse, SessionSource};

use crate::CliAdapter;

/// Adapter for Codex notify payloads.
#[derive(Debug, Clone, Default)]
pub struct CodexAdapter;

impl CodexAdapter {
    /// New adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CliAdapter for CodexAdapter {
    fn source(&self) -> SessionSource {
        SessionSource::Codex
    }

    fn translate_to_event(&self, hook_type: &str, input_data: &Value) -> HookEvent {
        let notify_type = if hook_type.is_empty() {
            input_data.get("type").and_then(Value::as_str).unwrap_or("")
        } else {
            hook_type
        };

        let event_type = match notify_type {
            "agent-turn-complete" => HookEventType::AfterAgent,
            _ => HookEventType::Notification,
        };

        // Codex calls the session a thread.
        let session_id = input_data
            .get("thread_id")
            .or_else(|| input_data.get("conversation-id"))
            .or_else(|| input_data.get("session_id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut event = HookEvent::new(event_type, session_id, self.source())
            .with_data(input_data.clone());
        event.cwd = input_data
            .get("cwd")
            .and_then(Value::as_str)
            .map(str::to_string);
        event
    }

    fn translate_from_response(&self, _response: &HookResponse, _hook_type: Option<&str>) -> Value {
        // Fire-and-forget: Codex never reads the response body.
        json!({})
    }
}

/// Rewrite the `notify = [...]` line of a Codex `config.toml`.
///
/// Replaces an existing assignment (matched at line starts) or appends
/// one. Returns the new file body and whether an existing line was
/// replaced — the caller decides whether to write a `.bak` first.
#[must_use]
pub fn install_notify_line(config_toml: &str, dispatcher_invocation: &str) -> (String, bool) {
    let line = format!("notify = [{dispatcher_invocation}]");
    // The assignment must anchor at a line start; a mention inside a
    // comment or string elsewhere on a line does not count.
    let pattern = Regex::new(r"(?m)^\s*notify\s*=.*$").expect("static pattern");

    if pattern.is_match(config_toml) {
        (pattern.replace(config_toml, line.as_str()).into_owned(), true)
    } else {
        let mut body = config_toml.to_string();
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&line);
        body.push('\n');
        (body, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_complete_maps_to_after_agent() {
        let adapter = CodexAdapter::new();
        let event = adapter.translate_to_event(
            "",
            &json!({"type": "agent-turn-complete", "thread_id": "thr_1", "cwd": "/work"}),
        );
        assert_eq!(event.event_type, HookEventType::AfterAgent);
        assert_eq!(event.session_id, "thr_1");
        assert_eq!(event.cwd.as_deref(), Some("/work"));
    }

    #[test]
    fn test_unknown_notify_is_notification() {
        let adapter = CodexAdapter::new();
        let event =
            adapter.translate_to_event("", &json!({"type": "something-else", "thread_id": "t"}));
        assert_eq!(event.event_type, HookEventType::Notification);
    }

    #[test]
    fn test_response_is_empty_ack() {
        let adapter = CodexAdapter::new();
        let native = adapter.translate_from_response(&HookResponse::deny("ignored"), None);
        assert_eq!(native, json!({}));
    }

    #[test]
    fn test_install_notify_appends_when_absent() {
        let (body, replaced) =
            install_notify_line("model = \"o3\"\n", "\"python3\", \"/x/hook.py\"");
        assert!(!replaced);
        assert!(body.ends_with("notify = [\"python3\", \"/x/hook.py\"]\n"));
        assert!(body.starts_with("model = \"o3\"\n"));
    }

    #[test]
    fn test_install_notify_replaces_existing_line() {
        let existing = "model = \"o3\"\nnotify = [\"old\"]\nsandbox = \"readOnly\"\n";
        let (body, replaced) = install_notify_line(existing, "\"new\"");
        assert!(replaced);
        assert!(body.contains("notify = [\"new\"]"));
        assert!(!body.contains("old"));
        assert!(body.contains("sandbox = \"readOnly\""));
    }

    #[test]
    fn test_install_notify_matches_indented_assignment() {
        let existing = "  notify = [\"old\"]\n";
        let (body, replaced) = install_notify_line(existing, "\"new\"");
        assert!(replaced);
        assert!(!body.contains("old"));
    }
}
