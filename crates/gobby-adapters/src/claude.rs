//! Claude Code adapter.
//!
//! Claude Code posts kebab-case hook names and expects a response with
//! `continue`, an `approve`/`block` decision, and context tucked inside
//! `hookSpecificOutput` keyed by the PascalCase `hookEventName`.

use serde_json::{Value, json};

use gobby_core::{Decision, HookEvent, HookEventType, HookResponse, SessionSource};

use crate::CliAdapter;

/// Claude Code hook names → unified event types.
const EVENT_MAP: &[(&str, HookEventType)] = &[
    ("session-start", HookEventType::SessionStart),
    ("session-end", HookEventType::SessionEnd),
    ("user-prompt-submit", HookEventType::BeforeAgent),
    ("stop", HookEventType::AfterAgent),
    ("pre-tool-use", HookEventType::BeforeTool),
    ("post-tool-use", HookEventType::AfterTool),
    ("post-tool-use-failure", HookEventType::AfterTool),
    ("pre-compact", HookEventType::PreCompact),
    ("subagent-start", HookEventType::SubagentStart),
    ("subagent-stop", HookEventType::SubagentStop),
    ("permission-request", HookEventType::PermissionRequest),
    ("notification", HookEventType::Notification),
];

/// Claude Code hook names → the `hookEventName` Claude's schema requires.
const HOOK_EVENT_NAME_MAP: &[(&str, &str)] = &[
    ("session-start", "SessionStart"),
    ("session-end", "SessionEnd"),
    ("user-prompt-submit", "UserPromptSubmit"),
    ("stop", "Stop"),
    ("pre-tool-use", "PreToolUse"),
    ("post-tool-use", "PostToolUse"),
    ("post-tool-use-failure", "PostToolUse"),
    ("pre-compact", "PreCompact"),
    ("subagent-start", "SubagentStart"),
    ("subagent-stop", "SubagentStop"),
    ("permission-request", "PermissionRequest"),
    ("notification", "Notification"),
];

/// Adapter for Claude Code.
#[derive(Debug, Clone, Default)]
pub struct ClaudeAdapter;

impl ClaudeAdapter {
    /// New adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn event_type(hook_type: &str) -> HookEventType {
        EVENT_MAP
            .iter()
            .find(|(name, _)| *name == hook_type)
            .map(|(_, event_type)| *event_type)
            // Fail-open: an unknown hook becomes an observational event.
            .unwrap_or(HookEventType::Notification)
    }

    fn hook_event_name(hook_type: &str) -> &'static str {
        HOOK_EVENT_NAME_MAP
            .iter()
            .find(|(name, _)| *name == hook_type)
            .map(|(_, pascal)| *pascal)
            .unwrap_or("Unknown")
    }
}

impl CliAdapter for ClaudeAdapter {
    fn source(&self) -> SessionSource {
        SessionSource::Claude
    }

    fn translate_to_event(&self, hook_type: &str, input_data: &Value) -> HookEvent {
        // Claude calls it session_id, but it is the external id.
        let session_id = input_data
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut event = HookEvent::new(Self::event_type(hook_type), session_id, self.source())
            .with_data(input_data.clone());
        event.machine_id = input_data
            .get("machine_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        event.cwd = input_data
            .get("cwd")
            .and_then(Value::as_str)
            .map(str::to_string);

        if hook_type == "post-tool-use-failure" {
            event.metadata.insert("is_failure".to_string(), json!(true));
        }
        event
    }

    fn translate_from_response(&self, response: &HookResponse, hook_type: Option<&str>) -> Value {
        let denied = response.decision == Decision::Deny;
        let mut result = json!({
            "continue": !denied,
        });

        if denied {
            if let Some(reason) = &response.reason {
                result["stopReason"] = json!(reason);
            }
        }

        // Claude's schema wants approve/block, not allow/deny.
        result["decision"] = json!(if denied { "block" } else { "approve" });

        if let Some(context) = &response.context {
            result["hookSpecificOutput"] = json!({
                "hookEventName": Self::hook_event_name(hook_type.unwrap_or_default()),
                "additionalContext": context,
            });
        }

        if let Some(message) = &response.system_message {
            result["systemMessage"] = json!(message);
        }

        // metadata is internal-only and never forwarded.
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Value {
        json!({
            "session_id": "ext-123",
            "machine_id": "m-1",
            "cwd": "/work/repo",
            "transcript_path": "/tmp/t.jsonl",
        })
    }

    #[test]
    fn test_known_hooks_map() {
        let adapter = ClaudeAdapter::new();
        let event = adapter.translate_to_event("session-start", &payload());
        assert_eq!(event.event_type, HookEventType::SessionStart);
        assert_eq!(event.session_id, "ext-123");
        assert_eq!(event.machine_id.as_deref(), Some("m-1"));
        assert_eq!(event.cwd.as_deref(), Some("/work/repo"));
    }

    #[test]
    fn test_unknown_hook_falls_back_to_notification() {
        let adapter = ClaudeAdapter::new();
        let event = adapter.translate_to_event("brand-new-hook", &payload());
        assert_eq!(event.event_type, HookEventType::Notification);
    }

    #[test]
    fn test_failure_hook_sets_metadata() {
        let adapter = ClaudeAdapter::new();
        let event = adapter.translate_to_event("post-tool-use-failure", &payload());
        assert_eq!(event.event_type, HookEventType::AfterTool);
        assert_eq!(event.metadata.get("is_failure"), Some(&json!(true)));
    }

    #[test]
    fn test_allow_response_shape() {
        let adapter = ClaudeAdapter::new();
        let native = adapter.translate_from_response(&HookResponse::allow(), Some("stop"));
        assert_eq!(native["continue"], json!(true));
        assert_eq!(native["decision"], json!("approve"));
        assert!(native.get("hookSpecificOutput").is_none());
        assert!(native.get("stopReason").is_none());
    }

    #[test]
    fn test_deny_response_shape() {
        let adapter = ClaudeAdapter::new();
        let native = adapter
            .translate_from_response(&HookResponse::deny("policy says no"), Some("pre-tool-use"));
        assert_eq!(native["continue"], json!(false));
        assert_eq!(native["decision"], json!("block"));
        assert_eq!(native["stopReason"], json!("policy says no"));
    }

    #[test]
    fn test_context_carries_hook_event_name() {
        let adapter = ClaudeAdapter::new();
        let response = HookResponse::allow().with_context("restored summary");
        let native = adapter.translate_from_response(&response, Some("session-start"));
        let output = &native["hookSpecificOutput"];
        assert_eq!(output["hookEventName"], json!("SessionStart"));
        assert_eq!(output["additionalContext"], json!("restored summary"));
    }

    #[test]
    fn test_system_message_forwarded() {
        let adapter = ClaudeAdapter::new();
        let mut response = HookResponse::allow();
        response.system_message = Some("Context restored".into());
        let native = adapter.translate_from_response(&response, Some("session-start"));
        assert_eq!(native["systemMessage"], json!("Context restored"));
    }

    #[test]
    fn test_metadata_never_forwarded() {
        let adapter = ClaudeAdapter::new();
        let mut response = HookResponse::allow();
        response
            .metadata
            .insert("_platform_session_id".into(), json!("internal"));
        let native = adapter.translate_from_response(&response, Some("stop"));
        assert!(native.get("metadata").is_none());
        assert!(!native.to_string().contains("internal"));
    }
}
