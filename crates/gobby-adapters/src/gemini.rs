//! Gemini CLI adapter.
//!
//! Gemini posts PascalCase names in `hook_event_name`, sometimes without
//! the dispatcher wrapper, frequently without a machine id, and with its
//! own tool-name vocabulary. Responses carry `decision`/`reason` plus a
//! `hookSpecificOutput` whose extra keys depend on the hook
//! (`llm_request` for BeforeModel, `toolConfig` for BeforeToolSelection).

use chrono::DateTime;
use serde_json::{Map, Value, json};

use gobby_core::{HookEvent, HookEventType, HookResponse, SessionSource, machine_id};

use crate::CliAdapter;

/// Gemini hook names → unified event types.
const EVENT_MAP: &[(&str, HookEventType)] = &[
    ("SessionStart", HookEventType::SessionStart),
    ("SessionEnd", HookEventType::SessionEnd),
    ("BeforeAgent", HookEventType::BeforeAgent),
    ("AfterAgent", HookEventType::AfterAgent),
    ("BeforeTool", HookEventType::BeforeTool),
    ("AfterTool", HookEventType::AfterTool),
    ("BeforeToolSelection", HookEventType::BeforeToolSelection),
    ("BeforeModel", HookEventType::BeforeModel),
    ("AfterModel", HookEventType::AfterModel),
    // Gemini calls compaction PreCompress.
    ("PreCompress", HookEventType::PreCompact),
    ("Notification", HookEventType::Notification),
];

/// Gemini tool names → the normalized vocabulary the rest of the daemon
/// uses.
const TOOL_MAP: &[(&str, &str)] = &[
    ("run_shell_command", "Bash"),
    ("RunShellCommand", "Bash"),
    ("ShellTool", "Bash"),
    ("read_file", "Read"),
    ("ReadFile", "Read"),
    ("ReadFileTool", "Read"),
    ("write_file", "Write"),
    ("WriteFile", "Write"),
    ("WriteFileTool", "Write"),
    ("edit_file", "Edit"),
    ("EditFile", "Edit"),
    ("EditFileTool", "Edit"),
    ("GlobTool", "Glob"),
    ("GrepTool", "Grep"),
];

/// Adapter for the Gemini CLI.
#[derive(Debug, Clone, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    /// New adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Normalize a Gemini tool name; unknown names pass through.
    #[must_use]
    pub fn normalize_tool_name(name: &str) -> &str {
        TOOL_MAP
            .iter()
            .find(|(gemini, _)| *gemini == name)
            .map(|(_, normalized)| *normalized)
            .unwrap_or(name)
    }

    fn event_type(hook_type: &str) -> HookEventType {
        EVENT_MAP
            .iter()
            .find(|(name, _)| *name == hook_type)
            .map(|(_, event_type)| *event_type)
            .unwrap_or(HookEventType::Notification)
    }
}

impl CliAdapter for GeminiAdapter {
    fn source(&self) -> SessionSource {
        SessionSource::Gemini
    }

    fn translate_to_event(&self, hook_type: &str, input_data: &Value) -> HookEvent {
        // Gemini payloads sometimes arrive without the dispatcher
        // wrapper; in that case the hook name is inside the payload.
        let hook_type = if hook_type.is_empty() {
            input_data
                .get("hook_event_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
        } else {
            hook_type
        };

        let session_id = input_data
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut event = HookEvent::new(Self::event_type(hook_type), session_id, self.source())
            .with_data(input_data.clone());

        if let Some(raw) = input_data.get("timestamp").and_then(Value::as_str) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                event.timestamp = parsed.to_utc();
            }
        }

        // Gemini does not always send a machine id; derive a stable one
        // from the host name.
        event.machine_id = input_data
            .get("machine_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(machine_id().to_string()));
        event.cwd = input_data
            .get("cwd")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(tool_name) = input_data.get("tool_name").and_then(Value::as_str) {
            let normalized = Self::normalize_tool_name(tool_name);
            event
                .metadata
                .insert("original_tool_name".to_string(), json!(tool_name));
            event
                .metadata
                .insert("normalized_tool_name".to_string(), json!(normalized));
        }

        event
    }

    fn translate_from_response(&self, response: &HookResponse, hook_type: Option<&str>) -> Value {
        let mut result = json!({
            "decision": response.decision.to_string(),
        });
        if let Some(reason) = &response.reason {
            result["reason"] = json!(reason);
        }

        let mut hook_specific = Map::new();
        if let Some(context) = &response.context {
            hook_specific.insert("additionalContext".to_string(), json!(context));
        }
        match (hook_type, &response.modify_args) {
            (Some("BeforeModel"), Some(args)) => {
                hook_specific.insert("llm_request".to_string(), args.clone());
            }
            (Some("BeforeToolSelection"), Some(args)) => {
                hook_specific.insert("toolConfig".to_string(), args.clone());
            }
            _ => {}
        }
        if !hook_specific.is_empty() {
            result["hookSpecificOutput"] = Value::Object(hook_specific);
        }

        if let Some(message) = &response.system_message {
            result["systemMessage"] = json!(message);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobby_core::Decision;

    #[test]
    fn test_pascal_case_hooks_map() {
        let adapter = GeminiAdapter::new();
        let event = adapter.translate_to_event(
            "BeforeAgent",
            &json!({"session_id": "g-1", "cwd": "/work"}),
        );
        assert_eq!(event.event_type, HookEventType::BeforeAgent);
        assert_eq!(event.session_id, "g-1");
    }

    #[test]
    fn test_precompress_maps_to_pre_compact() {
        let adapter = GeminiAdapter::new();
        let event = adapter.translate_to_event("PreCompress", &json!({"session_id": "g-1"}));
        assert_eq!(event.event_type, HookEventType::PreCompact);
    }

    #[test]
    fn test_unwrapped_payload_uses_embedded_name() {
        let adapter = GeminiAdapter::new();
        let event = adapter.translate_to_event(
            "",
            &json!({"hook_event_name": "SessionStart", "session_id": "g-1"}),
        );
        assert_eq!(event.event_type, HookEventType::SessionStart);
    }

    #[test]
    fn test_missing_machine_id_is_derived() {
        let adapter = GeminiAdapter::new();
        let first = adapter.translate_to_event("SessionStart", &json!({"session_id": "g-1"}));
        let second = adapter.translate_to_event("SessionStart", &json!({"session_id": "g-2"}));
        assert!(first.machine_id.is_some());
        // Deterministic per host.
        assert_eq!(first.machine_id, second.machine_id);
    }

    #[test]
    fn test_tool_names_are_normalized() {
        let adapter = GeminiAdapter::new();
        let event = adapter.translate_to_event(
            "BeforeTool",
            &json!({"session_id": "g-1", "tool_name": "run_shell_command"}),
        );
        assert_eq!(
            event.metadata.get("normalized_tool_name"),
            Some(&json!("Bash"))
        );
        assert_eq!(
            event.metadata.get("original_tool_name"),
            Some(&json!("run_shell_command"))
        );
        assert_eq!(GeminiAdapter::normalize_tool_name("SomethingNew"), "SomethingNew");
    }

    #[test]
    fn test_timestamp_parsed_when_present() {
        let adapter = GeminiAdapter::new();
        let event = adapter.translate_to_event(
            "SessionStart",
            &json!({"session_id": "g-1", "timestamp": "2026-01-15T10:30:00Z"}),
        );
        assert_eq!(event.timestamp.to_rfc3339(), "2026-01-15T10:30:00+00:00");
    }

    #[test]
    fn test_response_decision_and_reason() {
        let adapter = GeminiAdapter::new();
        let native = adapter.translate_from_response(&HookResponse::deny("nope"), None);
        assert_eq!(native["decision"], json!("deny"));
        assert_eq!(native["reason"], json!("nope"));
    }

    #[test]
    fn test_before_model_modify_args() {
        let adapter = GeminiAdapter::new();
        let mut response = HookResponse::allow();
        response.modify_args = Some(json!({"temperature": 0.2}));
        let native = adapter.translate_from_response(&response, Some("BeforeModel"));
        assert_eq!(
            native["hookSpecificOutput"]["llm_request"],
            json!({"temperature": 0.2})
        );

        let native = adapter.translate_from_response(&response, Some("BeforeToolSelection"));
        assert_eq!(
            native["hookSpecificOutput"]["toolConfig"],
            json!({"temperature": 0.2})
        );

        // Other hooks get no modify output.
        let native = adapter.translate_from_response(&response, Some("AfterTool"));
        assert!(native.get("hookSpecificOutput").is_none());
    }

    #[test]
    fn test_allow_without_content_is_minimal() {
        let adapter = GeminiAdapter::new();
        let native = adapter.translate_from_response(&HookResponse::allow(), Some("AfterAgent"));
        assert_eq!(native, json!({"decision": "allow"}));
        assert_eq!(HookResponse::allow().decision, Decision::Allow);
    }
}
