//! Unified hook event and response model.
//!
//! Every CLI speaks its own dialect of lifecycle hooks; the adapters
//! translate those into [`HookEvent`] before dispatch, and translate the
//! resulting [`HookResponse`] back. The dispatch engine only ever sees
//! these two types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::ids::TaskId;

/// Unified hook event types across all supported CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEventType {
    /// Session has started.
    SessionStart,
    /// Session is ending.
    SessionEnd,
    /// User prompt submitted, before the agent turn begins.
    BeforeAgent,
    /// Agent turn finished (stop).
    AfterAgent,
    /// Before a tool call executes.
    BeforeTool,
    /// After a tool call completes (success or failure).
    AfterTool,
    /// Before context compaction.
    PreCompact,
    /// A subagent is starting.
    SubagentStart,
    /// A subagent has stopped.
    SubagentStop,
    /// A permission request is being shown (Claude Code only).
    PermissionRequest,
    /// A system notification.
    Notification,
    /// Before tool selection (Gemini only).
    BeforeToolSelection,
    /// Before the model request is sent (Gemini only).
    BeforeModel,
    /// After the model response is received (Gemini only).
    AfterModel,
}

impl HookEventType {
    /// All event types, in dispatch-table order.
    pub const ALL: [Self; 14] = [
        Self::SessionStart,
        Self::SessionEnd,
        Self::BeforeAgent,
        Self::AfterAgent,
        Self::BeforeTool,
        Self::AfterTool,
        Self::PreCompact,
        Self::SubagentStart,
        Self::SubagentStop,
        Self::PermissionRequest,
        Self::Notification,
        Self::BeforeToolSelection,
        Self::BeforeModel,
        Self::AfterModel,
    ];
}

impl fmt::Display for HookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionStart => write!(f, "session_start"),
            Self::SessionEnd => write!(f, "session_end"),
            Self::BeforeAgent => write!(f, "before_agent"),
            Self::AfterAgent => write!(f, "after_agent"),
            Self::BeforeTool => write!(f, "before_tool"),
            Self::AfterTool => write!(f, "after_tool"),
            Self::PreCompact => write!(f, "pre_compact"),
            Self::SubagentStart => write!(f, "subagent_start"),
            Self::SubagentStop => write!(f, "subagent_stop"),
            Self::PermissionRequest => write!(f, "permission_request"),
            Self::Notification => write!(f, "notification"),
            Self::BeforeToolSelection => write!(f, "before_tool_selection"),
            Self::BeforeModel => write!(f, "before_model"),
            Self::AfterModel => write!(f, "after_model"),
        }
    }
}

/// Which CLI a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    /// Claude Code.
    Claude,
    /// Gemini CLI.
    Gemini,
    /// Codex.
    Codex,
    /// Antigravity.
    Antigravity,
}

impl SessionSource {
    /// Parse from the wire string used by hook dispatchers.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            "codex" => Some(Self::Codex),
            "antigravity" => Some(Self::Antigravity),
            _ => None,
        }
    }
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Gemini => write!(f, "gemini"),
            Self::Codex => write!(f, "codex"),
            Self::Antigravity => write!(f, "antigravity"),
        }
    }
}

/// A hook event, normalized from a CLI-native payload.
///
/// `session_id` is the *external* id exactly as the CLI delivered it, not
/// the internal [`crate::SessionId`] — dispatch resolves the internal id
/// and stores it under `metadata["_platform_session_id"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    /// Unified event type.
    pub event_type: HookEventType,
    /// External session id as delivered by the CLI.
    pub session_id: String,
    /// Originating CLI.
    pub source: SessionSource,
    /// Event timestamp (RFC3339 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Machine identifier, if the CLI sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    /// Working directory the CLI is running in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// The raw CLI payload, kept as-is for handlers that need native fields.
    #[serde(default)]
    pub data: Value,
    /// Internal key/value scratch space (`_platform_session_id`,
    /// `is_failure`, `original_tool_name`, ...). Never forwarded to CLIs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Active task for the session, resolved by dispatch when a
    /// `worked_on` link exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl HookEvent {
    /// Build an event with the minimum required fields.
    #[must_use]
    pub fn new(event_type: HookEventType, session_id: impl Into<String>, source: SessionSource) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            source,
            timestamp: Utc::now(),
            machine_id: None,
            cwd: None,
            data: Value::Null,
            metadata: HashMap::new(),
            task_id: None,
        }
    }

    /// Attach the raw CLI payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Fetch a string field from the raw payload.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Fetch a string from metadata.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// The resolved internal session id, if dispatch has stored one.
    #[must_use]
    pub fn platform_session_id(&self) -> Option<&str> {
        self.metadata_str("_platform_session_id")
    }
}

/// Decision carried by a [`HookResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Let the action proceed.
    #[default]
    Allow,
    /// Block the action.
    Deny,
    /// Defer to the user.
    Ask,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// Unified response returned by the dispatch engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResponse {
    /// Allow / deny / ask.
    pub decision: Decision,
    /// Human-readable reason, surfaced on deny.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Context text to inject into the CLI conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// User-visible one-liner (e.g. a handoff notification).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// Argument modifications for hooks that support them
    /// (`llm_request` for BeforeModel, `toolConfig` for BeforeToolSelection).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_args: Option<Value>,
    /// Internal metadata. Never forwarded to CLIs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl HookResponse {
    /// An `allow` with no further content.
    #[must_use]
    pub fn allow() -> Self {
        Self::default()
    }

    /// An `allow` carrying a reason (used by the fail-open paths).
    #[must_use]
    pub fn allow_with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// A `deny` with a reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Attach injected context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Append context, newline-separated, preserving any existing text.
    pub fn append_context(&mut self, extra: &str) {
        match &mut self.context {
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(extra);
            }
            None => self.context = Some(extra.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_display() {
        assert_eq!(HookEventType::SessionStart.to_string(), "session_start");
        assert_eq!(HookEventType::BeforeToolSelection.to_string(), "before_tool_selection");
    }

    #[test]
    fn test_event_type_all_is_exhaustive() {
        assert_eq!(HookEventType::ALL.len(), 14);
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(SessionSource::parse("claude"), Some(SessionSource::Claude));
        assert_eq!(SessionSource::parse("codex"), Some(SessionSource::Codex));
        assert_eq!(SessionSource::parse("cursor"), None);
    }

    #[test]
    fn test_event_accessors() {
        let event = HookEvent::new(HookEventType::BeforeAgent, "ext-1", SessionSource::Claude)
            .with_data(serde_json::json!({"prompt": "hello", "cwd": "/tmp"}));
        assert_eq!(event.data_str("prompt"), Some("hello"));
        assert_eq!(event.data_str("missing"), None);
        assert!(event.platform_session_id().is_none());
    }

    #[test]
    fn test_response_append_context() {
        let mut response = HookResponse::allow().with_context("first");
        response.append_context("second");
        assert_eq!(response.context.as_deref(), Some("first\n\nsecond"));

        let mut empty = HookResponse::allow();
        empty.append_context("only");
        assert_eq!(empty.context.as_deref(), Some("only"));
    }

    #[test]
    fn test_decision_default_is_allow() {
        assert_eq!(Decision::default(), Decision::Allow);
        assert_eq!(HookResponse::default().decision, Decision::Allow);
    }

    #[test]
    fn test_response_serde_skips_empty() {
        let json = serde_json::to_value(HookResponse::allow()).unwrap();
        assert_eq!(json, serde_json::json!({"decision": "allow"}));
    }
}
