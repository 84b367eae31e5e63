//! Workflow document schema.
//!
//! A workflow is a named YAML/JSON document of triggers. Each trigger
//! names the event (or lifecycle phase) it fires on, an optional
//! condition over the event payload and workflow variables, and an
//! ordered action list. Action parameters stay schemaless — the
//! executor interprets them per verb — so user documents never break on
//! unknown keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A named workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Triggers in file order.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Default variables merged into fresh workflow state.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

/// One trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// When the trigger fires.
    pub when: When,
    /// Actions executed in order; the first non-allow outcome
    /// short-circuits the rest.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// Trigger condition: an event (or lifecycle phase) name plus an
/// optional expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct When {
    /// Unified event name (`session_start`, `before_tool`, ...) or a
    /// lifecycle phase (`on_session_start`, `on_session_end`).
    pub event: String,
    /// Condition over `{data, metadata, variables, event_type, source}`.
    #[serde(default)]
    pub condition: Option<String>,
}

/// One action invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Verb name (`inject_context`, `inject_message`, ...).
    pub action: String,
    /// Verb parameters, interpreted by the executor.
    #[serde(flatten)]
    pub params: HashMap<String, Value>,
}

impl ActionSpec {
    /// String parameter accessor.
    #[must_use]
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Bool parameter accessor (absent = false).
    #[must_use]
    pub fn bool_param(&self, key: &str) -> bool {
        self.params.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Integer parameter accessor.
    #[must_use]
    pub fn int_param(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(Value::as_i64)
    }

    /// `source` may be a single string or a list of strings.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        match self.params.get("source") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Workflow {
    /// Parse a YAML (or JSON — YAML is a superset) document.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error for malformed documents.
    pub fn parse(body: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(body)
    }

    /// Triggers matching an event name, in file order.
    #[must_use]
    pub fn triggers_for(&self, event: &str) -> Vec<&Trigger> {
        self.triggers
            .iter()
            .filter(|t| t.when.event == event)
            .collect()
    }
}
