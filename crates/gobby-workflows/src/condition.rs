//! Trigger condition evaluation.
//!
//! Conditions are small declarative expressions over the event payload
//! and workflow variables:
//!
//! ```text
//! data.prompt == "/clear"
//! variables.coding_provider != "gemini"
//! data.tool_name
//! data.prompt == "/clear" or data.prompt == "/exit"
//! metadata.is_failure and data.tool_name == "Bash"
//! ```
//!
//! `or` binds looser than `and`. A bare path tests truthiness. There is
//! deliberately no function-call or arithmetic syntax — conditions are
//! configuration, not code.

use serde_json::Value;

/// Evaluate `expression` against `context`. Empty expressions are true.
#[must_use]
pub fn evaluate(expression: &str, context: &Value) -> bool {
    let expression = expression.trim();
    if expression.is_empty() {
        return true;
    }
    expression
        .split(" or ")
        .any(|clause| clause.split(" and ").all(|term| term_holds(term, context)))
}

fn term_holds(term: &str, context: &Value) -> bool {
    let term = term.trim();
    if let Some((left, right)) = term.split_once("==") {
        return resolve(left, context) == literal(right);
    }
    if let Some((left, right)) = term.split_once("!=") {
        return resolve(left, context) != literal(right);
    }
    if let Some(path) = term.strip_prefix("not ") {
        return !truthy(&resolve(path, context));
    }
    truthy(&resolve(term, context))
}

fn resolve(path: &str, context: &Value) -> Value {
    let path = path.trim();
    // Quoted strings and literals may appear on either side.
    let as_literal = literal(path);
    if !as_literal.is_null() && (path.starts_with('"') || path.parse::<f64>().is_ok()) {
        return as_literal;
    }
    let mut current = context.clone();
    for segment in path.split('.') {
        current = match &current {
            Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

fn literal(raw: &str) -> Value {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::String(stripped.to_string());
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or(Value::Null),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "data": {"prompt": "/clear", "tool_name": "Bash", "count": 2},
            "metadata": {"is_failure": true},
            "variables": {"coding_provider": "claude"},
        })
    }

    #[test]
    fn test_empty_condition_is_true() {
        assert!(evaluate("", &context()));
        assert!(evaluate("   ", &context()));
    }

    #[test]
    fn test_equality() {
        assert!(evaluate("data.prompt == \"/clear\"", &context()));
        assert!(!evaluate("data.prompt == \"/exit\"", &context()));
        assert!(evaluate("data.count == 2", &context()));
    }

    #[test]
    fn test_inequality() {
        assert!(evaluate("variables.coding_provider != \"gemini\"", &context()));
        assert!(!evaluate("variables.coding_provider != \"claude\"", &context()));
    }

    #[test]
    fn test_truthiness() {
        assert!(evaluate("metadata.is_failure", &context()));
        assert!(!evaluate("metadata.missing", &context()));
        assert!(evaluate("not metadata.missing", &context()));
    }

    #[test]
    fn test_and_or_precedence() {
        assert!(evaluate(
            "data.prompt == \"/clear\" or data.prompt == \"/exit\"",
            &context()
        ));
        assert!(evaluate(
            "metadata.is_failure and data.tool_name == \"Bash\"",
            &context()
        ));
        // (false and true) or true
        assert!(evaluate(
            "metadata.missing and data.count == 2 or metadata.is_failure",
            &context()
        ));
        assert!(!evaluate(
            "metadata.missing and data.count == 2",
            &context()
        ));
    }
}
