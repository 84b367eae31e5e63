//! Minimal template engine.
//!
//! `{{ path }}` substitution with dotted access, `{% if path %}` /
//! `{% endif %}` conditionals, and `{% for name in path %}` /
//! `{% endfor %}` loops over a JSON value tree. Purely functional over
//! its context; there is no expression language and no way to execute
//! anything. Unknown variables render empty.

use serde_json::Value;

/// Render `template` against `context`.
#[must_use]
pub fn render(template: &str, context: &Value) -> String {
    render_block(template, context)
}

fn render_block(input: &str, context: &Value) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{%") {
        let (before, tagged) = rest.split_at(start);
        output.push_str(&substitute(before, context));

        let Some(tag_end) = tagged.find("%}") else {
            // Unterminated tag: emit literally and stop scanning tags.
            output.push_str(&substitute(tagged, context));
            return output;
        };
        let tag = tagged[2..tag_end].trim();
        let after_tag = &tagged[tag_end + 2..];

        if let Some(path) = tag.strip_prefix("if ") {
            let Some((body, remainder)) = split_balanced(after_tag, "if", "endif") else {
                output.push_str(&substitute(after_tag, context));
                return output;
            };
            if truthy(&lookup(context, path.trim())) {
                output.push_str(&render_block(body, context));
            }
            rest = remainder;
        } else if let Some(spec) = tag.strip_prefix("for ") {
            let Some((body, remainder)) = split_balanced(after_tag, "for", "endfor") else {
                output.push_str(&substitute(after_tag, context));
                return output;
            };
            if let Some((var, path)) = spec.split_once(" in ") {
                if let Value::Array(items) = lookup(context, path.trim()) {
                    for item in items {
                        let mut scoped = context.clone();
                        if let Value::Object(map) = &mut scoped {
                            map.insert(var.trim().to_string(), item);
                        }
                        output.push_str(&render_block(body, &scoped));
                    }
                }
            }
            rest = remainder;
        } else {
            // endif/endfor without an opener, or an unknown tag: drop it.
            rest = after_tag;
        }
    }

    output.push_str(&substitute(rest, context));
    output
}

/// Find the body up to the matching `end<kind>`, honoring nesting.
fn split_balanced<'a>(input: &'a str, kind: &str, end: &str) -> Option<(&'a str, &'a str)> {
    let mut depth = 0usize;
    let mut cursor = 0usize;
    loop {
        let start = input[cursor..].find("{%")?;
        let abs = cursor + start;
        let close = input[abs..].find("%}")?;
        let tag = input[abs + 2..abs + close].trim();
        let after = abs + close + 2;
        if tag == end {
            if depth == 0 {
                return Some((&input[..abs], &input[after..]));
            }
            depth -= 1;
        } else if tag.starts_with(kind) && tag.len() > kind.len() {
            depth += 1;
        }
        cursor = after;
    }
}

fn substitute(input: &str, context: &Value) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        let (before, braced) = rest.split_at(start);
        output.push_str(before);
        match braced.find("}}") {
            Some(end) => {
                let path = braced[2..end].trim();
                output.push_str(&stringify(&lookup(context, path)));
                rest = &braced[end + 2..];
            }
            None => {
                output.push_str(braced);
                return output;
            }
        }
    }
    output.push_str(rest);
    output
}

/// Dotted-path lookup. Array segments accept numeric indices.
fn lookup(context: &Value, path: &str) -> Value {
    let mut current = context.clone();
    for segment in path.split('.') {
        current = match &current {
            Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if current.is_null() {
            break;
        }
    }
    current
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

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
