//! Upstream-result parameter binding.
//!
//! Task parameter strings may reference the recorded result of an
//! upstream task as `${tasks.<name>.result}`, optionally followed by a
//! dotted field path (`${tasks.fetch.result.items.0.id}`). A string that
//! is exactly one placeholder is replaced by the referenced JSON value; a
//! placeholder embedded in a larger string is spliced in as text. A
//! dependency that recorded no result (a failure tolerated through
//! `continue_on_failure`) binds JSON `null`.

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::models::execution::TaskExecution;

const PLACEHOLDER_PREFIX: &str = "${tasks.";

/// Bind all placeholders in a parameter map against recorded task state.
pub fn bind_parameters(
    params: &HashMap<String, Value>,
    tasks: &HashMap<String, TaskExecution>,
) -> HashMap<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), bind_value(value, tasks)))
        .collect()
}

fn bind_value(value: &Value, tasks: &HashMap<String, TaskExecution>) -> Value {
    match value {
        Value::String(text) => bind_string(text, tasks),
        Value::Array(items) => Value::Array(items.iter().map(|v| bind_value(v, tasks)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), bind_value(v, tasks)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn bind_string(text: &str, tasks: &HashMap<String, TaskExecution>) -> Value {
    // Exact-match placeholders splice the JSON value itself.
    if let Some(reference) = parse_placeholder(text) {
        return resolve(&reference, tasks);
    }

    if !text.contains(PLACEHOLDER_PREFIX) {
        return Value::String(text.to_string());
    }

    // Embedded placeholders splice the value's string form.
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(PLACEHOLDER_PREFIX) {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        output.push_str(&rest[..start]);
        let candidate = &rest[start..=start + end];
        match parse_placeholder(candidate) {
            Some(reference) => output.push_str(&stringify(&resolve(&reference, tasks))),
            // Malformed reference: keep the literal text.
            None => output.push_str(candidate),
        }
        rest = &rest[start + end + 1..];
    }
    output.push_str(rest);
    Value::String(output)
}

struct ResultReference {
    task: String,
    path: Vec<String>,
}

/// Parse `${tasks.<name>.result[.field...]}`; `None` when `text` is not
/// exactly one well-formed placeholder.
fn parse_placeholder(text: &str) -> Option<ResultReference> {
    let body = text.strip_prefix(PLACEHOLDER_PREFIX)?.strip_suffix('}')?;
    if body.contains('}') {
        return None;
    }
    let mut segments = body.split('.');
    let task = segments.next()?.to_string();
    if task.is_empty() || segments.next()? != "result" {
        return None;
    }
    Some(ResultReference {
        task,
        path: segments.map(str::to_string).collect(),
    })
}

fn resolve(reference: &ResultReference, tasks: &HashMap<String, TaskExecution>) -> Value {
    let Some(result) = tasks.get(&reference.task).and_then(|t| t.result.as_ref()) else {
        return Value::Null;
    };

    let mut current = result;
    for segment in &reference.path {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
