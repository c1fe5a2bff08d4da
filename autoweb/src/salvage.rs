//! Robust JSON salvage for LLM output.
//!
//! Models return fenced blocks, bare objects, several top-level objects in a
//! row, or prose-wrapped fragments. The salvager escalates: strip fences and
//! parse; splice multiple top-level objects into an array; finally scan out
//! every balanced `{...}` candidate and keep the ones that parse.

use serde_json::Value;

use crate::error::AgentError;

/// Strips Markdown code fences (``` / ```json) and trims.
fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }
    trimmed
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Extracts balanced top-level `{...}` spans, respecting strings and escapes.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        spans.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// Salvages a JSON value from model output. Objects and arrays both come back
/// as-is; multiple top-level objects are spliced into one array.
pub fn salvage_json(text: &str) -> Result<Value, AgentError> {
    let cleaned = strip_fences(text);

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(value);
    }

    // Several top-level objects in a row: wrap into an array with commas.
    let spans = balanced_objects(&cleaned);
    if spans.len() > 1 {
        let spliced = format!("[{}]", spans.join(","));
        if let Ok(value) = serde_json::from_str::<Value>(&spliced) {
            return Ok(value);
        }
    }

    // Last resort: keep every candidate that parses on its own.
    let mut kept: Vec<Value> = Vec::new();
    for span in spans {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            kept.push(value);
        }
    }
    match kept.len() {
        0 => Err(AgentError::failed(format!(
            "unsalvageable JSON: {}",
            &cleaned.chars().take(120).collect::<String>()
        ))),
        1 => Ok(kept.remove(0)),
        _ => Ok(Value::Array(kept)),
    }
}

/// Salvages specifically a list of objects: a lone object becomes a
/// one-element list, arrays filter to their object elements.
pub fn salvage_object_list(text: &str) -> Result<Vec<serde_json::Map<String, Value>>, AgentError> {
    let value = salvage_json(text)?;
    let list = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(obj) => Some(obj),
                _ => None,
            })
            .collect(),
        Value::Object(obj) => vec![obj],
        other => {
            return Err(AgentError::failed(format!(
                "expected object(s), got {}",
                match other {
                    Value::String(_) => "string",
                    Value::Number(_) => "number",
                    Value::Bool(_) => "bool",
                    Value::Null => "null",
                    _ => "value",
                }
            )))
        }
    };
    Ok(list)
}
