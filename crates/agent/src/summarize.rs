//! Output size limiting (spec §4.5.5): every payload emitted in events or
//! persisted in history is bounded. Values under the limit pass through
//! verbatim; larger ones collapse to a `{truncated, preview, originalLength}`
//! marker so the event log and LLM context stay bounded regardless of what
//! a tool or the model produces.

use serde_json::{json, Value};

pub const TOOL_SUMMARY_MAX_CHARS: usize = 20_000;
pub const DELTA_MAX_CHARS: usize = 4_000;
pub const ASSISTANT_EVENT_MAX_CHARS: usize = 50_000;

pub fn summarize(value: &Value, max_chars: usize) -> Value {
    let serialized = serde_json::to_string(value).unwrap_or_default();
    if serialized.len() <= max_chars {
        return value.clone();
    }
    let preview: String = serialized.chars().take(max_chars).collect();
    json!({
        "truncated": true,
        "preview": preview,
        "originalLength": serialized.len(),
    })
}

pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_small_values_through_verbatim() {
        let v = json!({"a": 1});
        assert_eq!(summarize(&v, 1000), v);
    }

    #[test]
    fn truncates_oversized_values() {
        let v = json!({"a": "x".repeat(100)});
        let out = summarize(&v, 10);
        assert_eq!(out["truncated"], json!(true));
        assert_eq!(out["preview"].as_str().unwrap().len(), 10);
        assert!(out["originalLength"].as_u64().unwrap() > 10);
    }
}
