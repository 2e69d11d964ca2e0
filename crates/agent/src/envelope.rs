//! Parses the model's raw text output into one of the two legal envelope
//! shapes (spec §4.5.3 step 7, §6 "Agent envelope wire format"):
//!
//! - `{"type":"final", "output": <any>}`
//! - `{"type":"tool_call", "toolId": <string>, "input": <object>}`
//!
//! Accepts the raw text, the first outer `{…}` block, or that block inside
//! a fenced ```` ```json ```` code block. Rejects arrays and anything
//! without a `type` field.

use serde_json::Value;

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEnvelope {
    Final { output: Value },
    ToolCall { tool_id: String, input: Value },
}

pub fn parse_envelope(text: &str) -> Result<AgentEnvelope, AgentError> {
    let candidate = extract_candidate(text).ok_or(AgentError::InvalidAgentOutput)?;
    let value: Value = serde_json::from_str(candidate).map_err(|_| AgentError::InvalidAgentOutput)?;
    let obj = value.as_object().ok_or(AgentError::InvalidAgentOutput)?;

    match obj.get("type").and_then(Value::as_str) {
        Some("final") => Ok(AgentEnvelope::Final { output: obj.get("output").cloned().unwrap_or(Value::Null) }),
        Some("tool_call") => {
            let tool_id = obj.get("toolId").and_then(Value::as_str).ok_or(AgentError::InvalidAgentOutput)?.to_string();
            let input = obj.get("input").cloned().unwrap_or_else(|| Value::Object(Default::default()));
            if !input.is_object() {
                return Err(AgentError::InvalidAgentOutput);
            }
            Ok(AgentEnvelope::ToolCall { tool_id, input })
        }
        _ => Err(AgentError::InvalidAgentOutput),
    }
}

/// Finds the JSON text to parse: the whole trimmed string if it's already
/// valid JSON, else the contents of the first ```` ```json ```` fence, else
/// the first balanced `{…}` block found anywhere in the text.
fn extract_candidate(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if looks_like_object(trimmed) {
        return Some(trimmed);
    }
    if let Some(fenced) = extract_fenced_json(text) {
        if looks_like_object(fenced) {
            return Some(fenced);
        }
    }
    extract_first_brace_block(text)
}

fn looks_like_object(s: &str) -> bool {
    s.starts_with('{') && s.ends_with('}')
}

fn extract_fenced_json(text: &str) -> Option<&str> {
    let start_marker = text.find("```json")?;
    let after_marker = start_marker + "```json".len();
    let rest = &text[after_marker..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Scans for the first `{` and returns the substring up to its matching
/// `}`, respecting string literals so braces inside quoted values don't
/// confuse the count.
fn extract_first_brace_block(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_raw_final_object() {
        let env = parse_envelope(r#"{"type":"final","output":1}"#).unwrap();
        assert_eq!(env, AgentEnvelope::Final { output: json!(1) });
    }

    #[test]
    fn accepts_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"type\":\"final\",\"output\":1}\n```\nthanks";
        let env = parse_envelope(text).unwrap();
        assert_eq!(env, AgentEnvelope::Final { output: json!(1) });
    }

    #[test]
    fn accepts_first_outer_brace_block_with_surrounding_prose() {
        let text = "sure, {\"type\":\"tool_call\",\"toolId\":\"shell.run\",\"input\":{\"command\":\"ls\"}} done";
        let env = parse_envelope(text).unwrap();
        assert_eq!(env, AgentEnvelope::ToolCall { tool_id: "shell.run".into(), input: json!({"command": "ls"}) });
    }

    #[test]
    fn rejects_arrays() {
        assert_eq!(parse_envelope("[1,2,3]").unwrap_err(), AgentError::InvalidAgentOutput);
    }

    #[test]
    fn rejects_missing_type() {
        assert_eq!(parse_envelope("{}").unwrap_err(), AgentError::InvalidAgentOutput);
    }

    #[test]
    fn rejects_tool_call_with_non_object_input() {
        let text = r#"{"type":"tool_call","toolId":"shell.run","input":"not an object"}"#;
        assert_eq!(parse_envelope(text).unwrap_err(), AgentError::InvalidAgentOutput);
    }
}
