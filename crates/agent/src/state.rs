//! Per-node agent loop state (spec §4.5.1). Persisted at
//! `runtime.agentRuns[nodeId]` and replayed verbatim into the LLM message
//! array on resume.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    ToolCall { call_index: u32, tool_id: String, input: Value },
    ToolResult { call_index: u32, tool_id: String, output: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingToolCall {
    pub tool_id: String,
    pub input: Value,
    pub call_index: u32,
    pub dispatch_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentRunState {
    pub turns: u32,
    pub tool_calls: u32,
    pub history: Vec<HistoryEntry>,
    pub tool_results_by_call_index: HashMap<u32, Value>,
    pub pending_tool_call: Option<PendingToolCall>,
    /// The loop's wall-clock deadline, fixed on the first turn and carried
    /// across every block/resume so a node that blocks repeatedly can't
    /// extend its own total budget by resuming (spec §4.5.3).
    pub deadline_epoch_ms: Option<i64>,
}

impl AgentRunState {
    /// Reads this node's slice of `runtime.agentRuns`, defaulting to a
    /// fresh state on first invocation.
    pub fn load(runtime: &Value, node_id: &str) -> Self {
        runtime
            .get("agentRuns")
            .and_then(|m| m.get(node_id))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Rebuilds the full `agentRuns` map with this node's entry set (or
    /// removed, for a final outcome), preserving every other node's entry
    /// already present in `runtime`. Returned as a single-key object
    /// suitable for the engine's shallow top-level runtime merge.
    pub fn into_runtime_patch(self, runtime: &Value, node_id: &str, remove: bool) -> Value {
        let mut agent_runs = runtime.get("agentRuns").and_then(Value::as_object).cloned().unwrap_or_default();
        if remove {
            agent_runs.remove(node_id);
        } else {
            agent_runs.insert(node_id.to_string(), serde_json::to_value(self).unwrap_or(Value::Null));
        }
        serde_json::json!({ "agentRuns": Value::Object(agent_runs) })
    }

    /// Drops oldest history entries (and their matching tool-result cache
    /// entries) until the serialized history is back under `max_chars`.
    /// Returns whether anything was trimmed, so the caller can emit
    /// `agent_runtime_trimmed` once.
    pub fn trim_to(&mut self, max_chars: usize) -> bool {
        let mut trimmed = false;
        while self.history.len() > 1 {
            let size = serde_json::to_string(&self.history).map(|s| s.len()).unwrap_or(0);
            if size <= max_chars {
                break;
            }
            let removed = self.history.remove(0);
            if let HistoryEntry::ToolCall { call_index, .. } = removed {
                self.tool_results_by_call_index.remove(&call_index);
            }
            trimmed = true;
        }
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_defaults_when_absent() {
        let state = AgentRunState::load(&json!({}), "n1");
        assert_eq!(state.turns, 0);
    }

    #[test]
    fn round_trips_through_runtime_patch() {
        let mut state = AgentRunState::default();
        state.turns = 2;
        let runtime = json!({"agentRuns": {"other": {"turns": 9}}});
        let patch = state.into_runtime_patch(&runtime, "n1", false);
        assert_eq!(patch["agentRuns"]["other"]["turns"], json!(9));
        assert_eq!(patch["agentRuns"]["n1"]["turns"], json!(2));
    }

    #[test]
    fn remove_clears_only_this_node() {
        let runtime = json!({"agentRuns": {"n1": {"turns": 1}, "other": {"turns": 9}}});
        let patch = AgentRunState::default().into_runtime_patch(&runtime, "n1", true);
        assert!(patch["agentRuns"].get("n1").is_none());
        assert_eq!(patch["agentRuns"]["other"]["turns"], json!(9));
    }

    #[test]
    fn trim_drops_oldest_entries_and_their_results() {
        let mut state = AgentRunState::default();
        for i in 0..5 {
            state.history.push(HistoryEntry::ToolCall { call_index: i, tool_id: "t".into(), input: json!({"pad": "x".repeat(50)}) });
            state.tool_results_by_call_index.insert(i, json!("result"));
        }
        let trimmed = state.trim_to(80);
        assert!(trimmed);
        assert!(state.history.len() < 5);
        for entry in &state.history {
            if let HistoryEntry::ToolCall { call_index, .. } = entry {
                assert!(state.tool_results_by_call_index.contains_key(call_index));
            }
        }
    }
}
