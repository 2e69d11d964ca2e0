//! Parses an `agent.run` node's `config` blob into typed settings (spec
//! §4.5.1–§4.5.2). Every field has a sane default so a bare
//! `{"allowedTools":[...]}`  is enough to run.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;

use crate::skills::Toolset;

#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub timeout_ms: u64,
    pub max_turns: u32,
    pub max_tool_calls: u32,
    pub max_output_chars: usize,
    pub max_runtime_chars: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self { timeout_ms: 120_000, max_turns: 20, max_tool_calls: 50, max_output_chars: 50_000, max_runtime_chars: 200_000 }
    }
}

impl AgentLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn from_value(v: &Value) -> Self {
        let mut limits = Self::default();
        if let Some(n) = v.get("timeoutMs").and_then(Value::as_u64) {
            limits.timeout_ms = n;
        }
        if let Some(n) = v.get("maxTurns").and_then(Value::as_u64) {
            limits.max_turns = n as u32;
        }
        if let Some(n) = v.get("maxToolCalls").and_then(Value::as_u64) {
            limits.max_tool_calls = n as u32;
        }
        if let Some(n) = v.get("maxOutputChars").and_then(Value::as_u64) {
            limits.max_output_chars = n as usize;
        }
        if let Some(n) = v.get("maxRuntimeChars").and_then(Value::as_u64) {
            limits.max_runtime_chars = n as usize;
        }
        limits
    }
}

#[derive(Debug, Clone, Default)]
pub struct Teammate {
    pub teammate_id: String,
    pub system_prompt: Option<String>,
    pub instructions: Option<String>,
    pub allowed_tools: HashSet<String>,
    pub limits: Option<AgentLimits>,
    pub json_schema: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct TeamConfig {
    pub teammates: Vec<Teammate>,
    /// Operator-set ceiling on `team.map` fan-out, independent of the tool
    /// call's own `maxParallel` and the hard cap of 16.
    pub max_parallel: Option<usize>,
}

impl TeamConfig {
    pub fn find(&self, teammate_id: &str) -> Option<&Teammate> {
        self.teammates.iter().find(|t| t.teammate_id == teammate_id)
    }
}

#[derive(Debug, Clone)]
pub struct AgentNodeConfig {
    pub system_prompt: Option<String>,
    pub instructions: Option<String>,
    pub input_template: Option<String>,
    pub allowed_tools: HashSet<String>,
    pub limits: AgentLimits,
    pub json_schema: Option<Value>,
    pub toolset: Option<Toolset>,
    pub team: TeamConfig,
}

impl AgentNodeConfig {
    pub fn from_config(config: &Value) -> Self {
        let allowed_tools = config
            .get("allowedTools")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let limits = config.get("limits").map(AgentLimits::from_value).unwrap_or_default();
        let team = config
            .get("team")
            .map(|t| TeamConfig {
                teammates: t.get("teammates").and_then(Value::as_array).map(|arr| arr.iter().map(parse_teammate).collect()).unwrap_or_default(),
                max_parallel: t.get("maxParallel").and_then(Value::as_u64).map(|n| n as usize),
            })
            .unwrap_or_default();
        let toolset = config.get("toolset").and_then(Toolset::from_value);

        Self {
            system_prompt: config.get("systemPrompt").and_then(Value::as_str).map(str::to_string),
            instructions: config.get("instructions").and_then(Value::as_str).map(str::to_string),
            input_template: config.get("inputTemplate").and_then(Value::as_str).map(str::to_string),
            allowed_tools,
            limits,
            json_schema: config.get("jsonSchema").cloned(),
            toolset,
            team,
        }
    }
}

fn parse_teammate(v: &Value) -> Teammate {
    Teammate {
        teammate_id: v.get("teammateId").and_then(Value::as_str).unwrap_or_default().to_string(),
        system_prompt: v.get("systemPrompt").and_then(Value::as_str).map(str::to_string),
        instructions: v.get("instructions").and_then(Value::as_str).map(str::to_string),
        allowed_tools: v
            .get("allowedTools")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        limits: v.get("limits").map(AgentLimits::from_value),
        json_schema: v.get("jsonSchema").cloned(),
    }
}
