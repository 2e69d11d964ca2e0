//! The agent turn loop (spec §4.5.3): builds the message array, drives the
//! LLM provider one turn at a time, parses the envelope it returns, and
//! either dispatches a tool call or finalizes. Resumable: a blocked tool
//! dispatch persists `pending_tool_call` and returns [`NodeOutcome::Blocked`];
//! the next invocation resumes from `ctx.pending_remote_result`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};

use nodes::{ExecutionContext, NodeOutcome};

use crate::config::{AgentNodeConfig, TeamConfig, Teammate};
use crate::envelope::{self, AgentEnvelope};
use crate::error::AgentError;
use crate::provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider};
use crate::schema;
use crate::skills::ToolsetSkillsConfig;
use crate::state::{AgentRunState, HistoryEntry, PendingToolCall};
use crate::summarize::{self, TOOL_SUMMARY_MAX_CHARS};
use crate::tools::{self, ToolDeps};

/// A fixed preamble every agent.run system prompt carries ahead of the
/// operator's own instructions, establishing the envelope contract.
const FIXED_PREAMBLE: &str =
    "You are an autonomous workflow agent running inside a durable step \
     executor. Every turn you must respond with exactly one JSON object \
     and nothing else of consequence outside it.";

/// The provider and built-in tool backends an `agent.run` node executes
/// against. Constructed once per worker and shared across invocations.
pub struct LoopDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolDeps>,
}

/// The run-scoped values a turn's user message is built from. Defaults to
/// the node's own `ctx.run_input`/`ctx.steps`; `team.delegate` substitutes a
/// child view when it recurses.
struct LoopInput {
    run_input: Value,
    steps: Value,
}

/// Drives `cfg`'s agent loop to a terminal [`NodeOutcome`] starting from
/// `state` (loaded from `ctx.runtime.agentRuns[ctx.node_id]`, or fresh on
/// first invocation).
pub async fn run_agent_loop(cfg: &AgentNodeConfig, ctx: &ExecutionContext, state: AgentRunState, deps: &LoopDeps) -> Result<NodeOutcome, AgentError> {
    let loop_input = LoopInput { run_input: ctx.run_input.clone(), steps: ctx.steps.clone() };
    run_agent_loop_inner(cfg, ctx, loop_input, state, deps).await
}

fn run_agent_loop_inner<'a>(
    cfg: &'a AgentNodeConfig,
    ctx: &'a ExecutionContext,
    loop_input: LoopInput,
    mut state: AgentRunState,
    deps: &'a LoopDeps,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<NodeOutcome, AgentError>> + Send + 'a>> {
    Box::pin(async move {
        // Fixed once on the first turn and persisted as an epoch-ms field so
        // it survives a block/resume round trip through the queue — an
        // `Instant` has no meaning once this invocation returns. `ctx.deadline`
        // is the engine's reconstruction of that persisted value; it's only
        // absent on a node's very first invocation.
        let deadline_epoch_ms = state
            .deadline_epoch_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() + cfg.limits.timeout_ms as i64);
        state.deadline_epoch_ms = Some(deadline_epoch_ms);
        let deadline = ctx.deadline.unwrap_or_else(|| {
            let remaining_ms = (deadline_epoch_ms - chrono::Utc::now().timestamp_millis()).max(0) as u64;
            Instant::now() + Duration::from_millis(remaining_ms)
        });

        // Resume: a previously blocked tool dispatch now has a staged result.
        if let Some(pending) = state.pending_tool_call.take() {
            let result = ctx.pending_remote_result.clone().unwrap_or(Value::Null);
            let summarized = summarize::summarize(&result, TOOL_SUMMARY_MAX_CHARS);
            state.tool_results_by_call_index.insert(pending.call_index, summarized.clone());
            state
                .history
                .push(HistoryEntry::ToolResult { call_index: pending.call_index, tool_id: pending.tool_id.clone(), output: summarized });
            checkpoint_state(ctx, &state).await;
            if state.trim_to(cfg.limits.max_runtime_chars) {
                ctx.emit.emit("agent_runtime_trimmed", Some(&ctx.node_id), "info", None, None);
            }
        }

        loop {
            if Instant::now() >= deadline {
                return Ok(terminal_failure(ctx, state, AgentError::LlmTimeout));
            }
            if state.turns >= cfg.limits.max_turns {
                return Ok(terminal_failure(ctx, state, AgentError::MaxTurns));
            }
            if state.tool_calls > cfg.limits.max_tool_calls {
                return Ok(terminal_failure(ctx, state, AgentError::MaxToolCalls));
            }

            state.turns += 1;
            ctx.emit.emit("agent_turn_started", Some(&ctx.node_id), "info", None, Some(json!({"turn": state.turns})));

            let (system_text, skills_applied) = build_system_message(cfg);
            if let Some(count) = skills_applied {
                let toolset_id = cfg.toolset.as_ref().map(|t| t.id.clone()).unwrap_or_default();
                ctx.emit.emit("toolset_skills_applied", Some(&ctx.node_id), "info", None, Some(json!({"toolsetId": toolset_id, "count": count})));
            }
            let messages = build_messages(cfg, &loop_input, &state, system_text);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let request = ChatRequest { messages, remaining, max_output_chars: cfg.limits.max_output_chars };

            let response = match deps.provider.chat(request, &ctx.emit).await {
                Ok(r) => r,
                Err(e) => return Ok(terminal_failure(ctx, state, e)),
            };
            let content = summarize::truncate_str(&response.content, cfg.limits.max_output_chars);

            let envelope = match envelope::parse_envelope(&content) {
                Ok(e) => e,
                Err(e) => return Ok(terminal_failure(ctx, state, e)),
            };

            match envelope {
                AgentEnvelope::Final { output } => {
                    let final_output = match finalize_output(cfg, output, &response, &state) {
                        Ok(v) => v,
                        Err(e) => return Ok(terminal_failure(ctx, state, e)),
                    };
                    ctx.emit.emit(
                        "agent_final",
                        Some(&ctx.node_id),
                        "info",
                        None,
                        Some(summarize::summarize(&final_output, summarize::ASSISTANT_EVENT_MAX_CHARS)),
                    );
                    let runtime = state.into_runtime_patch(&ctx.runtime, &ctx.node_id, true);
                    return Ok(NodeOutcome::Succeeded { output: final_output, runtime: Some(runtime) });
                }
                AgentEnvelope::ToolCall { tool_id, input } => {
                    if !cfg.allowed_tools.contains(&tool_id) {
                        return Ok(terminal_failure(ctx, state, AgentError::ToolNotAllowed(tool_id)));
                    }
                    if !input.is_object() {
                        return Ok(terminal_failure(ctx, state, AgentError::InvalidToolInput));
                    }
                    let (effective_tool_id, effective_input) = tools::rewrite_connector_alias(&tool_id, input);

                    state.tool_calls += 1;
                    let call_index = state.tool_calls;
                    ctx.emit.emit("agent_tool_call", Some(&ctx.node_id), "info", None, Some(json!({"callIndex": call_index, "toolId": effective_tool_id})));
                    state.history.push(HistoryEntry::ToolCall { call_index, tool_id: effective_tool_id.clone(), input: effective_input.clone() });
                    checkpoint_state(ctx, &state).await;

                    if let Some(cached) = state.tool_results_by_call_index.get(&call_index).cloned() {
                        state.history.push(HistoryEntry::ToolResult { call_index, tool_id: effective_tool_id.clone(), output: cached });
                        checkpoint_state(ctx, &state).await;
                        continue;
                    }

                    match dispatch_tool(&effective_tool_id, &effective_input, cfg, ctx, call_index, deps).await {
                        Ok(NodeOutcome::Blocked { block, .. }) => {
                            state.pending_tool_call = Some(PendingToolCall {
                                tool_id: effective_tool_id,
                                input: effective_input,
                                call_index,
                                dispatch_node_id: block.dispatch_node_id.clone(),
                            });
                            checkpoint_state(ctx, &state).await;
                            let runtime = state.into_runtime_patch(&ctx.runtime, &ctx.node_id, false);
                            return Ok(NodeOutcome::Blocked { block, runtime });
                        }
                        Ok(NodeOutcome::Succeeded { output, .. }) => {
                            let summarized = summarize::summarize(&output, TOOL_SUMMARY_MAX_CHARS);
                            state.tool_results_by_call_index.insert(call_index, summarized.clone());
                            state.history.push(HistoryEntry::ToolResult { call_index, tool_id: effective_tool_id, output: summarized });
                            checkpoint_state(ctx, &state).await;
                        }
                        Ok(NodeOutcome::Failed { error, output, .. }) => {
                            let payload = output.unwrap_or_else(|| json!({"error": error}));
                            let summarized = summarize::summarize(&payload, TOOL_SUMMARY_MAX_CHARS);
                            state.tool_results_by_call_index.insert(call_index, summarized.clone());
                            state.history.push(HistoryEntry::ToolResult { call_index, tool_id: effective_tool_id, output: summarized });
                            checkpoint_state(ctx, &state).await;
                        }
                        Err(e) => return Ok(terminal_failure(ctx, state, e)),
                    }

                    if state.trim_to(cfg.limits.max_runtime_chars) {
                        ctx.emit.emit("agent_runtime_trimmed", Some(&ctx.node_id), "info", None, None);
                    }
                }
            }
        }
    })
}

fn terminal_failure(ctx: &ExecutionContext, state: AgentRunState, err: AgentError) -> NodeOutcome {
    let runtime = state.into_runtime_patch(&ctx.runtime, &ctx.node_id, true);
    NodeOutcome::Failed { error: err.code(), output: None, runtime: Some(runtime) }
}

async fn checkpoint_state(ctx: &ExecutionContext, state: &AgentRunState) {
    let value = serde_json::to_value(state).unwrap_or(Value::Null);
    let _ = ctx.checkpoint.checkpoint(&ctx.node_id, value).await;
}

/// Step 8's JSON-encodability check is a no-op over `serde_json::Value` —
/// every value already is one. Schema validation and the `_meta` envelope
/// still apply.
fn finalize_output(cfg: &AgentNodeConfig, output: Value, response: &ChatResponse, state: &AgentRunState) -> Result<Value, AgentError> {
    if let Some(schema) = &cfg.json_schema {
        schema::validate(schema, &output)?;
    }
    let meta = json!({
        "provider": response.provider,
        "model": response.model,
        "turns": state.turns,
        "toolCalls": state.tool_calls,
    });
    Ok(match output {
        Value::Object(mut map) => {
            map.insert("_meta".to_string(), meta);
            Value::Object(map)
        }
        other => json!({"output": other, "_meta": meta}),
    })
}

fn envelope_contract() -> &'static str {
    "Envelope contract: respond with exactly one JSON object, either \
     {\"type\":\"final\",\"output\":<any>} to finish the run, or \
     {\"type\":\"tool_call\",\"toolId\":\"<id>\",\"input\":{...}} to invoke a tool. \
     The object may be wrapped in prose or a ```json fenced block, but only \
     one such object is read; arrays and objects missing \"type\" are rejected."
}

/// Builds the system message: operator prompt + fixed preamble + envelope
/// contract + allowed-tool set + optional Toolset Skills block (spec
/// §4.5.2). Returns the bundle count if a Toolset Skills block was applied,
/// so the caller can emit `toolset_skills_applied` exactly once.
fn build_system_message(cfg: &AgentNodeConfig) -> (String, Option<usize>) {
    let mut parts = Vec::new();
    if let Some(prompt) = &cfg.system_prompt {
        parts.push(prompt.clone());
    }
    parts.push(FIXED_PREAMBLE.to_string());
    parts.push(envelope_contract().to_string());

    let mut allowed: Vec<&str> = cfg.allowed_tools.iter().map(String::as_str).collect();
    allowed.sort_unstable();
    parts.push(format!("Allowed tools: {}", serde_json::to_string(&allowed).unwrap_or_default()));

    let mut applied = None;
    if let Some(toolset) = &cfg.toolset {
        if let Some((block, count)) = crate::skills::build_context_block(toolset, &ToolsetSkillsConfig::default()) {
            parts.push(block);
            applied = Some(count);
        }
    }

    (parts.join("\n\n"), applied)
}

/// Builds the user message: `JSON({instructions, runInput, steps}, indent=2)`
/// plus an optional rendered input template (spec §4.5.2).
fn build_user_message(cfg: &AgentNodeConfig, loop_input: &LoopInput) -> String {
    let body = json!({
        "instructions": cfg.instructions,
        "runInput": loop_input.run_input,
        "steps": loop_input.steps,
    });
    let mut text = serde_json::to_string_pretty(&body).unwrap_or_default();
    if let Some(template) = &cfg.input_template {
        text.push_str("\n\n");
        text.push_str(&render_template(template, &loop_input.run_input));
    }
    text
}

/// Substitutes `{{var}}` with `vars[var]` JSON-stringified. Variables
/// resolve against the run's trigger input, the template's natural source
/// of values.
fn render_template(template: &str, vars: &Value) -> String {
    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                let value = vars.get(key).cloned().unwrap_or(Value::Null);
                out.push_str(&serde_json::to_string(&value).unwrap_or_default());
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Rebuilds the full message array for this turn: system + initial user
/// message + history replayed verbatim as alternating assistant/user
/// messages (spec §4.5.1 — history "replays verbatim into the LLM message
/// array on resume").
fn build_messages(cfg: &AgentNodeConfig, loop_input: &LoopInput, state: &AgentRunState, system_text: String) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_text), ChatMessage::user(build_user_message(cfg, loop_input))];
    for entry in &state.history {
        match entry {
            HistoryEntry::ToolCall { tool_id, input, .. } => {
                messages.push(ChatMessage::assistant(serde_json::to_string(&json!({"type": "tool_call", "toolId": tool_id, "input": input})).unwrap_or_default()));
            }
            HistoryEntry::ToolResult { call_index, tool_id, output } => {
                messages.push(ChatMessage::user(
                    serde_json::to_string(&json!({"type": "tool_result", "callIndex": call_index, "toolId": tool_id, "output": output})).unwrap_or_default(),
                ));
            }
        }
    }
    messages
}

async fn dispatch_tool(tool_id: &str, input: &Value, cfg: &AgentNodeConfig, ctx: &ExecutionContext, call_index: u32, deps: &LoopDeps) -> Result<NodeOutcome, AgentError> {
    match tool_id {
        "shell.run" => tools::dispatch_shell_run(input, ctx, deps.tools.shell_sandbox.as_ref()).await,
        "connector.action" => tools::dispatch_connector_action(input, ctx, deps.tools.connectors.as_ref(), call_index).await,
        "team.delegate" => {
            if cfg.team.teammates.is_empty() {
                return Err(AgentError::TeamNotConfigured);
            }
            let teammate_id = input.get("teammateId").and_then(Value::as_str).unwrap_or_default();
            let task = input.get("task").and_then(Value::as_str).unwrap_or_default();
            team_delegate(cfg, ctx, teammate_id, task, input.get("input").cloned(), deps).await.map(NodeOutcome::succeeded)
        }
        "team.map" => {
            if cfg.team.teammates.is_empty() {
                return Err(AgentError::TeamNotConfigured);
            }
            team_map(cfg, ctx, input, deps).await.map(NodeOutcome::succeeded)
        }
        other if other.starts_with("skill.") => tools::dispatch_skill(&other["skill.".len()..], input, deps.tools.skills.as_ref(), &ctx.secrets).await,
        other => Err(AgentError::ToolNotSupported(other.to_string())),
    }
}

/// Recursively invokes this same loop with a teammate's own prompt, tool
/// allowlist intersected with the parent's, and its own limits (spec
/// §4.5.4). A child loop that would itself block on a remote dispatch has
/// no way to surface that block through the parent's single dispatch slot,
/// so it surfaces as `TEAM_DELEGATE_FAILED` instead — delegation is scoped
/// to teammates whose work completes in-process.
async fn team_delegate(parent_cfg: &AgentNodeConfig, ctx: &ExecutionContext, teammate_id: &str, task: &str, extra_input: Option<Value>, deps: &LoopDeps) -> Result<Value, AgentError> {
    let teammate = parent_cfg.team.find(teammate_id).ok_or_else(|| AgentError::TeammateNotFound(teammate_id.to_string()))?.clone();
    let child_cfg = child_agent_config(parent_cfg, &teammate);
    let loop_input = LoopInput {
        run_input: json!({"parentRunInput": ctx.run_input, "task": task, "input": extra_input}),
        steps: ctx.steps.clone(),
    };

    match run_agent_loop_inner(&child_cfg, ctx, loop_input, AgentRunState::default(), deps).await {
        Ok(NodeOutcome::Succeeded { output, .. }) => Ok(output),
        Ok(NodeOutcome::Failed { error, .. }) => match error.strip_prefix("TOOL_NOT_ALLOWED:") {
            Some(rest) => Err(AgentError::TeamToolPolicyDenied(rest.to_string())),
            None => Err(AgentError::TeamDelegateFailed),
        },
        Ok(NodeOutcome::Blocked { .. }) | Err(_) => Err(AgentError::TeamDelegateFailed),
    }
}

fn child_agent_config(parent_cfg: &AgentNodeConfig, teammate: &Teammate) -> AgentNodeConfig {
    let mut allowed: HashSet<String> = parent_cfg.allowed_tools.intersection(&teammate.allowed_tools).cloned().collect();
    allowed.remove("team.delegate");
    allowed.remove("team.map");

    AgentNodeConfig {
        system_prompt: teammate.system_prompt.clone(),
        instructions: teammate.instructions.clone(),
        input_template: None,
        allowed_tools: allowed,
        limits: teammate.limits.clone().unwrap_or_else(|| parent_cfg.limits.clone()),
        json_schema: teammate.json_schema.clone(),
        toolset: None,
        team: TeamConfig::default(),
    }
}

/// Fans `team.map`'s tasks out to `team.delegate` with bounded concurrency,
/// preserving input order in the result array (spec §4.5.4).
async fn team_map(cfg: &AgentNodeConfig, ctx: &ExecutionContext, input: &Value, deps: &LoopDeps) -> Result<Value, AgentError> {
    let tasks = input.get("tasks").and_then(Value::as_array).cloned().unwrap_or_default();
    let requested = input.get("maxParallel").and_then(Value::as_u64).map(|n| n as usize).unwrap_or(tasks.len());
    let max_parallel = [requested, cfg.team.max_parallel.unwrap_or(16), 16].into_iter().min().unwrap_or(1).max(1);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_parallel));

    let futures_iter = tasks.iter().map(|task_spec| {
        let sem = semaphore.clone();
        async move {
            let _permit = sem.acquire().await.expect("semaphore never closed");
            let teammate_id = task_spec.get("teammateId").and_then(Value::as_str).unwrap_or_default().to_string();
            let task = task_spec.get("task").and_then(Value::as_str).unwrap_or_default().to_string();
            let extra_input = task_spec.get("input").cloned();
            match team_delegate(cfg, ctx, &teammate_id, &task, extra_input, deps).await {
                Ok(output) => json!({"status": "succeeded", "teammateId": teammate_id, "output": output}),
                Err(e) => json!({"status": "failed", "teammateId": teammate_id, "error": e.code()}),
            }
        }
    });

    Ok(Value::Array(join_all(futures_iter).await))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use nodes::connector::ConnectorRegistry;
    use nodes::shell_run::LocalShellSandbox;
    use nodes::traits::{NullCheckpointer, NullEmitter};

    use crate::tools::{SkillRegistry, ToolDeps};

    use super::*;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Self {
            Self { responses: Mutex::new(responses.into_iter().map(String::from).collect()) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_name(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn chat(&self, _request: ChatRequest, _emit: &Arc<dyn nodes::EventEmitter>) -> Result<ChatResponse, AgentError> {
            let content = self.responses.lock().unwrap().pop_front().expect("scripted provider exhausted");
            Ok(ChatResponse { content, provider: "test".into(), model: "test-model".into() })
        }
    }

    /// Fails the test outright if invoked — used to assert the loop returns
    /// before ever reaching the provider (e.g. an already-exhausted limit).
    struct PanicProvider;

    #[async_trait]
    impl LlmProvider for PanicProvider {
        fn provider_name(&self) -> &str {
            "panic"
        }

        fn model(&self) -> &str {
            "panic"
        }

        async fn chat(&self, _request: ChatRequest, _emit: &Arc<dyn nodes::EventEmitter>) -> Result<ChatResponse, AgentError> {
            panic!("provider should not have been called");
        }
    }

    fn test_ctx(config: Value, organization_settings: Value) -> ExecutionContext {
        ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "agent1".into(),
            node_type: "agent.run".into(),
            attempt_count: 1,
            config,
            run_input: json!({"topic": "widgets"}),
            steps: json!({}),
            runtime: json!({}),
            pending_remote_result: None,
            secrets: Default::default(),
            organization_settings,
            emit: Arc::new(NullEmitter),
            checkpoint: Arc::new(NullCheckpointer),
            deadline: None,
        }
    }

    fn test_tool_deps() -> Arc<ToolDeps> {
        Arc::new(ToolDeps { shell_sandbox: Arc::new(LocalShellSandbox), connectors: Arc::new(ConnectorRegistry::new()), skills: Arc::new(SkillRegistry::new()) })
    }

    #[tokio::test]
    async fn final_output_on_first_turn_succeeds() {
        let cfg = AgentNodeConfig::from_config(&json!({"allowedTools": []}));
        let ctx = test_ctx(json!({}), json!({}));
        let deps = LoopDeps { provider: Arc::new(ScriptedProvider::new(vec![r#"{"type":"final","output":{"answer":42}}"#])), tools: test_tool_deps() };

        let outcome = run_agent_loop(&cfg, &ctx, AgentRunState::default(), &deps).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, runtime } => {
                assert_eq!(output["answer"], json!(42));
                assert_eq!(output["_meta"]["turns"], json!(1));
                assert!(runtime.unwrap()["agentRuns"].get("agent1").is_none());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_then_final_completes_in_two_turns() {
        let cfg = AgentNodeConfig::from_config(&json!({"allowedTools": ["shell.run"]}));
        let ctx = test_ctx(json!({}), json!({"tools": {"shellRunEnabled": true}}));
        let responses = vec![
            r#"{"type":"tool_call","toolId":"shell.run","input":{"command":"echo","args":["hi"]}}"#,
            r#"{"type":"final","output":{"done":true}}"#,
        ];
        let deps = LoopDeps { provider: Arc::new(ScriptedProvider::new(responses)), tools: test_tool_deps() };

        let outcome = run_agent_loop(&cfg, &ctx, AgentRunState::default(), &deps).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => {
                assert_eq!(output["done"], json!(true));
                assert_eq!(output["_meta"]["turns"], json!(2));
                assert_eq!(output["_meta"]["toolCalls"], json!(1));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disallowed_tool_fails_the_node() {
        let cfg = AgentNodeConfig::from_config(&json!({"allowedTools": []}));
        let ctx = test_ctx(json!({}), json!({}));
        let deps = LoopDeps { provider: Arc::new(ScriptedProvider::new(vec![r#"{"type":"tool_call","toolId":"shell.run","input":{}}"#])), tools: test_tool_deps() };

        let outcome = run_agent_loop(&cfg, &ctx, AgentRunState::default(), &deps).await.unwrap();
        match outcome {
            NodeOutcome::Failed { error, .. } => assert_eq!(error, "TOOL_NOT_ALLOWED:shell.run"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_turns_fails_without_ever_calling_the_provider() {
        let cfg = AgentNodeConfig::from_config(&json!({"allowedTools": [], "limits": {"maxTurns": 0}}));
        let ctx = test_ctx(json!({}), json!({}));
        let deps = LoopDeps { provider: Arc::new(PanicProvider), tools: test_tool_deps() };

        let outcome = run_agent_loop(&cfg, &ctx, AgentRunState::default(), &deps).await.unwrap();
        match outcome {
            NodeOutcome::Failed { error, .. } => assert_eq!(error, "AGENT_MAX_TURNS"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocked_connector_dispatch_resumes_after_remote_result() {
        let cfg = AgentNodeConfig::from_config(&json!({"allowedTools": ["connector.action"]}));
        let ctx = test_ctx(json!({}), json!({}));
        let deps = LoopDeps {
            provider: Arc::new(ScriptedProvider::new(vec![
                r#"{"type":"tool_call","toolId":"connector.action","input":{"connectorId":"slack","actionId":"postMessage","input":{"text":"hi"}}}"#,
            ])),
            tools: test_tool_deps(),
        };

        let outcome = run_agent_loop(&cfg, &ctx, AgentRunState::default(), &deps).await.unwrap();
        let (block, runtime) = match outcome {
            NodeOutcome::Blocked { block, runtime } => (block, runtime),
            other => panic!("expected blocked outcome, got {other:?}"),
        };
        assert_eq!(block.dispatch_node_id.as_deref(), Some("agent1:tool:1"));

        let mut resumed_ctx = test_ctx(json!({}), json!({}));
        resumed_ctx.runtime = runtime;
        resumed_ctx.pending_remote_result = Some(json!({"ok": true}));
        let resumed_state = AgentRunState::load(&resumed_ctx.runtime, &resumed_ctx.node_id);
        assert!(resumed_state.pending_tool_call.is_some());

        let resumed_deps =
            LoopDeps { provider: Arc::new(ScriptedProvider::new(vec![r#"{"type":"final","output":{"posted":true}}"#])), tools: test_tool_deps() };
        let final_outcome = run_agent_loop(&cfg, &resumed_ctx, resumed_state, &resumed_deps).await.unwrap();
        match final_outcome {
            NodeOutcome::Succeeded { output, .. } => assert_eq!(output["posted"], json!(true)),
            other => panic!("expected success after resume, got {other:?}"),
        }
    }
}
