//! Built-in tool dispatch (spec §4.5.4). `shell.run` and `connector.action`
//! share the sandbox/registry contracts the standalone `nodes` executors
//! use; `skill.<id>` delegates to a locally registered [`Skill`]. Remote-mode
//! tools return [`NodeOutcome::Blocked`] and the outer stepper/gateway block
//! path takes over, same as any other blocked node.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use nodes::connector::ConnectorRegistry;
use nodes::result::BlockRequest;
use nodes::shell_run::{ShellCommand, ShellSandbox};
use nodes::{ExecutionContext, NodeOutcome};

use crate::error::AgentError;

/// A locally registered skill invoked via `skill.<skillId>` (spec §4.5.4).
/// Distinct from the read-only "Toolset Skills" context block (§4.5.6):
/// this is an executable action, not prompt context.
#[async_trait]
pub trait Skill: Send + Sync {
    fn id(&self) -> &str;
    async fn execute(&self, input: Value, secrets: &HashMap<String, String>) -> Result<Value, String>;
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        self.skills.insert(skill.id().to_string(), skill);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(id).cloned()
    }
}

/// The sandboxes and registries the built-in tools execute against.
/// Constructed once per worker and shared across agent node invocations.
pub struct ToolDeps {
    pub shell_sandbox: Arc<dyn ShellSandbox>,
    pub connectors: Arc<ConnectorRegistry>,
    pub skills: Arc<SkillRegistry>,
}

/// Rewrites `connector.<connectorId>.<actionId>` into the canonical
/// `connector.action` tool call (spec §4.5.3 step 9). Any other shape
/// (including bare `connector.action`) passes through unchanged.
pub fn rewrite_connector_alias(tool_id: &str, input: Value) -> (String, Value) {
    let Some(rest) = tool_id.strip_prefix("connector.") else { return (tool_id.to_string(), input) };
    if rest == "action" {
        return (tool_id.to_string(), input);
    }
    let Some((connector_id, action_id)) = rest.split_once('.') else { return (tool_id.to_string(), input) };

    let mut merged = input.as_object().cloned().unwrap_or_default();
    merged.insert("connectorId".into(), json!(connector_id));
    merged.insert("actionId".into(), json!(action_id));
    ("connector.action".to_string(), Value::Object(merged))
}

/// Step 11's policy gate denies by *failing the tool call*, not the node:
/// the model gets `TOOL_POLICY_DENIED:shell.run` back as a tool result and
/// can try something else, the same as any other tool failure.
pub async fn dispatch_shell_run(input: &Value, ctx: &ExecutionContext, sandbox: &dyn ShellSandbox) -> Result<NodeOutcome, AgentError> {
    let enabled = ctx.organization_settings.get("tools").and_then(|t| t.get("shellRunEnabled")).and_then(Value::as_bool).unwrap_or(false);
    if !enabled {
        return Ok(NodeOutcome::failed(AgentError::ToolPolicyDenied("shell.run".into()).code()));
    }

    let command = input.get("command").and_then(Value::as_str).ok_or(AgentError::InvalidToolInput)?.to_string();
    let args = input
        .get("args")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    let cwd = input.get("cwd").and_then(Value::as_str).map(str::to_owned);
    let env = input
        .get("env")
        .and_then(Value::as_object)
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string()))).collect())
        .unwrap_or_default();
    let timeout_ms = input.get("timeoutMs").and_then(Value::as_u64).unwrap_or(30_000);

    match sandbox.run(ShellCommand { command, args, cwd, env, timeout_ms }).await {
        Ok(out) if out.exit_code == 0 => Ok(NodeOutcome::succeeded(json!({"exitCode": out.exit_code, "stdout": out.stdout, "stderr": out.stderr}))),
        Ok(out) => Ok(NodeOutcome::Failed {
            error: format!("command exited with status {}", out.exit_code),
            output: Some(json!({"exitCode": out.exit_code, "stdout": out.stdout, "stderr": out.stderr})),
            runtime: None,
        }),
        Err(e) => Ok(NodeOutcome::failed(e)),
    }
}

/// `connector.action` input shape: `{connectorId, actionId, input, auth?}`.
/// `auth.secretId` coming from the model is rejected outright — secrets are
/// resolved by the worker from the organization's connector-secret map,
/// never chosen by the LLM.
pub async fn dispatch_connector_action(
    input: &Value,
    ctx: &ExecutionContext,
    registry: &ConnectorRegistry,
    call_index: u32,
) -> Result<NodeOutcome, AgentError> {
    if input.get("auth").and_then(|a| a.get("secretId")).is_some() {
        return Err(AgentError::ToolSecretIdNotAllowed);
    }

    let connector_id = input.get("connectorId").and_then(Value::as_str).ok_or(AgentError::InvalidToolInput)?;
    let action_id = input.get("actionId").and_then(Value::as_str).ok_or(AgentError::InvalidToolInput)?;
    let action_key = format!("{connector_id}.{action_id}");
    let action_input = input.get("input").cloned().unwrap_or_else(|| json!({}));

    let Some(action) = registry.get(&action_key) else {
        return Ok(NodeOutcome::Blocked {
            block: BlockRequest {
                kind: "connector.action".into(),
                payload: json!({"actionId": action_key, "input": action_input}),
                dispatch_node_id: Some(format!("{}:tool:{}", ctx.node_id, call_index)),
                selector: None,
                secret: None,
                timeout_ms: None,
            },
            runtime: json!({}),
        });
    };

    if let Some(schema) = action.input_schema() {
        crate::schema::validate(&schema, &action_input).map_err(|_| AgentError::InvalidToolInput)?;
    }

    match action.invoke(&json!({}), &action_input, &ctx.secrets).await {
        Ok(output) => Ok(NodeOutcome::succeeded(output)),
        Err(nodes::NodeError::Fatal(message)) | Err(nodes::NodeError::Retryable(message)) => Ok(NodeOutcome::failed(message)),
    }
}

pub async fn dispatch_skill(skill_id: &str, input: &Value, registry: &SkillRegistry, secrets: &HashMap<String, String>) -> Result<NodeOutcome, AgentError> {
    let skill = registry.get(skill_id).ok_or_else(|| AgentError::SkillNotFound(skill_id.to_string()))?;
    match skill.execute(input.clone(), secrets).await {
        Ok(output) => Ok(NodeOutcome::succeeded(output)),
        Err(error) => Ok(NodeOutcome::failed(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_rewrites_connector_dotted_tool_id() {
        let (tool_id, input) = rewrite_connector_alias("connector.github.createIssue", json!({"title": "bug"}));
        assert_eq!(tool_id, "connector.action");
        assert_eq!(input["connectorId"], json!("github"));
        assert_eq!(input["actionId"], json!("createIssue"));
        assert_eq!(input["title"], json!("bug"));
    }

    #[test]
    fn alias_passes_through_plain_connector_action() {
        let (tool_id, input) = rewrite_connector_alias("connector.action", json!({"connectorId": "github"}));
        assert_eq!(tool_id, "connector.action");
        assert_eq!(input["connectorId"], json!("github"));
    }
}
