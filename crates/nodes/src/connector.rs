//! `connector.action` node — invokes a named third-party action, either
//! in-process (secrets never leave the worker) or dispatched to a remote
//! executor via the gateway, per `config.execution.mode`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::result::BlockRequest;
use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome};

/// A single connector action, e.g. `slack.postMessage` or `github.createIssue`.
#[async_trait]
pub trait ConnectorAction: Send + Sync {
    /// Stable identifier, e.g. `"slack.postMessage"`.
    fn id(&self) -> &str;

    /// JSON Schema the action's own `input` must satisfy, if it publishes
    /// one. Callers that validate input before invoking (e.g. the agent
    /// loop's `connector.action` tool) skip validation when `None`.
    fn input_schema(&self) -> Option<Value> {
        None
    }

    async fn invoke(
        &self,
        config: &Value,
        input: &Value,
        secrets: &HashMap<String, String>,
    ) -> Result<Value, NodeError>;
}

/// Maps connector action ids to implementations. Plugins register into this
/// at startup the same way node types register into `nodes::NodeRegistry`.
#[derive(Default)]
pub struct ConnectorRegistry {
    actions: HashMap<String, Arc<dyn ConnectorAction>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn ConnectorAction>) {
        self.actions.insert(action.id().to_string(), action);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ConnectorAction>> {
        self.actions.get(id).cloned()
    }
}

/// Built-in `connector.action` node.
///
/// `config` shape:
/// ```json
/// { "actionId": "slack.postMessage", "params": {...}, "secret": "slack-bot-token",
///   "execution": { "mode": "inline" | "node", "selector": {...} } }
/// ```
/// `mode: "inline"` resolves `ctx.secrets` and calls the registry directly —
/// the secret value never leaves this process. `mode: "node"` (the default
/// for actions with no registered in-process implementation, and for any
/// action an operator has pinned to run on a specific executor pool) returns
/// a [`NodeOutcome::Blocked`] that the gateway dispatches to a remote
/// executor instead.
pub struct ConnectorActionNode {
    registry: Arc<ConnectorRegistry>,
}

impl ConnectorActionNode {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ExecutableNode for ConnectorActionNode {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let action_id = ctx
            .config
            .get("actionId")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("connector.action node requires config.actionId".into()))?
            .to_string();
        let params = ctx.config.get("params").cloned().unwrap_or(json!({}));
        let secret = ctx.config.get("secret").and_then(Value::as_str).map(str::to_owned);
        let mode = ctx
            .config
            .get("execution")
            .and_then(|e| e.get("mode"))
            .and_then(Value::as_str)
            .unwrap_or("inline");

        let local = self.registry.get(&action_id);

        if mode == "node" || local.is_none() {
            let selector = ctx.config.get("execution").and_then(|e| e.get("selector")).cloned();
            return Ok(NodeOutcome::Blocked {
                block: BlockRequest {
                    kind: "connector.action".into(),
                    payload: json!({ "actionId": action_id, "params": params, "input": input }),
                    dispatch_node_id: None,
                    selector,
                    secret,
                    timeout_ms: ctx.config.get("timeoutMs").and_then(Value::as_u64),
                },
                runtime: json!({}),
            });
        }

        let action = local.expect("checked above");
        let output = action.invoke(&params, &input, &ctx.secrets).await?;
        Ok(NodeOutcome::succeeded(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{NullCheckpointer, NullEmitter};
    use uuid::Uuid;

    struct EchoAction;

    #[async_trait]
    impl ConnectorAction for EchoAction {
        fn id(&self) -> &str {
            "test.echo"
        }

        async fn invoke(
            &self,
            config: &Value,
            _input: &Value,
            _secrets: &HashMap<String, String>,
        ) -> Result<Value, NodeError> {
            Ok(config.clone())
        }
    }

    fn ctx(config: Value) -> ExecutionContext {
        ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "connector".into(),
            node_type: "connector.action".into(),
            attempt_count: 1,
            config,
            run_input: json!({}),
            steps: json!({}),
            runtime: json!({}),
            pending_remote_result: None,
            secrets: Default::default(),
            organization_settings: json!({}),
            emit: Arc::new(NullEmitter),
            checkpoint: Arc::new(NullCheckpointer),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn inline_mode_invokes_local_action() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(EchoAction));
        let node = ConnectorActionNode::new(Arc::new(registry));
        let config = json!({"actionId": "test.echo", "params": {"hello": "world"}, "execution": {"mode": "inline"}});
        let outcome = node.execute(json!({}), &ctx(config)).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => assert_eq!(output["hello"], json!("world")),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn node_mode_blocks_for_dispatch() {
        let registry = ConnectorRegistry::new();
        let node = ConnectorActionNode::new(Arc::new(registry));
        let config = json!({"actionId": "slack.postMessage", "params": {}, "execution": {"mode": "node"}});
        let outcome = node.execute(json!({}), &ctx(config)).await.unwrap();
        assert!(matches!(outcome, NodeOutcome::Blocked { .. }));
    }

    #[tokio::test]
    async fn unregistered_action_without_explicit_mode_still_blocks() {
        let registry = ConnectorRegistry::new();
        let node = ConnectorActionNode::new(Arc::new(registry));
        let config = json!({"actionId": "github.createIssue", "params": {}});
        let outcome = node.execute(json!({}), &ctx(config)).await.unwrap();
        assert!(matches!(outcome, NodeOutcome::Blocked { .. }));
    }
}
