//! `agent.execute` node — invokes a previously-published agent as a single
//! remote call. Unlike `agent.run` (the in-process ReAct loop, implemented
//! in the `agent` crate), `agent.execute` never runs locally: the agent
//! being invoked may be a different version, a different language runtime,
//! or live behind an executor this worker has no code for. Every invocation
//! is a dispatch.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::result::BlockRequest;
use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome};

/// Built-in `agent.execute` node.
///
/// `config` shape: `{ "agentKey": "...", "version": 3, "input": {...}, "selector": {...} }`.
pub struct AgentExecuteNode;

#[async_trait]
impl ExecutableNode for AgentExecuteNode {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let agent_key = ctx
            .config
            .get("agentKey")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("agent.execute node requires config.agentKey".into()))?
            .to_string();
        let version = ctx.config.get("version").cloned().unwrap_or(Value::Null);
        let agent_input = ctx.config.get("input").cloned().unwrap_or(input);
        let selector = ctx.config.get("selector").cloned();

        Ok(NodeOutcome::Blocked {
            block: BlockRequest {
                kind: "agent.execute".into(),
                payload: json!({ "agentKey": agent_key, "version": version, "input": agent_input }),
                dispatch_node_id: None,
                selector,
                secret: None,
                timeout_ms: ctx.config.get("timeoutMs").and_then(Value::as_u64),
            },
            runtime: json!({}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{NullCheckpointer, NullEmitter};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn always_blocks_for_remote_dispatch() {
        let node = AgentExecuteNode;
        let ctx = ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "invoke".into(),
            node_type: "agent.execute".into(),
            attempt_count: 1,
            config: json!({"agentKey": "support-triage"}),
            run_input: json!({}),
            steps: json!({}),
            runtime: json!({}),
            pending_remote_result: None,
            secrets: Default::default(),
            organization_settings: json!({}),
            emit: Arc::new(NullEmitter),
            checkpoint: Arc::new(NullCheckpointer),
            deadline: None,
        };
        let outcome = node.execute(json!({}), &ctx).await.unwrap();
        match outcome {
            NodeOutcome::Blocked { block, .. } => assert_eq!(block.kind, "agent.execute"),
            other => panic!("expected blocked, got {other:?}"),
        }
    }
}
