//! `parallel.join` node — merges the fan-in branches of a v3 graph.
//!
//! A join node is only eligible to run once the stepper has observed a
//! `run_input`-scoped count of `requiredIncoming` resolved predecessor edges
//! (see engine's ready-set computation); this node just records what it saw.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome};

/// Built-in `parallel.join` node.
///
/// `config` shape: `{ "requiredIncoming": 3 }` (defaults to however many
/// edges the stepper resolved into `input.incomingFrom`, i.e. all of them).
pub struct ParallelJoinNode;

#[async_trait]
impl ExecutableNode for ParallelJoinNode {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let incoming_from: Vec<String> = input
            .get("incomingFrom")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();

        let satisfied = incoming_from.len() as u64;
        let required = ctx
            .config
            .get("requiredIncoming")
            .and_then(Value::as_u64)
            .unwrap_or(satisfied);

        Ok(NodeOutcome::succeeded(json!({
            "joined": satisfied >= required,
            "requiredIncoming": required,
            "satisfiedIncoming": satisfied,
            "incomingFrom": incoming_from,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{NullCheckpointer, NullEmitter};
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx(config: Value) -> ExecutionContext {
        ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "join".into(),
            node_type: "parallel.join".into(),
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
    async fn joins_when_all_branches_arrived() {
        let node = ParallelJoinNode;
        let input = json!({"incomingFrom": ["a", "b"]});
        let outcome = node.execute(input, &ctx(json!({"requiredIncoming": 2}))).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => assert_eq!(output["joined"], json!(true)),
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn does_not_join_when_short() {
        let node = ParallelJoinNode;
        let input = json!({"incomingFrom": ["a"]});
        let outcome = node.execute(input, &ctx(json!({"requiredIncoming": 2}))).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => assert_eq!(output["joined"], json!(false)),
            _ => panic!("expected success"),
        }
    }
}
