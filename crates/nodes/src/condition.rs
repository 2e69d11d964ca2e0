//! `condition` node — evaluates a single comparison against run state and
//! routes the v3 graph stepper down the `cond_true`/`cond_false` edge.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome};

/// Supported comparison operators.
const OPS: &[&str] = &["exists", "eq", "neq", "contains", "gt", "gte", "lt", "lte"];

fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn evaluate(op: &str, actual: Option<&Value>, expected: &Value) -> Result<bool, NodeError> {
    match op {
        "exists" => Ok(actual.is_some_and(|v| !v.is_null())),
        "eq" => Ok(actual == Some(expected)),
        "neq" => Ok(actual != Some(expected)),
        "contains" => match actual {
            Some(Value::String(s)) => Ok(expected.as_str().is_some_and(|needle| s.contains(needle))),
            Some(Value::Array(arr)) => Ok(arr.contains(expected)),
            _ => Ok(false),
        },
        "gt" | "gte" | "lt" | "lte" => {
            let (Some(a), Some(b)) = (actual.and_then(as_f64), as_f64(expected)) else {
                return Ok(false);
            };
            Ok(match op {
                "gt" => a > b,
                "gte" => a >= b,
                "lt" => a < b,
                "lte" => a <= b,
                _ => unreachable!(),
            })
        }
        other => Err(NodeError::Fatal(format!(
            "unknown condition operator '{other}', expected one of {OPS:?}"
        ))),
    }
}

/// Built-in `condition` node.
///
/// `config` shape: `{ "path": "steps.fetch.output.status", "op": "eq", "value": 200 }`.
/// `path` is resolved against `{ run: ctx.run_input, steps: ctx.steps, runtime: ctx.runtime, input }`.
pub struct ConditionNode;

#[async_trait]
impl ExecutableNode for ConditionNode {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let path = ctx
            .config
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("condition node requires config.path".into()))?;
        let op = ctx
            .config
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("condition node requires config.op".into()))?;
        let expected = ctx.config.get("value").cloned().unwrap_or(Value::Null);

        let scope = json!({
            "run": ctx.run_input,
            "steps": ctx.steps,
            "runtime": ctx.runtime,
            "input": input,
        });
        let actual = resolve_path(&scope, path);
        let result = evaluate(op, actual, &expected)?;

        Ok(NodeOutcome::succeeded(json!({
            "result": result,
            "explain": {
                "path": path,
                "op": op,
                "expected": expected,
                "actualPresent": actual.is_some(),
                "actualType": actual.map(type_name),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{NullCheckpointer, NullEmitter};
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx(config: Value, steps: Value) -> ExecutionContext {
        ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "cond".into(),
            node_type: "condition".into(),
            attempt_count: 1,
            config,
            run_input: json!({}),
            steps,
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
    async fn eq_matches() {
        let node = ConditionNode;
        let steps = json!({"fetch": {"output": {"status": 200}}});
        let config = json!({"path": "steps.fetch.output.status", "op": "eq", "value": 200});
        let outcome = node.execute(json!({}), &ctx(config, steps)).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => assert_eq!(output["result"], json!(true)),
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn missing_path_is_not_exists() {
        let node = ConditionNode;
        let config = json!({"path": "steps.missing.output", "op": "exists", "value": null});
        let outcome = node.execute(json!({}), &ctx(config, json!({}))).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => {
                assert_eq!(output["result"], json!(false));
                assert_eq!(output["explain"]["actualPresent"], json!(false));
            }
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn unknown_op_is_fatal() {
        let node = ConditionNode;
        let config = json!({"path": "steps", "op": "bogus", "value": null});
        let err = node.execute(json!({}), &ctx(config, json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
