//! `shell.run` node — executes a shell command inline.
//!
//! The sandbox backend is explicitly out of scope of this system (runs are
//! expected to execute inside whatever container/VM isolation the deploying
//! operator supplies); `LocalShellSandbox` is a bare, un-isolated default
//! suitable for trusted workflows and tests.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome};

#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ShellSandbox: Send + Sync {
    async fn run(&self, cmd: ShellCommand) -> Result<ShellOutput, String>;
}

/// Runs commands directly on the worker host with no isolation. Organizations
/// without `organization_settings.tools.shellRunEnabled` should never reach
/// this node; the caller is expected to gate on that before dispatch.
pub struct LocalShellSandbox;

#[async_trait]
impl ShellSandbox for LocalShellSandbox {
    async fn run(&self, cmd: ShellCommand) -> Result<ShellOutput, String> {
        let mut command = Command::new(&cmd.command);
        command.args(&cmd.args);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &cmd.env {
            command.env(k, v);
        }

        let output = timeout(Duration::from_millis(cmd.timeout_ms), command.output())
            .await
            .map_err(|_| format!("shell command timed out after {}ms", cmd.timeout_ms))?
            .map_err(|e| e.to_string())?;

        Ok(ShellOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Built-in `shell.run` node.
///
/// `config` shape: `{ "command": "echo", "args": ["hi"], "cwd": null, "env": {}, "timeoutMs": 30000 }`.
pub struct ShellRunNode {
    sandbox: Box<dyn ShellSandbox>,
}

impl ShellRunNode {
    pub fn new(sandbox: impl ShellSandbox + 'static) -> Self {
        Self { sandbox: Box::new(sandbox) }
    }
}

impl Default for ShellRunNode {
    fn default() -> Self {
        Self::new(LocalShellSandbox)
    }
}

#[async_trait]
impl ExecutableNode for ShellRunNode {
    async fn execute(&self, _input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let enabled = ctx
            .organization_settings
            .get("tools")
            .and_then(|t| t.get("shellRunEnabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !enabled {
            return Err(NodeError::Fatal("shell.run is disabled for this organization".into()));
        }

        let command = ctx
            .config
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("shell.run node requires config.command".into()))?
            .to_string();
        let args = ctx
            .config
            .get("args")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();
        let cwd = ctx.config.get("cwd").and_then(Value::as_str).map(str::to_owned);
        let env = ctx
            .config
            .get("env")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let timeout_ms = ctx.config.get("timeoutMs").and_then(Value::as_u64).unwrap_or(30_000);

        let result = self
            .sandbox
            .run(ShellCommand { command, args, cwd, env, timeout_ms })
            .await;

        match result {
            Ok(out) if out.exit_code == 0 => Ok(NodeOutcome::succeeded(json!({
                "exitCode": out.exit_code,
                "stdout": out.stdout,
                "stderr": out.stderr,
            }))),
            Ok(out) => Ok(NodeOutcome::Failed {
                error: format!("command exited with status {}", out.exit_code),
                output: Some(json!({"exitCode": out.exit_code, "stdout": out.stdout, "stderr": out.stderr})),
                runtime: None,
            }),
            Err(e) => Err(NodeError::Retryable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{NullCheckpointer, NullEmitter};
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx(config: Value, shell_enabled: bool) -> ExecutionContext {
        ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "shell".into(),
            node_type: "shell.run".into(),
            attempt_count: 1,
            config,
            run_input: json!({}),
            steps: json!({}),
            runtime: json!({}),
            pending_remote_result: None,
            secrets: Default::default(),
            organization_settings: json!({"tools": {"shellRunEnabled": shell_enabled}}),
            emit: Arc::new(NullEmitter),
            checkpoint: Arc::new(NullCheckpointer),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn disabled_org_is_fatal() {
        let node = ShellRunNode::default();
        let config = json!({"command": "echo", "args": ["hi"]});
        let err = node.execute(json!({}), &ctx(config, false)).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn runs_and_captures_stdout() {
        let node = ShellRunNode::default();
        let config = json!({"command": "echo", "args": ["hello"]});
        let outcome = node.execute(json!({}), &ctx(config, true)).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => {
                assert_eq!(output["exitCode"], json!(0));
                assert!(output["stdout"].as_str().unwrap().contains("hello"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_business_failure() {
        let node = ShellRunNode::default();
        let config = json!({"command": "sh", "args": ["-c", "exit 3"]});
        let outcome = node.execute(json!({}), &ctx(config, true)).await.unwrap();
        match outcome {
            NodeOutcome::Failed { output, .. } => assert_eq!(output.unwrap()["exitCode"], json!(3)),
            other => panic!("expected failed outcome, got {other:?}"),
        }
    }
}
