//! `agent.run` node — drives the multi-turn agent loop (spec §4.5) to a
//! terminal outcome: success, a node failure, or a blocked remote dispatch.

use async_trait::async_trait;
use serde_json::Value;

use nodes::{ExecutableNode, ExecutionContext, NodeError, NodeOutcome};

use crate::config::AgentNodeConfig;
use crate::loop_::{run_agent_loop, LoopDeps};
use crate::state::AgentRunState;

/// `config` shape: `{systemPrompt?, instructions?, inputTemplate?,
/// allowedTools: [...], limits?: {...}, jsonSchema?, toolset?,
/// team?: {teammates: [...]}}` (spec §4.5.1-§4.5.2).
pub struct AgentRunNode {
    deps: LoopDeps,
}

impl AgentRunNode {
    pub fn new(deps: LoopDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ExecutableNode for AgentRunNode {
    async fn execute(&self, _input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let cfg = AgentNodeConfig::from_config(&ctx.config);
        let state = AgentRunState::load(&ctx.runtime, &ctx.node_id);

        // The loop reports agent-semantic failures (bad envelopes, policy
        // denials, exhausted turns) as `NodeOutcome::Failed`, which still
        // gets ordinary run-level retry treatment. `Err` here is reserved
        // for failures raised before any loop state existed.
        run_agent_loop(&cfg, ctx, state, &self.deps).await.map_err(|e| NodeError::Fatal(e.code()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use nodes::connector::ConnectorRegistry;
    use nodes::shell_run::LocalShellSandbox;
    use nodes::traits::{NullCheckpointer, NullEmitter};

    use crate::provider::{ChatRequest, ChatResponse, LlmProvider};
    use crate::tools::{SkillRegistry, ToolDeps};
    use crate::AgentError;

    use super::*;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_name(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn chat(&self, _request: ChatRequest, _emit: &std::sync::Arc<dyn nodes::EventEmitter>) -> Result<ChatResponse, AgentError> {
            let content = self.responses.lock().unwrap().pop_front().expect("scripted provider exhausted");
            Ok(ChatResponse { content, provider: "test".into(), model: "test-model".into() })
        }
    }

    fn test_ctx(config: Value) -> ExecutionContext {
        ExecutionContext {
            organization_id: Uuid::nil(),
            user_id: None,
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            node_id: "agent1".into(),
            node_type: "agent.run".into(),
            attempt_count: 1,
            config,
            run_input: json!({}),
            steps: json!({}),
            runtime: json!({}),
            pending_remote_result: None,
            secrets: Default::default(),
            organization_settings: json!({}),
            emit: std::sync::Arc::new(NullEmitter),
            checkpoint: std::sync::Arc::new(NullCheckpointer),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn executes_to_a_succeeded_outcome() {
        let responses = vec!["{\"type\":\"final\",\"output\":{\"ok\":true}}".to_string()];
        let deps = LoopDeps {
            provider: std::sync::Arc::new(ScriptedProvider { responses: Mutex::new(responses.into()) }),
            tools: std::sync::Arc::new(ToolDeps {
                shell_sandbox: std::sync::Arc::new(LocalShellSandbox),
                connectors: std::sync::Arc::new(ConnectorRegistry::new()),
                skills: std::sync::Arc::new(SkillRegistry::new()),
            }),
        };
        let node = AgentRunNode::new(deps);
        let ctx = test_ctx(json!({"allowedTools": []}));

        let outcome = node.execute(json!({}), &ctx).await.unwrap();
        match outcome {
            NodeOutcome::Succeeded { output, .. } => assert_eq!(output["ok"], json!(true)),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
