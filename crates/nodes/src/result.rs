//! The tagged-sum result every node executor returns — replaces the
//! ad-hoc `any`-typed runtime state the source system used.

use serde_json::Value;

/// A dispatch request a blocked node hands to the stepper, which forwards
/// it to the gateway (`kind ∈ {connector.action, agent.execute, agent.run}`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockRequest {
    pub kind: String,
    pub payload: Value,
    /// Overrides the node id a dispatch is attributed to (used by the
    /// agent loop to tag remote tool calls with `:tool:<callIndex>`).
    pub dispatch_node_id: Option<String>,
    pub selector: Option<Value>,
    pub secret: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// What a single node invocation produced.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Succeeded {
        output: Value,
        /// Merged into `run.runtime` (e.g. agent-loop state) even on a
        /// successful turn that isn't the loop's final step.
        runtime: Option<Value>,
    },
    Failed {
        error: String,
        output: Option<Value>,
        runtime: Option<Value>,
    },
    Blocked {
        block: BlockRequest,
        runtime: Value,
    },
}

impl NodeOutcome {
    pub fn succeeded(output: Value) -> Self {
        Self::Succeeded { output, runtime: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed { error: error.into(), output: None, runtime: None }
    }
}
