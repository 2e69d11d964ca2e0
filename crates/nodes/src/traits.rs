//! The `ExecutableNode` trait — the contract every node must fulfil.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{NodeError, NodeOutcome};

/// Sink for the out-of-band events a node emits while it runs (e.g. the
/// agent loop's streamed assistant deltas). Implemented by the engine crate
/// on top of the durable event log; kept as a trait here so `nodes` never
/// depends on `db`.
pub trait EventEmitter: Send + Sync {
    fn emit(
        &self,
        event_type: &str,
        node_id: Option<&str>,
        level: &str,
        message: Option<&str>,
        payload: Option<Value>,
    );
}

/// An emitter that drops everything, for tests that don't care about the
/// event stream.
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _: &str, _: Option<&str>, _: &str, _: Option<&str>, _: Option<Value>) {}
}

/// Incrementally persists per-node runtime state (e.g. agent-loop history)
/// so a crash between turns doesn't lose work already done. Implemented by
/// the engine crate over `db::repository::workflow_runs::update_progress`.
#[async_trait]
pub trait RuntimeCheckpointer: Send + Sync {
    async fn checkpoint(&self, node_id: &str, runtime: Value) -> anyhow::Result<()>;
}

/// A checkpointer that does nothing, for tests.
pub struct NullCheckpointer;

#[async_trait]
impl RuntimeCheckpointer for NullCheckpointer {
    async fn checkpoint(&self, _node_id: &str, _runtime: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared context passed to every node during execution (spec §4.4.3).
pub struct ExecutionContext {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub attempt_count: i32,
    /// This node's `config` blob from the workflow definition.
    pub config: Value,
    /// The run's original trigger input.
    pub run_input: Value,
    /// Completed step summaries so far (`[{nodeId, status, output}, …]`).
    pub steps: Value,
    /// Per-run free-form runtime state (`runtime.agentRuns[nodeId]`, etc).
    pub runtime: Value,
    /// Staged remote result, present exactly once on the invocation that
    /// resumes a previously blocked node.
    pub pending_remote_result: Option<Value>,
    /// Decrypted secrets scoped to this run's organization/workflow.
    pub secrets: HashMap<String, String>,
    /// Tenant-level feature flags (e.g. `tools.shellRunEnabled`).
    pub organization_settings: Value,
    pub emit: Arc<dyn EventEmitter>,
    pub checkpoint: Arc<dyn RuntimeCheckpointer>,
    /// Remaining wall-clock budget for this node invocation, if bounded
    /// (agent loops and remote dispatches carry a deadline; condition and
    /// join nodes don't).
    pub deadline: Option<std::time::Instant>,
}

/// The core node trait.
///
/// Every built-in and plugin node implements this. A node never returns a
/// bare `Value` — it returns the tagged [`NodeOutcome`] so the stepper can
/// tell a terminal success from a remote dispatch without inspecting
/// untyped fields. `Err` is reserved for the node-internal retry tier
/// (spec §4.4.5): [`NodeError::Retryable`] lets the stepper retry the same
/// node invocation with backoff before ever reaching [`NodeOutcome::Failed`].
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError>;
}

/// Maps `node_type` strings to registered node implementations.
pub type NodeRegistry = HashMap<String, Arc<dyn ExecutableNode>>;
