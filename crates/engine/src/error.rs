//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Persistence / parsing ------
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("unknown dsl_version '{0}'")]
    UnknownDslVersion(String),

    #[error("unknown workflow status '{0}'")]
    UnknownWorkflowStatus(String),

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    // ------ DAG validation ------
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("node '{0}' is not reachable from the entry set")]
    UnreachableNode(String),

    #[error("conditional edge from non-condition node '{0}'")]
    ConditionalEdgeFromNonCondition(String),

    // ------ Execution ------
    #[error("WORKFLOW_NOT_PUBLISHED")]
    WorkflowNotPublished,

    #[error("node type '{0}' is not registered")]
    UnknownNodeType(String),

    #[error("node '{node_id}' failed fatally: {message}")]
    NodeFatal { node_id: String, message: String },

    #[error("node '{node_id}' exceeded retry limit: {message}")]
    NodeRetryExhausted { node_id: String, message: String },

    #[error("gateway error: {0}")]
    Gateway(#[from] gateway::GatewayError),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),
}
