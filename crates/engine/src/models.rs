//! Core domain models for the workflow engine (spec §3).
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They serialize to/from the JSONB `definition` column of the
//! `workflows` table via [`WorkflowDefinition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EngineError;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Triggered by an incoming HTTP request to `/webhook/{path}`.
    Webhook { path: String },
    /// Triggered manually via the REST API.
    Manual,
    /// Triggered on a cron schedule.
    Cron { expression: String },
}

// ---------------------------------------------------------------------------
// DSL version / status
// ---------------------------------------------------------------------------

/// The shape a workflow's node graph is authored in (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DslVersion {
    /// Ordered list of nodes executed in index order.
    V2,
    /// A DAG with typed edges.
    V3,
}

impl DslVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            DslVersion::V2 => "v2",
            DslVersion::V3 => "v3",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "v2" => Ok(DslVersion::V2),
            "v3" => Ok(DslVersion::V3),
            other => Err(EngineError::UnknownDslVersion(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Published,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "published" => Ok(WorkflowStatus::Published),
            other => Err(EngineError::UnknownWorkflowStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single node in the workflow graph: `{id, type, config}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

// ---------------------------------------------------------------------------
// GraphEdge (v3 only)
// ---------------------------------------------------------------------------

/// Typed edge kind for the v3 graph DSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Unconditional: requires the upstream node to have `succeeded`.
    Always,
    /// Requires the upstream `condition` node's `result` to be `true`.
    CondTrue,
    /// Requires the upstream `condition` node's `result` to be `false`.
    CondFalse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

// ---------------------------------------------------------------------------
// WorkflowDefinition / Workflow
// ---------------------------------------------------------------------------

/// The full DSL blob persisted in `workflows.definition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub trigger: Trigger,
    pub nodes: Vec<NodeDefinition>,
    /// Only meaningful for `dsl_version = v3`; empty for `v2` (linear order
    /// is simply the `nodes` array's index order).
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// A complete, versioned workflow, reconstituted from a [`db::models::WorkflowRow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub workflow_key: Uuid,
    pub name: String,
    pub version: i32,
    pub dsl_version: DslVersion,
    pub status: WorkflowStatus,
    pub definition: WorkflowDefinition,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn from_row(row: db::models::WorkflowRow) -> Result<Self, EngineError> {
        let dsl_version = DslVersion::parse(&row.dsl_version)?;
        let status = WorkflowStatus::parse(&row.status)?;
        let definition: WorkflowDefinition =
            serde_json::from_value(row.definition).map_err(|e| EngineError::InvalidDefinition(e.to_string()))?;

        Ok(Self {
            id: row.id,
            workflow_key: row.workflow_key,
            name: row.name,
            version: row.version,
            dsl_version,
            status,
            definition,
            created_at: row.created_at,
        })
    }
}
