//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types (the tagged-sum `NodeResult`, the in-memory workflow graph,
//! etc.) live in `engine`, `nodes`, and `gateway`, and convert to/from these
//! rows at the repository boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A single immutable version of a workflow graph.
///
/// `workflow_key` groups every version published under the same logical
/// workflow; `id` identifies this particular version and is what
/// `workflow_runs.workflow_id` points to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub workflow_key: Uuid,
    pub name: String,
    pub version: i32,
    pub dsl_version: String,
    pub status: String,
    /// Full JSON workflow definition (nodes, edges, trigger, …)
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// A persisted workflow run row — the full runtime entity of spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_type: String,
    pub requested_by_user_id: Option<Uuid>,
    pub input: serde_json::Value,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub cursor_node_index: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub blocked_request_id: Option<Uuid>,
    pub blocked_node_id: Option<String>,
    pub blocked_node_type: Option<String>,
    pub blocked_kind: Option<String>,
    pub blocked_timeout_at: Option<DateTime<Utc>>,
    /// Structured progress snapshot: `{status, steps[], output}`.
    pub output: serde_json::Value,
    /// Free-form per-run state: `agentRuns[nodeId]`, `pendingRemoteResult`, `graphV3`.
    pub runtime: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// run_events
// ---------------------------------------------------------------------------

/// An append-only event row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunEventRow {
    pub id: i64,
    pub run_id: Uuid,
    pub attempt_count: i32,
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub level: String,
    pub message: Option<String>,
    pub payload: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// executors
// ---------------------------------------------------------------------------

/// A persisted executor/agent pairing record.
///
/// Online presence is *not* tracked here — it lives only in the gateway's
/// in-memory registry while a WebSocket connection is held. This row is the
/// durable half: identity, capabilities, token hash, and revocation flag.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutorRow {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub pool: String,
    pub name: String,
    pub labels: serde_json::Value,
    pub kinds: serde_json::Value,
    pub connectors: Option<serde_json::Value>,
    pub max_in_flight: i32,
    pub token_hash: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// job_queue
// ---------------------------------------------------------------------------

/// A job row fetched from the queue table.
///
/// `queue_name` distinguishes `workflow-runs` from `workflow-continuations`;
/// `job_id` is the caller-chosen idempotency key (e.g. `runId` for run jobs,
/// `hash(requestId)` for continuation polls) that collapses duplicate
/// enqueues via a unique `(queue_name, job_id)` index.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub queue_name: String,
    pub job_id: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
