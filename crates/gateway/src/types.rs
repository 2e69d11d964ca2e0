//! Wire and domain types for the dispatch endpoint and executor protocol
//! (spec §3, §4.3).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What kind of remote work a dispatch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    #[serde(rename = "connector.action")]
    ConnectorAction,
    #[serde(rename = "agent.execute")]
    AgentExecute,
    #[serde(rename = "agent.run")]
    AgentRun,
}

/// Narrows the eligible executor pool for one dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    pub pool: Option<String>,
    pub executor_id: Option<Uuid>,
    pub tag: Option<String>,
    pub group: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A request to run remote work on behalf of a blocked node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub attempt_count: i32,
    pub kind: DispatchKind,
    pub payload: Value,
    pub selector: Option<Selector>,
    pub secret: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// The outcome of a dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub request_id: Uuid,
    pub accepted: bool,
}

/// Terminal result of a dispatched invocation, as reported by the executor
/// or synthesized by a timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResult {
    pub request_id: Uuid,
    pub status: RemoteResultStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteResultStatus {
    Succeeded,
    Failed,
}

/// An out-of-band intra-execution event streamed alongside the eventual
/// result (e.g. agent assistant deltas).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub request_id: Uuid,
    pub seq: i64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub kind: String,
    pub level: String,
    pub message: Option<String>,
    pub payload: Option<Value>,
}

/// Which pool an executor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    Managed,
    Byon,
}

/// Capabilities an executor announces in its `hello` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorCapabilities {
    pub kinds: Vec<String>,
    #[serde(default)]
    pub connectors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub max_in_flight: Option<i32>,
}

/// Executor→Gateway frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorFrame {
    Hello { agent_version: String, name: String, capabilities: ExecutorCapabilities },
    ExecutorHelloV2 { agent_version: String, name: String, capabilities: ExecutorCapabilities },
    Ping { ts: i64 },
    ExecuteResult { request_id: Uuid, status: RemoteResultStatus, output: Option<Value>, error: Option<String> },
    ExecuteEvent { request_id: Uuid, event: RemoteEvent },
}

/// Gateway→Executor frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    Execute {
        request_id: Uuid,
        organization_id: Uuid,
        user_id: Option<Uuid>,
        kind: DispatchKind,
        payload: Value,
        secret: Option<String>,
    },
    ExecuteAck { request_id: Uuid },
}
