//! Payload shapes for the two durable queues (spec §4.2).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Enqueued whenever a run becomes eligible to step: on creation, on retry,
/// and whenever a continuation clears a block. `jobId = runId` so at most
/// one job per run is ever pending at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub run_id: Uuid,
}

/// A continuation resumes a blocked run once its remote dispatch settles,
/// either by the coordinator polling the gateway (`Poll`) or a pushed
/// terminal result/event arriving ahead of the poll (`Apply`/`Event`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContinuationJob {
    /// `remote.poll` — ask the gateway for the result; on `RESULT_NOT_READY`
    /// or `GATEWAY_UNAVAILABLE` the handler errors so the queue retries this
    /// same job at a fixed backoff no tighter than the poll interval.
    Poll {
        organization_id: Uuid,
        workflow_id: Uuid,
        run_id: Uuid,
        request_id: Uuid,
        attempt_count: i32,
    },
    /// `remote.apply` — a terminal result pushed by the executor ahead of
    /// any poll. Applied idempotently via CAS on `blockedRequestId`.
    Apply {
        organization_id: Uuid,
        run_id: Uuid,
        request_id: Uuid,
        status: String,
        output: Option<serde_json::Value>,
        error: Option<String>,
    },
    /// `remote.event` — an out-of-band event streamed from the executor
    /// while the remote call is still in flight. Appended to the run's
    /// event log; never touches block state.
    Event {
        run_id: Uuid,
        request_id: Uuid,
        event: serde_json::Value,
    },
}

impl ContinuationJob {
    /// `jobId = hash(requestId)` for polls so repeated poll enqueues for the
    /// same outstanding request collapse into one row (spec §4.2, §4.3).
    /// Apply and event jobs use a random id — each pushed result/event is
    /// its own job and is safe to apply more than once.
    pub fn job_id(&self) -> String {
        match self {
            ContinuationJob::Poll { request_id, .. } => format!("poll:{request_id}"),
            ContinuationJob::Apply { request_id, .. } => format!("apply:{request_id}:{}", Uuid::new_v4()),
            ContinuationJob::Event { request_id, .. } => format!("event:{request_id}:{}", Uuid::new_v4()),
        }
    }
}
