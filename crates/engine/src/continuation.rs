//! Continuation-queue handler (`workflow-continuations`): applies a remote
//! dispatch's result or out-of-band event back onto a blocked run (spec
//! §4.3 ingress, §4.4.4 resumption).
//!
//! `blocked_kind = agent.run` is the only multi-turn case: the result is
//! staged as `runtime.pendingRemoteResult` and the block is cleared without
//! advancing the cursor, so the stepper re-enters the *same* node and lets
//! its own loop decide whether to finish or dispatch again. Every other
//! kind is one-shot — the result becomes the node's step output directly
//! and the cursor advances without ever re-invoking the node.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use db::DbPool;
use queue::{ContinuationJob, JobHandler, RunJob};

use crate::graph::{GraphState, NodeRunStatus};
use crate::models::{DslVersion, Workflow};
use crate::EngineError;

pub struct ContinuationHandler {
    pool: DbPool,
    dispatcher: std::sync::Arc<dyn gateway::Dispatcher>,
}

impl ContinuationHandler {
    pub fn new(pool: DbPool, dispatcher: std::sync::Arc<dyn gateway::Dispatcher>) -> Self {
        Self { pool, dispatcher }
    }

    async fn apply_result(&self, run_id: Uuid, request_id: Uuid, succeeded: bool, output: Option<Value>, error: Option<String>) -> Result<(), EngineError> {
        let run = db::repository::workflow_runs::get_run_by_id(&self.pool, run_id).await?;
        if run.blocked_request_id != Some(request_id) {
            return Ok(()); // stale: already applied, or lost the CAS race
        }
        let Some(node_id) = run.blocked_node_id.clone() else {
            return Ok(());
        };
        let kind = run.blocked_kind.clone().unwrap_or_default();

        let workflow_row = db::repository::workflows::get_workflow(&self.pool, run.workflow_id).await?;
        let workflow = Workflow::from_row(workflow_row)?;

        let mut runtime = if run.runtime.is_object() { run.runtime.clone() } else { json!({}) };

        if kind == "agent.run" {
            runtime["pendingRemoteResult"] = json!({
                "nodeId": node_id,
                "status": if succeeded { "succeeded" } else { "failed" },
                "output": output,
                "error": error,
            });
            let cleared = db::repository::workflow_runs::clear_block(&self.pool, run_id, request_id, run.output.clone(), runtime).await?;
            if cleared {
                self.append_remote_result_event(run_id, run.attempt_count, &node_id, succeeded).await;
                self.enqueue_run(run_id, run.max_attempts).await?;
            }
            return Ok(());
        }

        if !succeeded {
            self.append_remote_result_event(run_id, run.attempt_count, &node_id, false).await;
            return self.fail_or_retry(&run, error.unwrap_or_else(|| "remote dispatch failed".to_string())).await;
        }

        let mut steps: Vec<Value> = run.output.get("steps").and_then(Value::as_array).cloned().unwrap_or_default();
        steps.push(json!({"nodeId": node_id, "status": "succeeded", "output": output}));

        let next_cursor = match workflow.dsl_version {
            DslVersion::V2 => run.cursor_node_index + 1,
            DslVersion::V3 => {
                let mut state: GraphState = runtime.get("graphV3").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
                state.completed.insert(node_id.clone(), NodeRunStatus::Succeeded);
                runtime["graphV3"] = serde_json::to_value(&state).unwrap_or(json!({}));
                run.cursor_node_index + 1
            }
        };

        let cleared = db::repository::workflow_runs::clear_block_and_advance(&self.pool, run_id, request_id, next_cursor, json!({"steps": steps}), runtime).await?;
        if cleared {
            self.append_remote_result_event(run_id, run.attempt_count, &node_id, true).await;
            self.enqueue_run(run_id, run.max_attempts).await?;
        }
        Ok(())
    }

    async fn fail_or_retry(&self, run: &db::models::WorkflowRunRow, message: String) -> Result<(), EngineError> {
        if run.attempt_count < run.max_attempts {
            let next_attempt_at = queue::backoff::RetryPolicy::default().next_attempt_at(run.attempt_count);
            db::repository::workflow_runs::queue_for_retry(&self.pool, run.id, &message, Some(next_attempt_at)).await?;
            self.enqueue_run(run.id, run.max_attempts).await?;
        } else {
            db::repository::workflow_runs::mark_failed(&self.pool, run.id, &message, run.output.clone()).await?;
        }
        Ok(())
    }

    async fn append_remote_result_event(&self, run_id: Uuid, attempt_count: i32, node_id: &str, succeeded: bool) {
        let seq = db::repository::events::max_seq(&self.pool, run_id, attempt_count).await.unwrap_or(0) + 1;
        let status = if succeeded { "succeeded" } else { "failed" };
        if let Err(err) = db::repository::events::append_event(
            &self.pool, run_id, attempt_count, seq, "remote_result_received", Some(node_id), None, "info", None, Some(json!({"status": status})),
        )
        .await
        {
            warn!(%run_id, %err, "failed to append remote_result_received event");
        }
    }

    async fn enqueue_run(&self, run_id: Uuid, max_attempts: i32) -> Result<(), EngineError> {
        queue::worker::enqueue_now(
            &self.pool,
            queue::worker::workflow_runs_queue(),
            &run_id.to_string(),
            serde_json::to_value(RunJob { run_id }).unwrap(),
            max_attempts,
        )
        .await?;
        Ok(())
    }

    /// Backstop for the gateway's in-process timeout timer (`dispatcher.rs`'s
    /// `spawn_timeout_guard`), which doesn't survive a gateway restart: a
    /// `Poll` job checks the persisted `blocked_timeout_at` itself and
    /// synthesizes `NODE_EXECUTION_TIMEOUT` once it has passed, independent
    /// of whether the original timer is still alive anywhere.
    async fn timeout_if_overdue(&self, run_id: Uuid, request_id: Uuid) -> Result<(), String> {
        let run = db::repository::workflow_runs::get_run_by_id(&self.pool, run_id).await.map_err(|e| e.to_string())?;
        let overdue = run.blocked_request_id == Some(request_id)
            && run.blocked_timeout_at.map(|t| t <= chrono::Utc::now()).unwrap_or(false);
        if !overdue {
            return Err("RESULT_NOT_READY".to_string());
        }
        self.apply_result(run_id, request_id, false, None, Some("NODE_EXECUTION_TIMEOUT".to_string())).await.map_err(|e| e.to_string())
    }

    async fn apply_event(&self, run_id: Uuid, event: Value) -> Result<(), EngineError> {
        let attempt_count = db::repository::workflow_runs::get_run_by_id(&self.pool, run_id).await?.attempt_count;
        let seq = db::repository::events::max_seq(&self.pool, run_id, attempt_count).await? + 1;
        let kind = event.get("kind").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let message = event.get("message").and_then(Value::as_str).map(str::to_string);
        let level = event.get("level").and_then(Value::as_str).unwrap_or("info").to_string();
        let mut payload = event.get("payload").cloned().unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut payload {
            map.insert("kind".to_string(), json!(kind));
        }
        db::repository::events::append_event(
            &self.pool, run_id, attempt_count, seq, "remote_event", None, None, &level, message.as_deref(), Some(payload),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ContinuationHandler {
    fn queue_name(&self) -> &str {
        queue::worker::workflow_continuations_queue()
    }

    async fn handle(&self, payload: Value) -> Result<(), String> {
        let job: ContinuationJob = serde_json::from_value(payload).map_err(|e| e.to_string())?;
        match job {
            ContinuationJob::Poll { run_id, request_id, .. } => match self.dispatcher.fetch_result(request_id).await {
                Ok(result) => self
                    .apply_result(run_id, request_id, result.status == gateway::RemoteResultStatus::Succeeded, result.output, result.error)
                    .await
                    .map_err(|e| e.to_string()),
                Err(gateway::GatewayError::ResultNotReady) => self.timeout_if_overdue(run_id, request_id).await,
                Err(other) => Err(other.to_string()),
            },
            ContinuationJob::Apply { run_id, request_id, status, output, error, .. } => self
                .apply_result(run_id, request_id, status == "succeeded", output, error)
                .await
                .map_err(|e| e.to_string()),
            ContinuationJob::Event { run_id, event, .. } => self.apply_event(run_id, event).await.map_err(|e| e.to_string()),
        }
    }
}
