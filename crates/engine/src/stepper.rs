//! The run stepper (C4, spec §4.4): claims a `queued` run, executes nodes
//! against the node registry, and persists progress one checkpoint at a
//! time. Implements [`queue::JobHandler`] for the `workflow-runs` queue —
//! one [`RunStepper::step`] call handles exactly one `RunJob`.
//!
//! v2 (linear) workflows run every remaining node to completion (or a
//! block/failure) within a single job; v3 (graph) workflows execute one
//! ready node per job and re-enqueue themselves, matching the "one node per
//! iteration" behaviour the ready-set computation preserves (see
//! `graph.rs`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use db::models::WorkflowRunRow;
use db::DbPool;
use nodes::{EventEmitter, ExecutableNode, ExecutionContext, NodeError, NodeOutcome, NodeRegistry, RuntimeCheckpointer};
use queue::{JobHandler, RunJob};

use crate::graph::{self, GraphState, NodeRunStatus};
use crate::models::{DslVersion, Workflow};
use crate::EngineError;

/// Bounded in-process retry of a single node invocation on
/// `NodeError::Retryable`, before the failure escalates to the run-level
/// retry tier (`queueForRetry` / `markFailed`, spec §4.4.5).
#[derive(Debug, Clone)]
pub struct NodeRetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for NodeRetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(100), max_delay: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone)]
pub struct StepperConfig {
    pub node_retry: NodeRetryConfig,
    pub continuation_max_attempts: i32,
    pub run_max_attempts_default: i32,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self { node_retry: NodeRetryConfig::default(), continuation_max_attempts: 5, run_max_attempts_default: 3 }
    }
}

/// Writes every node-emitted event straight to the durable log. `next_seq`
/// is shared across the whole attempt so interleaved emits from a single
/// node still get a strictly increasing `seq`.
struct EventSink {
    pool: DbPool,
    run_id: Uuid,
    attempt_count: i32,
    next_seq: Arc<AtomicI64>,
}

impl EventEmitter for EventSink {
    fn emit(&self, event_type: &str, node_id: Option<&str>, level: &str, message: Option<&str>, payload: Option<Value>) {
        let pool = self.pool.clone();
        let run_id = self.run_id;
        let attempt_count = self.attempt_count;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event_type = event_type.to_string();
        let node_id = node_id.map(str::to_string);
        let level = level.to_string();
        let message = message.map(str::to_string);
        tokio::spawn(async move {
            if let Err(err) = db::repository::events::append_event(
                &pool, run_id, attempt_count, seq, &event_type, node_id.as_deref(), None, &level, message.as_deref(), payload,
            )
            .await
            {
                warn!(%run_id, %err, "failed to append event");
            }
        });
    }
}

/// Incrementally persists `runtime.agentRuns[nodeId]` between turns of a
/// multi-turn node so a crash doesn't lose in-progress work.
struct EngineCheckpointer {
    pool: DbPool,
    run_id: Uuid,
}

#[async_trait]
impl RuntimeCheckpointer for EngineCheckpointer {
    async fn checkpoint(&self, node_id: &str, runtime: Value) -> anyhow::Result<()> {
        let mut run = db::repository::workflow_runs::get_run_by_id(&self.pool, self.run_id).await?;
        if !run.runtime.is_object() {
            run.runtime = json!({});
        }
        run.runtime["agentRuns"][node_id] = runtime;
        db::repository::workflow_runs::set_runtime(&self.pool, self.run_id, run.runtime).await?;
        Ok(())
    }
}

fn take_pending_remote_result(node_id: &str, runtime: &mut Value) -> Option<Value> {
    let matches = runtime.get("pendingRemoteResult").and_then(|p| p.get("nodeId")).and_then(Value::as_str) == Some(node_id);
    if !matches {
        return None;
    }
    let pending = runtime.as_object_mut()?.remove("pendingRemoteResult")?;
    pending.get("result").cloned().or(Some(pending))
}

pub struct RunStepper {
    pool: DbPool,
    registry: Arc<NodeRegistry>,
    dispatcher: Arc<dyn gateway::Dispatcher>,
    config: StepperConfig,
}

impl RunStepper {
    pub fn new(pool: DbPool, registry: Arc<NodeRegistry>, dispatcher: Arc<dyn gateway::Dispatcher>, config: StepperConfig) -> Self {
        Self { pool, registry, dispatcher, config }
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn step(&self, run_id: Uuid) -> Result<(), EngineError> {
        let Some(run) = db::repository::workflow_runs::claim_queued_by_id(&self.pool, run_id).await? else {
            return Ok(());
        };

        let workflow_row = db::repository::workflows::get_workflow(&self.pool, run.workflow_id).await?;
        let workflow = Workflow::from_row(workflow_row)?;

        if workflow.status != crate::models::WorkflowStatus::Published {
            db::repository::workflow_runs::mark_failed(&self.pool, run_id, "WORKFLOW_NOT_PUBLISHED", run.output.clone()).await?;
            return Ok(());
        }

        let order = crate::dag::validate_dag(&workflow)?;
        let next_seq = Arc::new(AtomicI64::new(db::repository::events::max_seq(&self.pool, run_id, run.attempt_count).await? + 1));

        let is_first_invocation = run.attempt_count == 1
            && run.cursor_node_index == 0
            && run.output.get("steps").and_then(Value::as_array).map(|a| a.is_empty()).unwrap_or(true);
        if is_first_invocation {
            self.emitter(run.id, run.attempt_count, &next_seq).emit("run_started", None, "info", None, None);
        }

        match workflow.dsl_version {
            DslVersion::V2 => self.step_v2(run, &workflow, &order, &next_seq).await,
            DslVersion::V3 => self.step_v3(run, &workflow, &next_seq).await,
        }
    }

    fn emitter(&self, run_id: Uuid, attempt_count: i32, next_seq: &Arc<AtomicI64>) -> Arc<dyn EventEmitter> {
        Arc::new(EventSink { pool: self.pool.clone(), run_id, attempt_count, next_seq: next_seq.clone() })
    }

    fn checkpointer(&self, run_id: Uuid) -> Arc<dyn RuntimeCheckpointer> {
        Arc::new(EngineCheckpointer { pool: self.pool.clone(), run_id })
    }

    fn build_ctx(
        &self,
        run: &WorkflowRunRow,
        workflow: &Workflow,
        node_id: &str,
        node_type: &str,
        config: Value,
        steps: &Value,
        runtime: &Value,
        pending_remote_result: Option<Value>,
        emit: Arc<dyn EventEmitter>,
        checkpoint: Arc<dyn RuntimeCheckpointer>,
    ) -> ExecutionContext {
        // A multi-turn node (currently only `agent.run`) persists its own
        // deadline under `runtime.agentRuns[nodeId]`; reconstruct it here so
        // resuming a blocked node doesn't reset its wall-clock budget.
        let deadline = runtime
            .get("agentRuns")
            .and_then(|m| m.get(node_id))
            .and_then(|v| v.get("deadline_epoch_ms"))
            .and_then(Value::as_i64)
            .map(epoch_to_instant);

        ExecutionContext {
            organization_id: run.organization_id,
            user_id: run.requested_by_user_id,
            run_id: run.id,
            workflow_id: workflow.id,
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            attempt_count: run.attempt_count,
            config,
            run_input: run.input.clone(),
            steps: steps.clone(),
            runtime: runtime.clone(),
            pending_remote_result,
            secrets: HashMap::new(),
            organization_settings: json!({}),
            emit,
            checkpoint,
            deadline,
        }
    }

    /// Runs a single node to a terminal [`NodeOutcome`], retrying
    /// `NodeError::Retryable` in-process with bounded backoff.
    async fn execute_node(&self, node: &dyn ExecutableNode, input: Value, ctx: &ExecutionContext) -> Result<NodeOutcome, EngineError> {
        let mut attempt = 0u32;
        loop {
            match node.execute(input.clone(), ctx).await {
                Ok(outcome) => return Ok(outcome),
                Err(NodeError::Fatal(message)) => {
                    return Err(EngineError::NodeFatal { node_id: ctx.node_id.clone(), message });
                }
                Err(NodeError::Retryable(message)) => {
                    attempt += 1;
                    if attempt > self.config.node_retry.max_attempts {
                        return Err(EngineError::NodeRetryExhausted { node_id: ctx.node_id.clone(), message });
                    }
                    let delay = (self.config.node_retry.base_delay * 2u32.pow(attempt - 1)).min(self.config.node_retry.max_delay);
                    warn!(node_id = %ctx.node_id, attempt, %message, "retryable node error, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn dispatch_block(
        &self,
        run: &WorkflowRunRow,
        workflow: &Workflow,
        node_id: &str,
        node_type: &str,
        block: nodes::BlockRequest,
    ) -> Result<gateway::Dispatch, EngineError> {
        let kind = match block.kind.as_str() {
            "connector.action" => gateway::DispatchKind::ConnectorAction,
            "agent.execute" => gateway::DispatchKind::AgentExecute,
            "agent.run" => gateway::DispatchKind::AgentRun,
            other => return Err(EngineError::UnknownNodeType(other.to_string())),
        };
        let selector: Option<gateway::Selector> =
            block.selector.map(|s| serde_json::from_value(s).unwrap_or_default());
        let request = gateway::InvokeRequest {
            organization_id: run.organization_id,
            user_id: run.requested_by_user_id,
            run_id: run.id,
            workflow_id: workflow.id,
            node_id: block.dispatch_node_id.unwrap_or_else(|| node_id.to_string()),
            node_type: node_type.to_string(),
            attempt_count: run.attempt_count,
            kind,
            payload: block.payload,
            selector,
            secret: block.secret,
            timeout_ms: block.timeout_ms,
        };
        Ok(self.dispatcher.dispatch(request).await?)
    }

    // -----------------------------------------------------------------
    // v2: linear
    // -----------------------------------------------------------------

    async fn step_v2(&self, run: WorkflowRunRow, workflow: &Workflow, order: &[String], next_seq: &Arc<AtomicI64>) -> Result<(), EngineError> {
        let mut steps: Vec<Value> = run.output.get("steps").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut runtime = if run.runtime.is_object() { run.runtime.clone() } else { json!({}) };
        let node_defs: HashMap<&str, &crate::models::NodeDefinition> = workflow.definition.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut cursor = run.cursor_node_index as usize;
        while cursor < order.len() {
            let node_id = &order[cursor];
            let node_def = node_defs.get(node_id.as_str()).expect("validated node id");
            let pending = take_pending_remote_result(node_id, &mut runtime);

            let node = self
                .registry
                .get(&node_def.node_type)
                .ok_or_else(|| EngineError::UnknownNodeType(node_def.node_type.clone()))?;

            let ctx = self.build_ctx(
                &run,
                workflow,
                node_id,
                &node_def.node_type,
                node_def.config.clone(),
                &json!(steps),
                &runtime,
                pending.clone(),
                self.emitter(run.id, run.attempt_count, next_seq),
                self.checkpointer(run.id),
            );
            let input = pending.clone().unwrap_or_else(|| run.input.clone());

            ctx.emit.emit("node_started", Some(node_id), "info", None, None);
            let outcome = match self.execute_node(node.as_ref(), input, &ctx).await {
                Ok(outcome) => outcome,
                Err(err) => return self.fail_or_retry_run(&run, &steps, err, next_seq).await,
            };

            match outcome {
                NodeOutcome::Succeeded { output, runtime: rt_update } => {
                    if let Some(update) = rt_update {
                        merge_object(&mut runtime, update);
                    }
                    ctx.emit.emit("node_succeeded", Some(node_id), "info", None, Some(json!({"output": output.clone()})));
                    steps.push(json!({"nodeId": node_id, "status": "succeeded", "output": output}));
                    cursor += 1;
                    db::repository::workflow_runs::update_progress(&self.pool, run.id, cursor as i32, json!({"steps": steps}), runtime.clone()).await?;
                }
                NodeOutcome::Failed { error, output, runtime: rt_update } => {
                    if let Some(update) = rt_update {
                        merge_object(&mut runtime, update);
                    }
                    steps.push(json!({"nodeId": node_id, "status": "failed", "error": error, "output": output}));
                    return self
                        .fail_or_retry_run(&run, &steps, EngineError::NodeFatal { node_id: node_id.clone(), message: error }, next_seq)
                        .await;
                }
                NodeOutcome::Blocked { block, runtime: rt_update } => {
                    merge_object(&mut runtime, rt_update);
                    return self.block_run(&run, workflow, node_id, &node_def.node_type, cursor as i32, &steps, &runtime, block, next_seq).await;
                }
            }
        }

        self.emitter(run.id, run.attempt_count, next_seq).emit("run_succeeded", None, "info", None, None);
        db::repository::workflow_runs::mark_succeeded(&self.pool, run.id, json!({"steps": steps})).await?;
        info!(run_id = %run.id, "run succeeded");
        Ok(())
    }

    // -----------------------------------------------------------------
    // v3: graph
    // -----------------------------------------------------------------

    async fn step_v3(&self, run: WorkflowRunRow, workflow: &Workflow, next_seq: &Arc<AtomicI64>) -> Result<(), EngineError> {
        let mut steps: Vec<Value> = run.output.get("steps").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut runtime = if run.runtime.is_object() { run.runtime.clone() } else { json!({}) };
        let mut state: GraphState = runtime
            .get("graphV3")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let ready = graph::ready_nodes(workflow, &state);
        if ready.is_empty() {
            let skipped = graph::classify_skipped(workflow, &state);
            let emit = self.emitter(run.id, run.attempt_count, next_seq);
            for (node_id, reason) in &skipped {
                emit.emit("node_skipped", Some(node_id.as_str()), "info", None, Some(json!({"reasonCode": reason})));
            }
            let skipped_value: HashMap<String, &str> = skipped;
            emit.emit("run_succeeded", None, "info", None, None);
            db::repository::workflow_runs::mark_succeeded(&self.pool, run.id, json!({"steps": steps, "skipped": skipped_value})).await?;
            info!(run_id = %run.id, "run succeeded (graph exhausted)");
            return Ok(());
        }

        let node_id = ready[0].clone();
        let node_def = workflow.definition.nodes.iter().find(|n| n.id == node_id).expect("in ready set");
        let pending = take_pending_remote_result(&node_id, &mut runtime);

        let node = self.registry.get(&node_def.node_type).ok_or_else(|| EngineError::UnknownNodeType(node_def.node_type.clone()))?;
        let ctx = self.build_ctx(
            &run,
            workflow,
            &node_id,
            &node_def.node_type,
            node_def.config.clone(),
            &json!(steps),
            &runtime,
            pending.clone(),
            self.emitter(run.id, run.attempt_count, next_seq),
            self.checkpointer(run.id),
        );
        let mut input = pending.clone().unwrap_or_else(|| run.input.clone());
        let incoming_from = graph::satisfied_incoming(workflow, &node_id, &state);
        match &mut input {
            Value::Object(map) => {
                map.insert("incomingFrom".to_string(), json!(incoming_from));
            }
            _ => input = json!({"incomingFrom": incoming_from}),
        }

        ctx.emit.emit("node_started", Some(&node_id), "info", None, None);
        let outcome = match self.execute_node(node.as_ref(), input, &ctx).await {
            Ok(outcome) => outcome,
            Err(err) => return self.fail_or_retry_run(&run, &steps, err, next_seq).await,
        };

        match outcome {
            NodeOutcome::Succeeded { output, runtime: rt_update } => {
                if let Some(update) = rt_update {
                    merge_object(&mut runtime, update);
                }
                if node_def.node_type == "condition" {
                    if let Some(result) = output.get("result").and_then(Value::as_bool) {
                        state.condition_results.insert(node_id.clone(), result);
                    }
                }
                state.completed.insert(node_id.clone(), NodeRunStatus::Succeeded);
                runtime["graphV3"] = serde_json::to_value(&state).unwrap_or(json!({}));
                ctx.emit.emit("node_succeeded", Some(&node_id), "info", None, Some(json!({"output": output.clone()})));
                steps.push(json!({"nodeId": node_id, "status": "succeeded", "output": output}));
                db::repository::workflow_runs::update_progress(&self.pool, run.id, run.cursor_node_index + 1, json!({"steps": steps}), runtime.clone()).await?;
                queue::worker::enqueue_now(&self.pool, queue::worker::workflow_runs_queue(), &run.id.to_string(), serde_json::to_value(RunJob { run_id: run.id }).unwrap(), run.max_attempts).await?;
            }
            NodeOutcome::Failed { error, output, runtime: rt_update } => {
                if let Some(update) = rt_update {
                    merge_object(&mut runtime, update);
                }
                steps.push(json!({"nodeId": node_id, "status": "failed", "error": error, "output": output}));
                return self.fail_or_retry_run(&run, &steps, EngineError::NodeFatal { node_id, message: error }, next_seq).await;
            }
            NodeOutcome::Blocked { block, runtime: rt_update } => {
                merge_object(&mut runtime, rt_update);
                runtime["graphV3"] = serde_json::to_value(&state).unwrap_or(json!({}));
                return self.block_run(&run, workflow, &node_id, &node_def.node_type, run.cursor_node_index, &steps, &runtime, block, next_seq).await;
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Shared terminal paths
    // -----------------------------------------------------------------

    async fn block_run(
        &self,
        run: &WorkflowRunRow,
        workflow: &Workflow,
        node_id: &str,
        node_type: &str,
        cursor: i32,
        steps: &[Value],
        runtime: &Value,
        block: nodes::BlockRequest,
        next_seq: &Arc<AtomicI64>,
    ) -> Result<(), EngineError> {
        let kind = block.kind.clone();
        let dispatch = self.dispatch_block(run, workflow, node_id, node_type, block).await?;

        db::repository::workflow_runs::mark_blocked(
            &self.pool,
            run.id,
            cursor,
            dispatch.request_id,
            node_id,
            node_type,
            &kind,
            Utc::now() + chrono::Duration::seconds(600),
            json!({"steps": steps}),
            runtime.clone(),
        )
        .await?;

        self.emitter(run.id, run.attempt_count, next_seq).emit(
            "node_dispatched",
            Some(node_id),
            "info",
            None,
            Some(json!({"requestId": dispatch.request_id, "kind": kind})),
        );

        let poll_job = queue::ContinuationJob::Poll {
            organization_id: run.organization_id,
            workflow_id: workflow.id,
            run_id: run.id,
            request_id: dispatch.request_id,
            attempt_count: 0,
        };
        queue::worker::enqueue_now(
            &self.pool,
            queue::worker::workflow_continuations_queue(),
            &poll_job.job_id(),
            serde_json::to_value(&poll_job).unwrap(),
            self.config.continuation_max_attempts,
        )
        .await?;

        Ok(())
    }

    async fn fail_or_retry_run(&self, run: &WorkflowRunRow, steps: &[Value], err: EngineError, next_seq: &Arc<AtomicI64>) -> Result<(), EngineError> {
        let message = err.to_string();
        let node_id = match &err {
            EngineError::NodeFatal { node_id, .. } | EngineError::NodeRetryExhausted { node_id, .. } => Some(node_id.as_str()),
            _ => None,
        };
        let emit = self.emitter(run.id, run.attempt_count, next_seq);
        emit.emit("node_failed", node_id, "error", Some(&message), None);

        let output = json!({"steps": steps});
        if run.attempt_count < run.max_attempts {
            let next_attempt_at = queue::backoff::RetryPolicy::default().next_attempt_at(run.attempt_count);
            emit.emit("run_retried", None, "warn", Some(&message), Some(json!({"attempt": run.attempt_count})));
            db::repository::workflow_runs::queue_for_retry(&self.pool, run.id, &message, Some(next_attempt_at)).await?;
            queue::worker::enqueue_now(
                &self.pool,
                queue::worker::workflow_runs_queue(),
                &run.id.to_string(),
                serde_json::to_value(RunJob { run_id: run.id }).unwrap(),
                run.max_attempts,
            )
            .await?;
        } else {
            emit.emit("run_failed", None, "error", Some(&message), None);
            db::repository::workflow_runs::mark_failed(&self.pool, run.id, &message, output).await?;
        }
        warn!(run_id = %run.id, %message, "run step failed");
        Ok(())
    }
}

/// Reconstructs an `Instant` deadline from an epoch-ms value a node
/// persisted on an earlier turn. `Instant` carries no wall-clock meaning
/// across a block/resume round trip, so this is the only place that value
/// is translated back into one.
fn epoch_to_instant(epoch_ms: i64) -> Instant {
    let remaining_ms = (epoch_ms - Utc::now().timestamp_millis()).max(0) as u64;
    Instant::now() + Duration::from_millis(remaining_ms)
}

fn merge_object(base: &mut Value, update: Value) {
    let (Value::Object(base_map), Value::Object(update_map)) = (base, update) else {
        return;
    };
    for (k, v) in update_map {
        base_map.insert(k, v);
    }
}

#[async_trait]
impl JobHandler for RunStepper {
    fn queue_name(&self) -> &str {
        queue::worker::workflow_runs_queue()
    }

    async fn handle(&self, payload: Value) -> Result<(), String> {
        let job: RunJob = serde_json::from_value(payload).map_err(|e| e.to_string())?;
        self.step(job.run_id).await.map_err(|e| e.to_string())
    }
}
