//! Dispatch endpoint, result/event ingress, and timeout enforcement (§4.3).
//!
//! `Gateway` is the concrete implementation the stepper (`engine` crate)
//! drives through the [`Dispatcher`] trait. Keeping the trait and its
//! request/response types in this crate — rather than in `engine` — lets
//! `engine` depend one-way on `gateway` with no cycle back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use db::DbPool;
use queue::ContinuationJob;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::registry::{Connection, ExecutorRegistry, PendingEntry, SelectionStrategy};
use crate::types::{Dispatch, DispatchKind, GatewayFrame, InvokeRequest, RemoteEvent, RemoteResult, RemoteResultStatus};

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// What the stepper calls to hand a blocked node's work to the gateway, and
/// to poll for a result when the continuation queue's `remote.poll` fires.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: InvokeRequest) -> Result<Dispatch, GatewayError>;

    /// `Err(ResultNotReady)` means the dispatch is still outstanding — the
    /// caller (a `remote.poll` continuation job) should retry at the queue
    /// layer. A request id the gateway never dispatched is also reported as
    /// `ResultNotReady` rather than a hard error, since another process may
    /// hold the pending record.
    async fn fetch_result(&self, request_id: Uuid) -> Result<RemoteResult, GatewayError>;
}

/// The in-process gateway: an executor registry plus the db pool it uses to
/// push applied results onto the continuation queue.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ExecutorRegistry>,
    pool: DbPool,
    strategy: SelectionStrategy,
    continuation_max_attempts: i32,
}

impl Gateway {
    pub fn new(pool: DbPool, strategy: SelectionStrategy) -> Self {
        Self { registry: Arc::new(ExecutorRegistry::new()), pool, strategy, continuation_max_attempts: 5 }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn connector_id(request: &InvokeRequest) -> Option<String> {
        if request.kind != DispatchKind::ConnectorAction {
            return None;
        }
        request.payload.get("connectorId").and_then(|v| v.as_str()).map(str::to_owned)
    }

    /// Arranges for the pending entry to time out if no result arrives
    /// within `timeoutMs`, synthesizing `NODE_EXECUTION_TIMEOUT` (§4.3).
    fn spawn_timeout_guard(&self, request_id: Uuid, timeout: Duration) {
        let gateway = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if gateway.registry.peek_pending(request_id).is_some() {
                warn!(%request_id, "dispatch timed out, synthesizing NODE_EXECUTION_TIMEOUT");
                let result = RemoteResult {
                    request_id,
                    status: RemoteResultStatus::Failed,
                    output: None,
                    error: Some("NODE_EXECUTION_TIMEOUT".to_string()),
                };
                if let Err(err) = gateway.apply_result(result).await {
                    warn!(%request_id, %err, "failed to apply synthesized timeout result");
                }
            }
        });
    }

    /// Common tail of both the happy-path `execute_result` ingress and the
    /// synthesized-timeout path: resolve the pending entry, decrement
    /// in-flight, and push a `remote.apply` continuation job.
    async fn apply_result(&self, result: RemoteResult) -> Result<(), GatewayError> {
        let Some(pending) = self.registry.take_pending(result.request_id) else {
            self.registry.store_orphan_result(result);
            return Ok(());
        };

        if let Some(connection) = self.registry.get(pending.executor_id) {
            connection.in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }

        let job = ContinuationJob::Apply {
            organization_id: pending.organization_id,
            run_id: pending.run_id,
            request_id: result.request_id,
            status: match result.status {
                RemoteResultStatus::Succeeded => "succeeded".to_string(),
                RemoteResultStatus::Failed => "failed".to_string(),
            },
            output: result.output.clone(),
            error: result.error.clone(),
        };
        let payload = serde_json::to_value(&job).map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        queue::worker::enqueue_now(&self.pool, queue::names::WORKFLOW_CONTINUATIONS, &job.job_id(), payload, self.continuation_max_attempts)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        self.registry.store_orphan_result(result);
        Ok(())
    }

    /// Called by the WebSocket handler on an `execute_result` frame.
    pub async fn handle_execute_result(
        &self,
        request_id: Uuid,
        status: RemoteResultStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), GatewayError> {
        self.apply_result(RemoteResult { request_id, status, output, error }).await
    }

    /// Called by the WebSocket handler on an `execute_event` frame: forward
    /// as a `remote.event` continuation job, independent of block state.
    pub async fn handle_execute_event(&self, event: RemoteEvent) -> Result<(), GatewayError> {
        let pending = self.registry.peek_pending(event.request_id);
        let Some(pending) = pending else {
            self.registry.store_orphan_event(event);
            return Ok(());
        };
        let job = ContinuationJob::Event { run_id: pending.run_id, request_id: event.request_id, event: serde_json::to_value(&event).unwrap_or_default() };
        let payload = serde_json::to_value(&job).map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        queue::worker::enqueue_now(&self.pool, queue::names::WORKFLOW_CONTINUATIONS, &job.job_id(), payload, self.continuation_max_attempts)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for Gateway {
    async fn dispatch(&self, request: InvokeRequest) -> Result<Dispatch, GatewayError> {
        let request_id = Uuid::new_v4();
        let connector_id = Self::connector_id(&request);

        let connection: Arc<Connection> = self
            .registry
            .select(self.strategy, request.organization_id, request.kind, connector_id.as_deref(), request.selector.as_ref())
            .ok_or(GatewayError::NoEligibleExecutor)?;

        let timeout_ms = request.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS);
        let timeout = Duration::from_millis(timeout_ms);

        self.registry.register_pending(
            request_id,
            PendingEntry {
                organization_id: request.organization_id,
                run_id: request.run_id,
                workflow_id: request.workflow_id,
                kind: request.kind,
                executor_id: connection.executor_id,
                started_at: std::time::Instant::now(),
                timeout,
            },
        );
        connection.in_flight.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let frame = GatewayFrame::Execute {
            request_id,
            organization_id: request.organization_id,
            user_id: request.user_id,
            kind: request.kind,
            payload: request.payload,
            secret: request.secret,
        };
        if connection.sender.send(frame).is_err() {
            self.registry.take_pending(request_id);
            connection.in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            return Err(GatewayError::Unavailable("executor connection closed".to_string()));
        }

        info!(%request_id, executor_id = %connection.executor_id, "dispatched");
        self.spawn_timeout_guard(request_id, timeout);

        Ok(Dispatch { request_id, accepted: true })
    }

    async fn fetch_result(&self, request_id: Uuid) -> Result<RemoteResult, GatewayError> {
        if self.registry.peek_pending(request_id).is_some() {
            return Err(GatewayError::ResultNotReady);
        }
        self.registry.take_orphan_result(request_id).ok_or(GatewayError::ResultNotReady)
    }
}
