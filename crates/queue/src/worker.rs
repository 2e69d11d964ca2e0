//! Generic poll-loop worker over a single named queue.
//!
//! Mirrors the shape of the engine's node-retry loop: claim, try, on success
//! complete, on failure reschedule with back-off. One `Worker` per queue
//! name; the `cli` crate's `worker` subcommand spins up one per queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use db::DbPool;
use tracing::{error, info, instrument, warn};

use crate::backoff::RetryPolicy;
use crate::error::QueueError;
use crate::names;

/// Implemented once per queue by the engine crate (run jobs) and the
/// gateway crate (continuation jobs).
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Queue this handler drains, e.g. [`names::WORKFLOW_RUNS`].
    fn queue_name(&self) -> &str;

    /// Handle one claimed job's raw payload. `Ok(())` completes the job;
    /// `Err` reschedules it with back-off (or dead-letters it past
    /// `max_attempts` — see [`db::repository::jobs::retry_or_dead_letter`]).
    async fn handle(&self, payload: serde_json::Value) -> Result<(), String>;
}

/// Tuning knobs for a worker's poll loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep after an empty claim before polling again.
    pub idle_poll_interval: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { idle_poll_interval: Duration::from_millis(250), retry_policy: RetryPolicy::default() }
    }
}

pub struct Worker<H: JobHandler> {
    pool: DbPool,
    handler: Arc<H>,
    config: WorkerConfig,
}

impl<H: JobHandler> Worker<H> {
    pub fn new(pool: DbPool, handler: Arc<H>, config: WorkerConfig) -> Self {
        Self { pool, handler, config }
    }

    /// Run the poll loop until `shutdown` resolves. Intended to be spawned
    /// as its own tokio task; one instance per queue.
    #[instrument(skip(self, shutdown), fields(queue = self.handler.queue_name()))]
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("worker for queue '{}' shutting down", self.handler.queue_name());
                    return;
                }
                claimed = self.claim_and_handle() => {
                    match claimed {
                        Ok(true) => continue,
                        Ok(false) => tokio::time::sleep(self.config.idle_poll_interval).await,
                        Err(e) => {
                            error!("queue '{}' claim error: {}", self.handler.queue_name(), e);
                            tokio::time::sleep(self.config.idle_poll_interval).await;
                        }
                    }
                }
            }
        }
    }

    /// Claims and handles at most one job. Returns `Ok(true)` if a job was
    /// found (whether it succeeded or was rescheduled), `Ok(false)` if the
    /// queue was empty.
    async fn claim_and_handle(&self) -> Result<bool, QueueError> {
        let queue_name = self.handler.queue_name();
        let Some(job) = db::repository::jobs::claim_next(&self.pool, queue_name).await? else {
            return Ok(false);
        };

        match self.handler.handle(job.payload.clone()).await {
            Ok(()) => {
                db::repository::jobs::complete(&self.pool, job.id).await?;
            }
            Err(message) => {
                warn!("job {} on queue '{}' failed: {}", job.job_id, queue_name, message);
                let next_run_at = self.config.retry_policy.next_attempt_at(job.attempts);
                db::repository::jobs::retry_or_dead_letter(&self.pool, job.id, next_run_at).await?;
            }
        }

        Ok(true)
    }
}

/// Enqueue helper shared by both queues' producers: idempotent insert keyed
/// by `job_id`, due immediately.
pub async fn enqueue_now(
    pool: &DbPool,
    queue_name: &str,
    job_id: &str,
    payload: serde_json::Value,
    max_attempts: i32,
) -> Result<(), QueueError> {
    db::repository::jobs::enqueue(pool, queue_name, job_id, payload, chrono::Utc::now(), max_attempts).await?;
    Ok(())
}

/// Re-exported so callers don't need to depend on `names` directly for the
/// two well-known queues.
pub fn workflow_runs_queue() -> &'static str {
    names::WORKFLOW_RUNS
}

pub fn workflow_continuations_queue() -> &'static str {
    names::WORKFLOW_CONTINUATIONS
}
