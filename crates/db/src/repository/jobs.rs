//! Thin row CRUD over the `job_queue` table.
//!
//! This module is intentionally dumb — enqueue, claim-one-with-skip-locked,
//! complete, fail. The backoff policy, queue naming, and idempotency-key
//! conventions (§4.2) live one layer up in the `queue` crate, which is the
//! only caller of these functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::JobRow};

/// Enqueue a job under `queue_name` keyed by `job_id`.
///
/// `(queue_name, job_id)` is unique — enqueuing the same key again is a
/// no-op that returns the existing row, which is how duplicate pushes
/// (`jobId = hash(requestId)`) collapse into one applied job.
pub async fn enqueue(
    pool: &PgPool,
    queue_name: &str,
    job_id: &str,
    payload: serde_json::Value,
    run_at: DateTime<Utc>,
    max_attempts: i32,
) -> Result<JobRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        JobRow,
        r#"
        INSERT INTO job_queue (id, queue_name, job_id, payload, status, attempts, max_attempts, run_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7, $7)
        ON CONFLICT (queue_name, job_id) DO UPDATE SET queue_name = EXCLUDED.queue_name
        RETURNING id, queue_name, job_id, payload, status, attempts, max_attempts, run_at, created_at, updated_at
        "#,
        id,
        queue_name,
        job_id,
        payload,
        max_attempts,
        run_at,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically fetch the oldest ready (`status = pending`, `run_at <= now`)
/// job in `queue_name` and mark it `processing`.
///
/// Uses `SELECT … FOR UPDATE SKIP LOCKED` so multiple worker processes can
/// poll the same queue without stepping on each other.
pub async fn claim_next(pool: &PgPool, queue_name: &str) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as!(
        JobRow,
        r#"
        SELECT id, queue_name, job_id, payload, status, attempts, max_attempts, run_at, created_at, updated_at
        FROM job_queue
        WHERE queue_name = $1 AND status = 'pending' AND run_at <= now()
        ORDER BY run_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
        queue_name,
    )
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(ref job) = row {
        sqlx::query!(
            r#"UPDATE job_queue SET status = 'processing', attempts = attempts + 1, updated_at = $1 WHERE id = $2"#,
            Utc::now(),
            job.id,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    Ok(row)
}

/// Mark a job completed.
pub async fn complete(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    sqlx::query!(
        "UPDATE job_queue SET status = 'completed', updated_at = $1 WHERE id = $2",
        Utc::now(),
        job_id,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Re-queue a job after a handler failure with the given backoff delay, or
/// dead-letter it once `max_attempts` is reached.
pub async fn retry_or_dead_letter(
    pool: &PgPool,
    job_id: Uuid,
    next_run_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        UPDATE job_queue
        SET status = CASE WHEN attempts >= max_attempts THEN 'dead_lettered' ELSE 'pending' END,
            run_at = $2,
            updated_at = $3
        WHERE id = $1
        "#,
        job_id,
        next_run_at,
        Utc::now(),
    )
    .execute(pool)
    .await?;
    Ok(())
}
