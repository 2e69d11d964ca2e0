//! Append-only run event log.
//!
//! `seq` is strictly monotonic per `(run_id, attempt_count)` — callers pass
//! the next value (typically tracked in-process by the stepper for the
//! duration of one attempt) rather than relying on the serial `id` column,
//! which is a storage detail and not part of the ordering contract.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::RunEventRow};

#[allow(clippy::too_many_arguments)]
pub async fn append_event(
    pool: &PgPool,
    run_id: Uuid,
    attempt_count: i32,
    seq: i64,
    event_type: &str,
    node_id: Option<&str>,
    node_type: Option<&str>,
    level: &str,
    message: Option<&str>,
    payload: Option<serde_json::Value>,
) -> Result<RunEventRow, DbError> {
    let row = sqlx::query_as!(
        RunEventRow,
        r#"
        INSERT INTO run_events
            (run_id, attempt_count, seq, ts, event_type, node_id, node_type, level, message, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id, run_id, attempt_count, seq, ts, event_type, node_id, node_type, level, message, payload
        "#,
        run_id,
        attempt_count,
        seq,
        Utc::now(),
        event_type,
        node_id,
        node_type,
        level,
        message,
        payload,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// List events for a run in append order, optionally starting after a
/// given row id (cursor pagination).
pub async fn list_events(
    pool: &PgPool,
    run_id: Uuid,
    after_id: Option<i64>,
    limit: i64,
) -> Result<Vec<RunEventRow>, DbError> {
    let rows = sqlx::query_as!(
        RunEventRow,
        r#"SELECT id, run_id, attempt_count, seq, ts, event_type, node_id, node_type, level, message, payload
           FROM run_events
           WHERE run_id = $1 AND ($2::bigint IS NULL OR id > $2)
           ORDER BY id ASC
           LIMIT $3"#,
        run_id,
        after_id,
        limit,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Highest `seq` appended so far for `(run_id, attempt_count)`, used by a
/// resuming stepper to continue the monotonic sequence instead of
/// restarting it from zero.
pub async fn max_seq(pool: &PgPool, run_id: Uuid, attempt_count: i32) -> Result<i64, DbError> {
    let max = sqlx::query_scalar!(
        r#"SELECT COALESCE(MAX(seq), 0) AS "max!" FROM run_events WHERE run_id = $1 AND attempt_count = $2"#,
        run_id,
        attempt_count,
    )
    .fetch_one(pool)
    .await?;
    Ok(max)
}
