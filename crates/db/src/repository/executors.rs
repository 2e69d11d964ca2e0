//! Durable half of the executor directory — identity, capabilities, token
//! hash, and revocation. Online presence (a live WebSocket) is tracked only
//! in the gateway's in-memory registry, never here.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::ExecutorRow};

#[allow(clippy::too_many_arguments)]
pub async fn register_executor(
    pool: &PgPool,
    organization_id: Option<Uuid>,
    pool_kind: &str,
    name: &str,
    labels: serde_json::Value,
    kinds: serde_json::Value,
    connectors: Option<serde_json::Value>,
    max_in_flight: i32,
    token_hash: &str,
) -> Result<ExecutorRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        ExecutorRow,
        r#"
        INSERT INTO executors
            (id, organization_id, pool, name, labels, kinds, connectors, max_in_flight, token_hash, revoked, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10)
        RETURNING id, organization_id, pool, name, labels, kinds, connectors, max_in_flight, token_hash, revoked, created_at
        "#,
        id,
        organization_id,
        pool_kind,
        name,
        labels,
        kinds,
        connectors,
        max_in_flight,
        token_hash,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn get_executor(pool: &PgPool, id: Uuid) -> Result<ExecutorRow, DbError> {
    let row = sqlx::query_as!(
        ExecutorRow,
        r#"SELECT id, organization_id, pool, name, labels, kinds, connectors, max_in_flight, token_hash, revoked, created_at
           FROM executors WHERE id = $1"#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// All non-revoked executors visible to `organization_id` (its own BYON
/// fleet plus every managed executor).
pub async fn list_eligible(pool: &PgPool, organization_id: Uuid) -> Result<Vec<ExecutorRow>, DbError> {
    let rows = sqlx::query_as!(
        ExecutorRow,
        r#"SELECT id, organization_id, pool, name, labels, kinds, connectors, max_in_flight, token_hash, revoked, created_at
           FROM executors
           WHERE revoked = FALSE AND (pool = 'managed' OR organization_id = $1)"#,
        organization_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn revoke_executor(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    sqlx::query!("UPDATE executors SET revoked = TRUE WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}
