//! Workflow definition CRUD — each row is one immutable published/draft
//! version of a workflow graph. `workflow_key` groups the versions of the
//! same logical workflow; `workflow_runs.workflow_id` always points at a
//! specific version's `id`, never at the key.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WorkflowRow};

/// Publish a new version of `workflow_key` (or start a new workflow, if
/// `workflow_key` is `None`). Never mutates an existing row.
pub async fn create_workflow(
    pool: &PgPool,
    workflow_key: Option<Uuid>,
    name: &str,
    dsl_version: &str,
    status: &str,
    definition: serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    let id = Uuid::new_v4();
    let workflow_key = workflow_key.unwrap_or(id);
    let now = Utc::now();

    let next_version = sqlx::query_scalar!(
        r#"SELECT COALESCE(MAX(version), 0) + 1 AS "version!" FROM workflows WHERE workflow_key = $1"#,
        workflow_key,
    )
    .fetch_one(pool)
    .await?;

    let row = sqlx::query_as!(
        WorkflowRow,
        r#"
        INSERT INTO workflows (id, workflow_key, name, version, dsl_version, status, definition, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, workflow_key, name, version, dsl_version, status, definition, created_at
        "#,
        id,
        workflow_key,
        name,
        next_version,
        dsl_version,
        status,
        definition,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow version by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowRow,
        r#"SELECT id, workflow_key, name, version, dsl_version, status, definition, created_at
           FROM workflows WHERE id = $1"#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return the latest published version for a `workflow_key`, if any.
pub async fn get_latest_published(pool: &PgPool, workflow_key: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowRow,
        r#"SELECT id, workflow_key, name, version, dsl_version, status, definition, created_at
           FROM workflows
           WHERE workflow_key = $1 AND status = 'published'
           ORDER BY version DESC
           LIMIT 1"#,
        workflow_key,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return all workflow versions ordered by creation time (newest first).
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as!(
        WorkflowRow,
        r#"SELECT id, workflow_key, name, version, dsl_version, status, definition, created_at
           FROM workflows ORDER BY created_at DESC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query!("DELETE FROM workflows WHERE id = $1", id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
