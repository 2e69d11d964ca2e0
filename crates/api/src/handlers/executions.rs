use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use db::models::WorkflowRunRow;
use db::repository::{workflow_runs, workflows as wf_repo};
use engine::models::Workflow;
use queue::RunJob;

use crate::AppState;

#[derive(serde::Deserialize)]
pub struct ExecuteWorkflowDto {
    #[serde(default)]
    pub input: Value,
}

/// No tenant/auth system exists yet (SPEC_FULL §1: auth is an interface
/// contract, not a full external system); callers may pass an
/// `X-Organization-Id` header and it is trusted as-is, falling back to a
/// single default organization otherwise.
pub fn organization_id(headers: &HeaderMap, default: Uuid) -> Uuid {
    headers
        .get("x-organization-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or(default)
}

/// Creates a queued run for `workflow_id` and enqueues its first step. Shared
/// by the manual-trigger endpoint and the webhook ingress.
pub async fn trigger_run(
    state: &AppState,
    organization_id: Uuid,
    workflow_id: Uuid,
    trigger_type: &str,
    requested_by_user_id: Option<Uuid>,
    input: Value,
) -> Result<WorkflowRunRow, StatusCode> {
    let workflow_row = wf_repo::get_workflow(&state.pool, workflow_id).await.map_err(|e| match e {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })?;
    let workflow = Workflow::from_row(workflow_row).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if workflow.status != engine::models::WorkflowStatus::Published {
        return Err(StatusCode::CONFLICT);
    }

    let run = workflow_runs::create_run(
        &state.pool,
        organization_id,
        workflow.id,
        trigger_type,
        requested_by_user_id,
        input,
        state.run_max_attempts_default,
    )
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let payload = serde_json::to_value(RunJob { run_id: run.id }).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    queue::worker::enqueue_now(&state.pool, queue::worker::workflow_runs_queue(), &run.id.to_string(), payload, state.run_max_attempts_default)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(run)
}

pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<(StatusCode, Json<WorkflowRunRow>), StatusCode> {
    let organization_id = organization_id(&headers, state.default_organization_id);
    let run = trigger_run(&state, organization_id, id, "manual", None, payload.input).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}
