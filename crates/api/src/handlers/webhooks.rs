use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;

use db::repository::workflows as wf_repo;
use engine::models::{Trigger, Workflow, WorkflowStatus};

use super::executions::{organization_id, trigger_run};
use crate::AppState;

/// Finds the published workflow whose trigger is `webhook { path }` matching
/// the incoming request path. Workflow definitions aren't indexed by trigger
/// path, so this scans every row — acceptable at this scale, and matches how
/// few webhook-triggered workflows a given deployment is expected to carry.
async fn find_by_webhook_path(state: &AppState, path: &str) -> Result<db::models::WorkflowRow, StatusCode> {
    let all = wf_repo::list_workflows(&state.pool).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    all.into_iter()
        .find(|row| {
            if row.status.as_str() != WorkflowStatus::Published.as_str() {
                return false;
            }
            let Ok(workflow) = Workflow::from_row(row.clone()) else { return false };
            matches!(&workflow.definition.trigger, Trigger::Webhook { path: trigger_path } if trigger_path == path)
        })
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let wf_row = find_by_webhook_path(&state, &path).await?;
    let org = organization_id(&headers, state.default_organization_id);
    let run = trigger_run(&state, org, wf_row.id, "webhook", None, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "runId": run.id, "status": run.status }))))
}
