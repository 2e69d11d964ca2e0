use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use db::repository::workflows as wf_repo;
use engine::models::{DslVersion, Workflow, WorkflowDefinition, WorkflowStatus};

use crate::AppState;

#[derive(serde::Deserialize)]
pub struct CreateWorkflowDto {
    pub name: String,
    /// Groups this row with earlier versions of the same logical workflow.
    /// Omit to start a brand new workflow.
    pub workflow_key: Option<Uuid>,
    #[serde(default = "default_dsl_version")]
    pub dsl_version: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub definition: Value,
}

fn default_dsl_version() -> String {
    "v2".to_string()
}

fn default_status() -> String {
    "draft".to_string()
}

/// Validates `definition` parses and, for `v3`, that its edge set is a valid
/// DAG. Runs regardless of `status` — a draft with a broken graph is still
/// worth rejecting up front rather than at publish time.
fn validate_definition(name: &str, dsl_version: DslVersion, status: WorkflowStatus, definition: &Value) -> Result<(), StatusCode> {
    let definition: WorkflowDefinition = serde_json::from_value(definition.clone()).map_err(|_| StatusCode::BAD_REQUEST)?;
    let probe = Workflow {
        id: Uuid::nil(),
        workflow_key: Uuid::nil(),
        name: name.to_string(),
        version: 0,
        dsl_version,
        status,
        definition,
        created_at: chrono::Utc::now(),
    };
    engine::validate_dag(&probe).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(())
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<db::models::WorkflowRow>>, StatusCode> {
    match wf_repo::list_workflows(&state.pool).await {
        Ok(workflows) => Ok(Json(workflows)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<db::models::WorkflowRow>, StatusCode> {
    match wf_repo::get_workflow(&state.pool, id).await {
        Ok(wf) => Ok(Json(wf)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowDto>,
) -> Result<(StatusCode, Json<db::models::WorkflowRow>), StatusCode> {
    let dsl_version = DslVersion::parse(&payload.dsl_version).map_err(|_| StatusCode::BAD_REQUEST)?;
    let status = WorkflowStatus::parse(&payload.status).map_err(|_| StatusCode::BAD_REQUEST)?;
    validate_definition(&payload.name, dsl_version, status, &payload.definition)?;

    match wf_repo::create_workflow(&state.pool, payload.workflow_key, &payload.name, dsl_version.as_str(), status.as_str(), payload.definition).await {
        Ok(wf) => Ok((StatusCode::CREATED, Json(wf))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn delete(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    match wf_repo::delete_workflow(&state.pool, id).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
