use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use db::models::{RunEventRow, WorkflowRunRow};
use db::repository::{events as events_repo, workflow_runs};

use super::executions::organization_id;
use crate::AppState;

#[derive(Deserialize)]
pub struct ListRunsQuery {
    pub before: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<ListRunsQuery>) -> Result<Json<Vec<WorkflowRunRow>>, StatusCode> {
    let org = organization_id(&headers, state.default_organization_id);
    workflow_runs::list_runs(&state.pool, org, query.before, query.limit)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<WorkflowRunRow>, StatusCode> {
    match workflow_runs::get_run_by_id(&state.pool, id).await {
        Ok(run) => Ok(Json(run)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[derive(Deserialize)]
pub struct ListEventsQuery {
    pub after_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub async fn events(Path(id): Path<Uuid>, State(state): State<AppState>, Query(query): Query<ListEventsQuery>) -> Result<Json<Vec<RunEventRow>>, StatusCode> {
    events_repo::list_events(&state.pool, id, query.after_id, query.limit)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
