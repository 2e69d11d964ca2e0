//! Internal HTTP surface (§6): dispatch, result lookup, and managed-executor
//! pairing. All three require the gateway service token (checked by the
//! caller's middleware layer — the `api` crate mounts these routes behind
//! its own auth stack, so this module only implements the handlers).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::mint_token;
use crate::dispatcher::{Dispatcher, Gateway};
use crate::error::GatewayError;
use crate::types::InvokeRequest;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/internal/v1/dispatch", post(dispatch))
        .route("/internal/v1/results/:request_id", post(fetch_result))
        .route("/internal/v1/managed-executors/issue", post(issue_managed_executor))
        .with_state(gateway)
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::NoEligibleExecutor | GatewayError::ExecutorNotFound | GatewayError::ResultNotReady => StatusCode::NOT_FOUND,
        GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = status_for(&self);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn dispatch(State(gateway): State<Arc<Gateway>>, Json(request): Json<InvokeRequest>) -> Result<Json<serde_json::Value>, GatewayError> {
    let dispatch = gateway.dispatch(request).await?;
    Ok(Json(json!({ "requestId": dispatch.request_id })))
}

async fn fetch_result(State(gateway): State<Arc<Gateway>>, Path(request_id): Path<Uuid>) -> Result<Json<serde_json::Value>, GatewayError> {
    let result = gateway.fetch_result(request_id).await?;
    Ok(Json(json!({ "status": result.status, "output": result.output, "error": result.error })))
}

#[derive(Debug, serde::Deserialize)]
struct IssueManagedExecutorRequest {
    name: String,
    kinds: Vec<String>,
    #[serde(default)]
    connectors: Vec<String>,
    #[serde(default = "default_max_in_flight")]
    max_in_flight: i32,
}

fn default_max_in_flight() -> i32 {
    1
}

#[derive(Debug, Serialize)]
struct IssueManagedExecutorResponse {
    executor_id: Uuid,
    token: String,
}

async fn issue_managed_executor(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<IssueManagedExecutorRequest>,
) -> Result<Json<IssueManagedExecutorResponse>, GatewayError> {
    let (token, token_hash) = mint_token();
    let row = db::repository::executors::register_executor(
        gateway.pool(),
        None,
        "managed",
        &request.name,
        json!([]),
        serde_json::to_value(&request.kinds).unwrap_or(json!([])),
        Some(serde_json::to_value(&request.connectors).unwrap_or(json!([]))),
        request.max_in_flight,
        &token_hash,
    )
    .await
    .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

    Ok(Json(IssueManagedExecutorResponse { executor_id: row.id, token }))
}
