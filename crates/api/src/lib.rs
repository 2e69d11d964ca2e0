//! `api` crate — HTTP REST API layer.
//!
//! Exposes:
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/:id
//!   DELETE /api/v1/workflows/:id
//!   POST   /api/v1/workflows/:id/execute
//!   GET    /api/v1/runs
//!   GET    /api/v1/runs/:id
//!   GET    /api/v1/runs/:id/events
//!   POST   /webhook/:path
//!
//! Plus the gateway's internal dispatch/result surface and executor
//! WebSocket endpoints, mounted alongside (spec §6).

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use db::DbPool;
use gateway::Gateway;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared state for the REST handlers. `default_organization_id` stands in
/// for a tenant-resolution layer this system doesn't implement (SPEC_FULL
/// §1: auth is an interface contract, not a full external system) — see
/// `handlers::executions::organization_id`.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub default_organization_id: Uuid,
    pub run_max_attempts_default: i32,
}

pub async fn serve(bind: &str, pool: DbPool, gateway: Arc<Gateway>, default_organization_id: Uuid, run_max_attempts_default: i32) -> Result<(), std::io::Error> {
    let state = AppState { pool, default_organization_id, run_max_attempts_default };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api_router = Router::new()
        .route("/workflows", get(handlers::workflows::list).post(handlers::workflows::create))
        .route("/workflows/:id", get(handlers::workflows::get).delete(handlers::workflows::delete))
        .route("/workflows/:id/execute", post(handlers::executions::execute))
        .route("/runs", get(handlers::runs::list))
        .route("/runs/:id", get(handlers::runs::get))
        .route("/runs/:id/events", get(handlers::runs::events))
        .with_state(state.clone());

    let webhook_router = Router::new()
        .route("/webhook/:path", post(handlers::webhooks::handle_webhook))
        .with_state(state);

    let ws_router = Router::new()
        .route("/ws/executor", get(gateway::ws::ws_executor))
        .route("/ws", get(gateway::ws::ws_executor))
        .with_state(gateway.clone());

    let app = Router::new()
        .nest("/api/v1", api_router)
        .merge(webhook_router)
        .merge(gateway::http::router(gateway))
        .merge(ws_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
