//! Executor-facing WebSocket endpoints: `/ws/executor` (v2) and `/ws`
//! (legacy) — both run the same frame handling, mirroring the streaming
//! pattern used elsewhere in the codebase (split socket, forward a channel
//! to the sink, read frames into a dispatch match).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::verify_token;
use crate::dispatcher::Gateway;
use crate::registry::Connection;
use crate::types::{ExecutorFrame, GatewayFrame, Pool};

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub organization_id: Option<Uuid>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

pub async fn ws_executor(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let token = token.to_string();
    ws.on_upgrade(move |socket| handle_executor_socket(socket, gateway, token, query.organization_id))
}

async fn handle_executor_socket(socket: WebSocket, gateway: Arc<Gateway>, token: String, claimed_org: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();

    // The first frame must be `hello`; it identifies which executor row this
    // connection authenticates as, so we look it up by scanning the
    // candidate set rather than trusting a bare executor id on the wire.
    let Some(Ok(Message::Text(first))) = receiver.next().await else {
        return;
    };
    let Ok(ExecutorFrame::Hello { name, capabilities, .. } | ExecutorFrame::ExecutorHelloV2 { name, capabilities, .. }) =
        serde_json::from_str::<ExecutorFrame>(&first)
    else {
        warn!("executor socket sent a non-hello first frame");
        return;
    };

    let Some(executor_row) = resolve_executor(&gateway, &token, claimed_org).await else {
        let _ = sender.send(Message::Text(serde_json::json!({"error": "unauthorized"}).to_string())).await;
        return;
    };

    let pool = if executor_row.pool == "byon" { Pool::Byon } else { Pool::Managed };
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewayFrame>();

    gateway.registry().register(Connection {
        executor_id: executor_row.id,
        organization_id: executor_row.organization_id,
        pool,
        name: name.clone(),
        labels: capabilities.tags.clone(),
        kinds: capabilities.kinds.clone(),
        connectors: capabilities.connectors.clone(),
        max_in_flight: capabilities.max_in_flight.unwrap_or(executor_row.max_in_flight),
        in_flight: std::sync::atomic::AtomicI32::new(0),
        revoked: std::sync::atomic::AtomicBool::new(executor_row.revoked),
        sender: tx,
    });
    info!(executor_id = %executor_row.id, %name, "executor connected");

    let outgoing = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else { continue };
        match serde_json::from_str::<ExecutorFrame>(&text) {
            Ok(ExecutorFrame::Ping { .. }) => {}
            Ok(ExecutorFrame::ExecuteResult { request_id, status, output, error }) => {
                if let Err(err) = gateway.handle_execute_result(request_id, status, output, error).await {
                    warn!(%request_id, %err, "failed to apply execute_result");
                }
                if let Some(conn) = gateway.registry().get(executor_row.id) {
                    let _ = conn.sender.send(GatewayFrame::ExecuteAck { request_id });
                }
            }
            Ok(ExecutorFrame::ExecuteEvent { request_id: _, event }) => {
                if let Err(err) = gateway.handle_execute_event(event).await {
                    warn!(%err, "failed to forward execute_event");
                }
            }
            Ok(ExecutorFrame::Hello { .. }) | Ok(ExecutorFrame::ExecutorHelloV2 { .. }) => {
                warn!(executor_id = %executor_row.id, "duplicate hello frame ignored");
            }
            Err(err) => warn!(%err, "unparseable executor frame"),
        }
    }

    outgoing.abort();
    gateway.registry().unregister(executor_row.id);
    info!(executor_id = %executor_row.id, "executor disconnected");
}

struct ResolvedExecutor {
    id: Uuid,
    organization_id: Option<Uuid>,
    pool: String,
    max_in_flight: i32,
    revoked: bool,
}

/// Looks up the executor whose persisted token hash matches. Managed
/// executors are global; BYON executors additionally require the claimed
/// `organization_id` on the query string to match the row.
async fn resolve_executor(gateway: &Gateway, token: &str, claimed_org: Option<Uuid>) -> Option<ResolvedExecutor> {
    let org_scope = claimed_org.unwrap_or_else(Uuid::nil);
    let candidates = db::repository::executors::list_eligible(gateway.pool(), org_scope).await.ok()?;
    let row = candidates.into_iter().find(|row| !row.revoked && verify_token(token, &row.token_hash))?;
    Some(ResolvedExecutor { id: row.id, organization_id: row.organization_id, pool: row.pool, max_in_flight: row.max_in_flight, revoked: row.revoked })
}
