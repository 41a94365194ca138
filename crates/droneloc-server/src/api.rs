//! REST and WebSocket API of the fusion server.
//!
//! ## Endpoints
//!
//! - `GET /health` - liveness, uptime and cycle counters
//! - `GET /api/v1/state` - latest fusion estimate
//! - `GET /api/v1/nodes` - per-node health and ingestion counters
//! - `GET /api/v1/config` - node placements and search volume
//! - `WS /ws/fusion` - every fusion estimate as it is produced

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::FusionService;

/// Idle interval after which a WebSocket client is pinged.
const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Build the HTTP router.
pub fn create_router(service: FusionService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/state", get(state))
        .route("/api/v1/nodes", get(nodes))
        .route("/api/v1/config", get(config))
        .route("/ws/fusion", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health(State(service): State<FusionService>) -> Json<serde_json::Value> {
    let now = Utc::now();
    let summaries = service.table().summaries(now);
    let online = summaries.iter().filter(|s| s.online).count();
    let (cycles, fixes) = service.cycle_counts();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": (now - service.started_at()).num_seconds(),
        "nodes_configured": summaries.len(),
        "nodes_online": online,
        "cycles": cycles,
        "fixes": fixes,
        "receiver": service.receiver_stats().snapshot(),
        "unknown_node_frames": service.table().unknown_rejected(),
    }))
}

async fn state(State(service): State<FusionService>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(service.latest()).unwrap_or_default())
}

async fn nodes(State(service): State<FusionService>) -> Json<serde_json::Value> {
    let summaries = service.table().summaries(Utc::now());
    Json(serde_json::json!({ "nodes": summaries }))
}

async fn config(State(service): State<FusionService>) -> Json<serde_json::Value> {
    let cfg = service.config();
    Json(serde_json::json!({
        "nodes": cfg.nodes,
        "bounds": cfg.solver.bounds,
        "step": cfg.solver.step,
        "localization_rate_hz": cfg.localization_rate_hz,
    }))
}

#[tracing::instrument(skip_all)]
async fn ws_handler(State(service): State<FusionService>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn handle_socket(socket: WebSocket, service: FusionService) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = service.subscribe();
    tracing::info!("WebSocket client connected");

    let forward_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = rx.recv() => match result {
                    Ok(estimate) => {
                        let Ok(json) = serde_json::to_string(&estimate) else { continue };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "WebSocket client lagged, estimates dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(WS_PING_INTERVAL) => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Close(_) => break,
            // Clients only listen.
            other => tracing::trace!(?other, "ignoring client message"),
        }
    }

    forward_task.abort();
    tracing::info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use droneloc_core::config::ServerConfig;

    fn service() -> FusionService {
        FusionService::new(ServerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_nodes() {
        let Json(body) = health(State(service())).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["nodes_configured"], 3);
        assert_eq!(body["nodes_online"], 0);
    }

    #[tokio::test]
    async fn state_serves_latest_estimate() {
        let svc = service();
        svc.run_cycle_at(Utc::now());
        let Json(body) = state(State(svc)).await;
        assert_eq!(body["present"], false);
        assert!(body["no_fix"].is_object() || body["no_fix"].is_string());
        assert_eq!(body["per_node_detail"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn nodes_lists_every_configured_node() {
        let Json(body) = nodes(State(service())).await;
        let list = body["nodes"].as_array().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0]["node_id"], 1);
        assert_eq!(list[0]["online"], false);
    }

    #[tokio::test]
    async fn config_exposes_bounds() {
        let Json(body) = config(State(service())).await;
        assert_eq!(body["bounds"]["x"][0], -5.0);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn router_builds() {
        let _ = create_router(service());
    }
}
