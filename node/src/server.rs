//! # Health & Metrics HTTP
//!
//! Two read-only routes for operators and scrapers:
//!
//! | Method | Path       | Description                                   |
//! |--------|------------|-----------------------------------------------|
//! | GET    | `/health`  | Connection state; 503 when the default is down |
//! | GET    | `/metrics` | Prometheus text exposition                    |

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use certa_protocol::ConnectionManager;

use crate::metrics::{metrics_handler, GatewayMetrics};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub metrics: Arc<GatewayMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub connected: bool,
    pub default_connection_up: bool,
    pub cached_connections: usize,
    pub connections_evicted: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let manager = &state.manager;
    let up = manager.default_connection_up();
    let report = HealthReport {
        status: if up { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        connected: manager.is_connected(),
        default_connection_up: up,
        cached_connections: manager.cached_connections(),
        connections_evicted: manager.connections_evicted(),
    };
    let code = if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}
