//! # Prometheus Metrics
//!
//! Gateway health as Prometheus series, scraped at `/metrics`. Values are
//! read from the [`ConnectionManager`] at scrape time, so nothing in the
//! protocol crate has to know about Prometheus.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use certa_protocol::ConnectionManager;

use crate::server::AppState;

/// Metric handles, registered in a private registry under the `certa` prefix.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Per-user connections currently cached.
    pub cached_connections: IntGauge,
    /// Connections closed by idle or capacity eviction since startup.
    pub connections_evicted_total: IntCounter,
    /// 1 while the operator's default connection is open.
    pub default_connection_up: IntGauge,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("certa".into()), None)?;

        let cached_connections =
            IntGauge::new("cached_connections", "Per-user ledger connections currently cached")?;
        registry.register(Box::new(cached_connections.clone()))?;

        let connections_evicted_total = IntCounter::new(
            "connections_evicted_total",
            "Cached connections closed by idle or capacity eviction",
        )?;
        registry.register(Box::new(connections_evicted_total.clone()))?;

        let default_connection_up = IntGauge::new(
            "default_connection_up",
            "Whether the operator's default ledger connection is open",
        )?;
        registry.register(Box::new(default_connection_up.clone()))?;

        Ok(Self {
            registry,
            cached_connections,
            connections_evicted_total,
            default_connection_up,
        })
    }

    /// Copies the manager's current counters into the metric handles.
    pub fn observe(&self, manager: &ConnectionManager) {
        self.cached_connections.set(manager.cached_connections() as i64);
        self.default_connection_up
            .set(i64::from(manager.default_connection_up()));

        // The manager keeps a running total; the counter only moves forward.
        let total = manager.connections_evicted();
        let seen = self.connections_evicted_total.get();
        if total > seen {
            self.connections_evicted_total.inc_by(total - seen);
        }
    }

    /// Renders all series in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// `GET /metrics`.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.observe(&state.manager);
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
