//! HTTP API for health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use hostwatch_lib::{
    ComponentStatus, HealthRegistry, HealthResponse, MonitorHandle, MonitorStatus,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub monitor: MonitorHandle,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, monitor: MonitorHandle) -> Self {
        Self {
            health_registry,
            monitor,
        }
    }
}

#[derive(Serialize)]
struct HealthBody {
    #[serde(flatten)]
    health: HealthResponse,
    monitor: MonitorStatus,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy or the loop failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let monitor = state.monitor.status();

    let status_code = match (&health.status, &monitor) {
        (_, MonitorStatus::Failed { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        (ComponentStatus::Unhealthy, _) => StatusCode::SERVICE_UNAVAILABLE,
        // Degraded is still operational
        _ => StatusCode::OK,
    };

    (status_code, Json(HealthBody { health, monitor }))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
