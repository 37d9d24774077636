//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::handlers::AppState;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded"
    #[schema(example = "healthy")]
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    /// Whether the storage backend answered the probe
    pub backend_available: bool,
    /// Service name
    pub service: &'static str,
}

/// GET /health - Health check endpoint
///
/// Returns JSON with service status, version, and backend availability.
/// Used for monitoring and load balancer health checks.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health report", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend_available = state.service.discovery().await.is_ok();

    let status = if backend_available {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        backend_available,
        service: "ducat-server",
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// GET /ready - Kubernetes readiness probe
///
/// Returns 200 once the storage backend answers, 503 until then. Unlike
/// /health, this gates traffic.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Storage backend is unreachable", body = ReadyResponse)
    )
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    match state.service.discovery().await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some("storage backend is unreachable"),
            }),
        ),
    }
}
