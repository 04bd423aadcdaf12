//! Operator HTTP surface.
//!
//! Endpoint queries are answered by the control loop through the work queue,
//! so this module never touches the registry directly.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::Metrics;
use crate::monitor::{LoopState, LoopStatus};
use crate::queue::QueueHandle;
use crate::shutdown::StopSignal;

/// Shared state for the operator handlers.
#[derive(Clone)]
pub struct AppState {
    /// Work queue into the control loop.
    pub queue: QueueHandle,
    /// Metrics to expose.
    pub metrics: Metrics,
    /// Control loop lifetime state.
    pub status: LoopStatus,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Query parameters for endpoint listing.
#[derive(Debug, Default, Deserialize)]
pub struct EndpointQuery {
    /// Query expression, `all` when absent.
    pub filter: Option<String>,
}

/// Build the operator router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/v1/endpoints", get(list_endpoints))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the operator API until `stop` is set.
///
/// # Errors
///
/// Returns an I/O error if the listener cannot be bound.
pub async fn serve(listen_addr: &str, state: AppState, stop: StopSignal) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Operator API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { stop.wait().await })
        .await?;
    Ok(())
}

/// Liveness handler.
pub async fn health() -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness handler: 200 while the control loop is running.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.status.get() {
        LoopState::Running => (StatusCode::OK, "ready"),
        LoopState::Draining | LoopState::Stopped => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

/// List endpoints matching `?filter=`.
///
/// ```text
/// GET /v1/endpoints?filter=state%20mirroring
/// ```
pub async fn list_endpoints(
    State(state): State<AppState>,
    Query(params): Query<EndpointQuery>,
) -> Response {
    let filter = params.filter.unwrap_or_else(|| "all".to_string());
    match state.queue.query(filter).await {
        Ok(endpoints) => (StatusCode::OK, Json(endpoints)).into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(e.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                tracing::error!(error = %e, "Endpoint query failed");
            }
            (status, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
    }
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response()
        }
    }
}
