//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::{ErrorKind, TributaryError};
use crate::metrics::{get_metrics, HealthState, HealthStatus, MetricsSnapshot};
use crate::search::{SearchPipeline, SearchRequest};

/// Application state shared across handlers.
pub struct ApiState {
    /// Pipeline serving search requests.
    pub pipeline: Arc<SearchPipeline>,
}

impl ApiState {
    /// Create new API state.
    pub fn new(pipeline: Arc<SearchPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind,
            status: kind.status_code(),
        }
    }
}

impl From<&TributaryError> for ErrorResponse {
    fn from(err: &TributaryError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Map a body extraction failure to the request boundary.
fn rejection_response(rejection: JsonRejection) -> ErrorResponse {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => ErrorResponse::new(
            ErrorKind::UnsupportedMediaType,
            "Content-Type must be application/json",
        ),
        other => ErrorResponse::new(ErrorKind::InvalidQuery, other.body_text()),
    }
}

/// `POST /search`
pub async fn search_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(rejection).into_response(),
    };

    match state.pipeline.search(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => ErrorResponse::from(&e).into_response(),
    }
}

/// `GET /search`
pub async fn search_method_not_allowed() -> Response {
    ErrorResponse::new(
        ErrorKind::MethodNotAllowed,
        "This endpoint only supports POST requests",
    )
    .into_response()
}

/// `GET /health`
pub async fn health_handler(State(state): State<Arc<ApiState>>) -> Response {
    let backends = state.pipeline.backend_names();
    let health = if backends.is_empty() {
        HealthState::Unhealthy
    } else {
        HealthState::Healthy
    };
    let body = HealthStatus {
        status: health,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: get_metrics().uptime().as_secs(),
        backends,
    };
    let status = StatusCode::from_u16(health.to_status_code()).unwrap_or(StatusCode::OK);
    (status, Json(body)).into_response()
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        get_metrics().export_prometheus(),
    )
}

/// `GET /stats`
pub async fn stats_handler() -> Json<MetricsSnapshot> {
    Json(get_metrics().export_json())
}
