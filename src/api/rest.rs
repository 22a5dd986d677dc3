//! HTTP router.

use std::sync::Arc;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{
    health_handler, metrics_handler, search_handler, search_method_not_allowed, stats_handler,
    ApiState,
};
use crate::config::ServerConfig;
use crate::search::SearchPipeline;

/// Create the HTTP router.
///
/// Endpoints:
/// - POST /search   - Run a search
/// - GET  /health   - Health and registered backends
/// - GET  /metrics  - Prometheus metrics
/// - GET  /stats    - Metrics summary as JSON
pub fn create_router(pipeline: Arc<SearchPipeline>, config: &ServerConfig) -> Router {
    let state = Arc::new(ApiState::new(pipeline));

    let router = Router::new()
        .route(
            "/search",
            post(search_handler).get(search_method_not_allowed),
        )
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_origin(Any);

        router.layer(cors)
    } else {
        router
    }
}

/// Bind `host:port` and serve until ctrl-c.
pub async fn serve(pipeline: Arc<SearchPipeline>, config: &ServerConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, create_router(pipeline, config))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
}
