/*
 * Routes module aggregator organizing the HTTP endpoints with a consistent
 * middleware stack: CORS, compression, timeout, body limit, and tracing.
 * I'm implementing clean route organization that enables easy expansion while
 * maintaining performance and security standards.
 */

pub mod books;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::AppState;

/// Create the application router with all endpoints and middleware
/// I'm implementing a comprehensive routing structure with performance
/// optimization and security
pub fn create_router() -> Router<AppState> {
    info!("Creating application router");

    Router::new()
        // Health and monitoring endpoints
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(prometheus_metrics))
        // Book search and ingestion endpoints
        .route("/books/search", get(books::search_books))
        .route("/books/from-search", post(books::add_from_search))
        .route("/books/hydrate/:provider/:id", get(books::hydrate_result))
        // Fallback handler for undefined routes
        .fallback(handle_404)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(DefaultBodyLimit::max(2 * 1024 * 1024)),
        )
}

/// Create CORS layer with appropriate configuration
/// I'm implementing flexible CORS that supports development while staying
/// restrictable in production
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-reader-id"),
        ])
        .allow_origin(Any)
        .max_age(Duration::from_secs(3600))
}

/// Prometheus metrics endpoint
/// I'm providing metrics in Prometheus format for monitoring integration
async fn prometheus_metrics(
    axum::extract::State(app_state): axum::extract::State<AppState>,
) -> String {
    app_state.metrics.prometheus_text()
}

/// Custom error handler for route-level errors
/// I'm implementing consistent 404 responses across all endpoints
pub async fn handle_404() -> axum::response::Response {
    let error_response = serde_json::json!({
        "error": {
            "code": "NOT_FOUND",
            "message": "The requested endpoint does not exist",
            "timestamp": chrono::Utc::now(),
            "available_endpoints": [
                "/health",
                "/books/search",
                "/books/from-search",
                "/metrics"
            ]
        }
    });

    (axum::http::StatusCode::NOT_FOUND, axum::Json(error_response)).into_response()
}
