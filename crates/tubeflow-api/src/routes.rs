//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    api_key_status, cancel_cleanup, delete_api_key, exchange_code, generate_content, get_content, get_video, health,
    process_video, publish_video, ready, schedule_cleanup, set_api_key, store_token, submit_url, token_status,
    upload_video,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, request_logging, security_headers, RateLimiterCache};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    // Uploads stream to disk and carry their own, larger cap
    let upload_routes = Router::new()
        .route("/videos/upload", post(upload_video))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_upload_size));

    let video_routes = Router::new()
        .route("/videos", post(submit_url))
        .route("/videos/:video_id", get(get_video))
        .route("/videos/:video_id/process", post(process_video))
        .route("/videos/:video_id/content", get(get_content).post(generate_content))
        .route("/videos/:video_id/publish", post(publish_video))
        .route("/videos/:video_id/cleanup", put(schedule_cleanup).delete(cancel_cleanup));

    // Generation is bounded by the AI client's own timeout instead
    let account_routes = Router::new()
        .route("/youtube/token", get(token_status).put(store_token))
        .route("/youtube/oauth/exchange", post(exchange_code))
        .route("/gemini/key", get(api_key_status).put(set_api_key).delete(delete_api_key))
        .layer(TimeoutLayer::new(state.config.request_timeout));

    let rate_limiter = Arc::new(RateLimiterCache::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    let api_routes = Router::new()
        .merge(video_routes)
        .merge(account_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .merge(upload_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
