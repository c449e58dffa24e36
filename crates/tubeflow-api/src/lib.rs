//! Axum HTTP API server.
//!
//! This crate provides:
//! - Video ingest, processing, generation, publish and cleanup endpoints
//! - Firebase ID token (or shared-secret JWT) verification
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
