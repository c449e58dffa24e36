//! YouTube publishing.
//!
//! Owns the OAuth credential lifecycle (code exchange, single-flight refresh
//! with a safety margin) and the resumable chunked upload, plus thumbnail
//! and playlist follow-ups.

pub mod config;
pub mod error;
pub mod metrics;
pub mod oauth;
pub mod tokens;
pub mod youtube;

pub use config::PublisherConfig;
pub use error::{PublishError, PublishResult};
pub use oauth::{GoogleOAuthClient, TokenGrant, TokenRefresher};
pub use tokens::TokenManager;
pub use youtube::{VideoPlatform, YouTubeClient};
