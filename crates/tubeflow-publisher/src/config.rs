//! Publisher configuration.

use std::time::Duration;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_YOUTUBE_BASE: &str = "https://www.googleapis.com";

/// Resumable upload chunks must be a multiple of this.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
    /// Data API root (`/youtube/v3/...`)
    pub api_base: String,
    /// Media upload root (`/upload/youtube/v3/...`)
    pub upload_base: String,
    /// Refresh when the access token has less than this left
    pub refresh_margin: Duration,
    pub chunk_size: usize,
    /// Attempts per chunk after the first failure
    pub chunk_retries: u32,
    /// First backoff delay between chunk retries; doubles each time
    pub retry_base_delay: Duration,
    pub oauth_timeout: Duration,
    pub chunk_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            api_base: DEFAULT_YOUTUBE_BASE.to_string(),
            upload_base: DEFAULT_YOUTUBE_BASE.to_string(),
            refresh_margin: Duration::from_secs(300),
            chunk_size: 8 * 1024 * 1024,
            chunk_retries: 5,
            retry_base_delay: Duration::from_secs(1),
            oauth_timeout: Duration::from_secs(20),
            chunk_timeout: Duration::from_secs(300),
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl PublisherConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let chunk_size = std::env::var("UPLOAD_CHUNK_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.chunk_size);

        Self {
            client_id: env_or("GOOGLE_CLIENT_ID", defaults.client_id),
            client_secret: env_or("GOOGLE_CLIENT_SECRET", defaults.client_secret),
            token_uri: env_or("GOOGLE_TOKEN_URI", defaults.token_uri),
            api_base: env_or("YOUTUBE_API_BASE", defaults.api_base),
            upload_base: env_or("YOUTUBE_UPLOAD_BASE", defaults.upload_base),
            refresh_margin: env_secs("TOKEN_REFRESH_MARGIN_SECS", defaults.refresh_margin),
            chunk_size: align_chunk_size(chunk_size),
            chunk_retries: std::env::var("UPLOAD_CHUNK_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.chunk_retries),
            oauth_timeout: env_secs("OAUTH_TIMEOUT_SECS", defaults.oauth_timeout),
            chunk_timeout: env_secs("UPLOAD_CHUNK_TIMEOUT_SECS", defaults.chunk_timeout),
            ..defaults
        }
    }
}

/// Round down to the upload granularity, never below one unit.
pub fn align_chunk_size(bytes: usize) -> usize {
    (bytes / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY
}
