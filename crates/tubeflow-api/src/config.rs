//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size for JSON routes
    pub max_body_size: usize,
    /// Max multipart upload size
    pub max_upload_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// HS256 secret for shared-secret bearer tokens
    pub auth_jwt_secret: Option<String>,
    /// Firebase project whose ID tokens are accepted
    pub firebase_project_id: Option<String>,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,        // 10MB
            max_upload_size: 2 * 1024 * 1024 * 1024, // 2GB
            environment: "development".to_string(),
            auth_jwt_secret: None,
            firebase_project_id: None,
            metrics_enabled: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_non_empty("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse::<u32>("RATE_LIMIT_RPS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: env_parse::<u32>("RATE_LIMIT_BURST")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.rate_limit_burst),
            request_timeout: env_parse("REQUEST_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            max_upload_size: env_parse("MAX_UPLOAD_SIZE").unwrap_or(defaults.max_upload_size),
            environment: env_non_empty("ENVIRONMENT").unwrap_or(defaults.environment),
            auth_jwt_secret: env_non_empty("AUTH_JWT_SECRET"),
            firebase_project_id: env_non_empty("FIREBASE_PROJECT_ID").or_else(|| env_non_empty("GCP_PROJECT_ID")),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
