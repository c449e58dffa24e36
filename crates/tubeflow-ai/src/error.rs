//! Error types for AI service calls.

use std::time::Duration;

use thiserror::Error;

pub type AiResult<T> = Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected before sending; the service is never called.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limited by AI service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("AI quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("AI request timed out")]
    Timeout,

    #[error("AI service error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("AI request rejected {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unusable AI response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AiError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 if is_hard_quota(&message) => Self::QuotaExhausted(message),
            429 => Self::RateLimited { retry_after },
            402 => Self::QuotaExhausted(message),
            408 => Self::Timeout,
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Network trouble, timeouts, rate limits and 5xx responses; another
    /// attempt may succeed. Bad input and exhausted quota never will.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::RateLimited { .. } | AiError::Timeout | AiError::Server { .. } => true,
            AiError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Daily or billing quota, as opposed to a per-minute rate limit.
fn is_hard_quota(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("per day") || lower.contains("billing") || lower.contains("quota exceeded for quota metric")
}
