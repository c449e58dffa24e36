//! Publish-stage errors.

use thiserror::Error;
use tubeflow_models::ErrorKind;
use tubeflow_state::StateError;

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No YouTube credential stored for user {0}")]
    TokenMissing(String),

    /// The credential could not be renewed. `revoked` means the refresh
    /// token itself was rejected and only a new consent will help.
    #[error("Token refresh failed: {message}")]
    TokenRefreshFailed { message: String, revoked: bool },

    /// Quota, permission or request errors the platform will not accept on retry.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// 5xx, timeouts and dropped connections; safe to retry.
    #[error("Platform temporarily unavailable ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token store error: {0}")]
    State(#[from] StateError),
}

impl PublishError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn refresh_failed(msg: impl Into<String>, revoked: bool) -> Self {
        Self::TokenRefreshFailed {
            message: msg.into(),
            revoked,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::Transient { .. } => true,
            PublishError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }

    /// The user has to connect their channel again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            PublishError::TokenMissing(_) | PublishError::TokenRefreshFailed { revoked: true, .. }
        )
    }

    /// Map onto the persisted failure taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            PublishError::TokenMissing(_) | PublishError::TokenRefreshFailed { .. } => ErrorKind::TokenRefreshFailed,
            _ => ErrorKind::UploadFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_credential_failures_prompt_reauthorization() {
        assert!(PublishError::TokenMissing("u".into()).requires_reauthorization());
        assert!(PublishError::refresh_failed("invalid_grant", true).requires_reauthorization());
        assert!(!PublishError::refresh_failed("timeout", false).requires_reauthorization());
        assert!(!PublishError::upload_failed("quotaExceeded").requires_reauthorization());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PublishError::refresh_failed("x", false).error_kind(),
            ErrorKind::TokenRefreshFailed
        );
        assert_eq!(PublishError::upload_failed("x").error_kind(), ErrorKind::UploadFailed);
        assert!(PublishError::Transient {
            status: 503,
            message: String::new()
        }
        .is_transient());
    }
}
