//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tubeflow_models::ErrorKind;
use tubeflow_publisher::PublishError;
use tubeflow_state::StateError;
use tubeflow_worker::WorkerError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A pipeline step refused or failed; `kind` is reported as the code.
    #[error("{message}")]
    Pipeline {
        status: StatusCode,
        kind: ErrorKind,
        message: String,
    },
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn pipeline(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Pipeline {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Pipeline { status, .. } => *status,
        }
    }

    /// Machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::RateLimited => "rate_limited",
            ApiError::Internal(_) => "internal",
            ApiError::Validation(_) => "validation",
            ApiError::Pipeline { kind, .. } => kind.as_str(),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        if err.is_not_found() {
            return ApiError::not_found("Video not found");
        }
        if let WorkerError::InvalidRequest(msg) = &err {
            return ApiError::bad_request(msg.clone());
        }

        let message = err.to_string();
        let Some(kind) = err.error_kind() else {
            return ApiError::Internal(message);
        };

        let status = match kind {
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::UnsupportedSource => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::SourceTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::TokenRefreshFailed if err.requires_reauthorization() => StatusCode::FORBIDDEN,
            ErrorKind::UploadFailed if matches!(err, WorkerError::MediaMissing(_)) => StatusCode::GONE,
            ErrorKind::GenerationFailed | ErrorKind::TokenRefreshFailed | ErrorKind::UploadFailed => {
                StatusCode::BAD_GATEWAY
            }
            ErrorKind::DownloadTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::pipeline(status, kind, message)
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        WorkerError::from(err).into()
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        WorkerError::from(err).into()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status.is_server_error()
            && std::env::var("ENVIRONMENT").unwrap_or_default().to_lowercase() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use tubeflow_models::{VideoId, VideoStatus};

    use super::*;

    #[test]
    fn test_conflict_maps_to_409() {
        let err: ApiError =
            StateError::conflict(&VideoId::from("v1"), &[VideoStatus::Ready], VideoStatus::Processing).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err: ApiError = StateError::NotFound(VideoId::from("v1")).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_reauthorization_is_forbidden() {
        let err: ApiError = PublishError::TokenMissing("u1".into()).into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "token_refresh_failed");

        let err: ApiError = PublishError::refresh_failed("timeout", false).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_media_missing_is_gone() {
        let err: ApiError = WorkerError::MediaMissing(VideoId::from("v1")).into();
        assert_eq!(err.status_code(), StatusCode::GONE);
        assert_eq!(err.code(), "upload_failed");
    }

    #[test]
    fn test_unclassified_is_internal() {
        let err: ApiError = WorkerError::config_error("boom").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "internal");
    }
}
