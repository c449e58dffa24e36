//! Machine-readable failure kinds persisted on a video.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by every pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    IngestFailed,
    UnsupportedSource,
    SourceTooLarge,
    DownloadTimeout,
    ProcessingFailed,
    TranscodeFailed,
    TranscriptionFailed,
    GenerationFailed,
    TokenRefreshFailed,
    UploadFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::IngestFailed => "ingest_failed",
            ErrorKind::UnsupportedSource => "unsupported_source",
            ErrorKind::SourceTooLarge => "source_too_large",
            ErrorKind::DownloadTimeout => "download_timeout",
            ErrorKind::ProcessingFailed => "processing_failed",
            ErrorKind::TranscodeFailed => "transcode_failed",
            ErrorKind::TranscriptionFailed => "transcription_failed",
            ErrorKind::GenerationFailed => "generation_failed",
            ErrorKind::TokenRefreshFailed => "token_refresh_failed",
            ErrorKind::UploadFailed => "upload_failed",
        }
    }

    /// The user has to re-authorize the external platform.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, ErrorKind::TokenRefreshFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Human-readable cause plus machine kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetail {
    pub kind: ErrorKind,

    /// Underlying stage failure when `kind` is a summary such as `processing_failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorKind>,

    pub message: String,

    pub occurred_at: DateTime<Utc>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            cause: None,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_cause(mut self, cause: ErrorKind) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Some(cause) => write!(f, "{} ({}): {}", self.kind, cause, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}
