//! Worker error types.

use thiserror::Error;
use tubeflow_ai::AiError;
use tubeflow_media::MediaError;
use tubeflow_models::{ErrorKind, VideoId};
use tubeflow_publisher::PublishError;
use tubeflow_state::StateError;
use tubeflow_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The video has no stored media to work with (never processed or reaped).
    #[error("Video {0} has no stored media")]
    MediaMissing(VideoId),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation failed: {0}")]
    Generation(#[from] AiError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned step panicked or was aborted before reporting back.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// The step was invoked against a video in the wrong status.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkerError::State(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::State(e) if e.is_not_found())
    }

    /// The user must re-authorize the external platform before publishing again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, WorkerError::Publish(e) if e.requires_reauthorization())
    }

    /// Place in the failure taxonomy, when the error belongs to a pipeline stage.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            WorkerError::State(e) if e.is_conflict() => Some(ErrorKind::Conflict),
            WorkerError::Media(e) => Some(e.error_kind()),
            WorkerError::Generation(_) => Some(ErrorKind::GenerationFailed),
            WorkerError::Publish(e) => Some(e.error_kind()),
            WorkerError::MediaMissing(_) => Some(ErrorKind::UploadFailed),
            WorkerError::Io(_) => Some(ErrorKind::IngestFailed),
            _ => None,
        }
    }
}
