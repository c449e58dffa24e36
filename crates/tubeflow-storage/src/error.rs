//! Media store errors.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Media store misconfigured: {0}")]
    ConfigError(String),

    /// Nothing stored under the video's key (never processed, or reaped).
    #[error("No stored media for video {0}")]
    NotFound(String),

    #[error("Failed to store media: {0}")]
    UploadFailed(String),

    #[error("Failed to retrieve media: {0}")]
    DownloadFailed(String),

    #[error("Failed to delete media: {0}")]
    DeleteFailed(String),

    /// Video id that cannot be used as a path segment or object key.
    #[error("Invalid media key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object store reported an error outside the cases above.
    #[error("Object store error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(video_id: impl Into<String>) -> Self {
        Self::NotFound(video_id.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
