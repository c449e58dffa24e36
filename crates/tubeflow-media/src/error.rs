//! Error types for media operations.

use std::path::PathBuf;

use thiserror::Error;
use tubeflow_models::ErrorKind;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// stderr fragments that indicate the host ran out of something, not that the input is bad.
const RESOURCE_EXHAUSTION_MARKERS: &[&str] = &[
    "Cannot allocate memory",
    "No space left on device",
    "Resource temporarily unavailable",
    "Too many open files",
    "Killed",
];

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Source exceeds the {limit_bytes} byte download limit")]
    SourceTooLarge { limit_bytes: u64 },

    #[error("Download did not finish within {0} seconds")]
    DownloadTimeout(u64),

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn transcription_failed(message: impl Into<String>) -> Self {
        Self::TranscriptionFailed(message.into())
    }

    pub fn unsupported_source(message: impl Into<String>) -> Self {
        Self::UnsupportedSource(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether trying again may succeed.
    ///
    /// Timeouts and host resource exhaustion are transient; corrupt input,
    /// missing tools and failed transcription are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MediaError::Timeout(_) | MediaError::ResourceLimit(_) | MediaError::Io(_) => true,
            MediaError::FfmpegFailed { stderr, exit_code, .. } => {
                // No exit code means the process was killed by a signal (OOM killer).
                exit_code.is_none()
                    || stderr
                        .as_deref()
                        .is_some_and(|s| RESOURCE_EXHAUSTION_MARKERS.iter().any(|m| s.contains(m)))
            }
            MediaError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Map onto the persisted failure taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            MediaError::TranscriptionFailed(_) => ErrorKind::TranscriptionFailed,
            MediaError::UnsupportedSource(_) => ErrorKind::UnsupportedSource,
            MediaError::SourceTooLarge { .. } => ErrorKind::SourceTooLarge,
            MediaError::DownloadTimeout(_) => ErrorKind::DownloadTimeout,
            MediaError::DownloadFailed { .. } | MediaError::YtDlpNotFound | MediaError::Http(_) => {
                ErrorKind::IngestFailed
            }
            _ => ErrorKind::TranscodeFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhaustion_is_retryable() {
        let oom = MediaError::ffmpeg_failed("exit", Some("x264 [error]: Cannot allocate memory".into()), Some(1));
        assert!(oom.is_retryable());

        let killed = MediaError::ffmpeg_failed("exit", None, None);
        assert!(killed.is_retryable());

        let corrupt = MediaError::ffmpeg_failed("exit", Some("moov atom not found".into()), Some(1));
        assert!(!corrupt.is_retryable());
    }

    #[test]
    fn test_transcription_failure_is_terminal() {
        let err = MediaError::transcription_failed("no speech detected");
        assert!(!err.is_retryable());
        assert_eq!(err.error_kind(), ErrorKind::TranscriptionFailed);
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(MediaError::Timeout(30).error_kind(), ErrorKind::TranscodeFailed);
        assert_eq!(MediaError::DownloadTimeout(30).error_kind(), ErrorKind::DownloadTimeout);
        assert_eq!(
            MediaError::SourceTooLarge { limit_bytes: 10 }.error_kind(),
            ErrorKind::SourceTooLarge
        );
    }
}
