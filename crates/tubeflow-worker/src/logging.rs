//! Structured step logging.
//!
//! Every pipeline step gets a [`JobLogger`] carrying the video id and
//! operation name so start, progress and outcome lines can be correlated.

use std::time::Instant;

use tracing::{error, info, warn, Span};
use tubeflow_models::VideoId;

/// Step logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    video_id: String,
    operation: &'static str,
    started: Instant,
}

impl JobLogger {
    /// Create a logger for `operation` on a video.
    pub fn new(video_id: &VideoId, operation: &'static str) -> Self {
        Self {
            video_id: video_id.to_string(),
            operation,
            started: Instant::now(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = self.operation,
            "Step started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms(),
            "Step progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms(),
            "Step warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            operation = self.operation,
            duration_ms = self.elapsed_ms(),
            "Step failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = self.operation,
            duration_ms = self.elapsed_ms(),
            "Step completed: {}", message
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Span to instrument the step's future with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("step", video_id = %self.video_id, operation = self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let id = VideoId::from_string("vid-123");
        let logger = JobLogger::new(&id, "process");

        assert_eq!(logger.video_id(), "vid-123");
        assert_eq!(logger.operation(), "process");
        assert!(logger.elapsed_ms() < 60_000);
    }
}
