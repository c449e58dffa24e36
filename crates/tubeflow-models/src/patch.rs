//! Field changes applied atomically with a status transition.

use chrono::{DateTime, Utc};

use crate::content::{ContentKind, GenerationEntry};
use crate::failure::ErrorDetail;
use crate::publish::PublishTarget;
use crate::transcript::TranscriptSegment;

/// Bookkeeping for overlapping generate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationChange {
    Begin,
    End,
}

/// Field updates carried by a transition.
///
/// Nested options distinguish "leave as is" (`None`) from "clear"
/// (`Some(None)`). Build with the chained setters.
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub error_detail: Option<ErrorDetail>,
    pub last_step_error: Option<Option<ErrorDetail>>,
    pub staged_path: Option<Option<String>>,
    pub file_path: Option<Option<String>>,
    pub file_size: Option<Option<u64>>,
    pub duration_seconds: Option<f64>,
    pub transcript: Option<Vec<TranscriptSegment>>,
    pub publish_target: Option<PublishTarget>,
    pub cleanup_deadline: Option<Option<DateTime<Utc>>>,
    pub append_content: Vec<(ContentKind, GenerationEntry)>,
    pub generation: Option<GenerationChange>,
}

impl VideoPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(mut self, detail: ErrorDetail) -> Self {
        self.error_detail = Some(detail);
        self
    }

    pub fn step_error(mut self, detail: ErrorDetail) -> Self {
        self.last_step_error = Some(Some(detail));
        self
    }

    pub fn clear_step_error(mut self) -> Self {
        self.last_step_error = Some(None);
        self
    }

    pub fn staged_path(mut self, path: impl Into<String>) -> Self {
        self.staged_path = Some(Some(path.into()));
        self
    }

    pub fn clear_staged_path(mut self) -> Self {
        self.staged_path = Some(None);
        self
    }

    /// Record the stored media location and its size.
    pub fn stored_file(mut self, path: impl Into<String>, size: u64) -> Self {
        self.file_path = Some(Some(path.into()));
        self.file_size = Some(Some(size));
        self
    }

    /// Drop the payload reference after the media was reaped.
    pub fn clear_file(mut self) -> Self {
        self.file_path = Some(None);
        self.file_size = Some(None);
        self
    }

    pub fn duration_seconds(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn transcript(mut self, segments: Vec<TranscriptSegment>) -> Self {
        self.transcript = Some(segments);
        self
    }

    pub fn publish_target(mut self, target: PublishTarget) -> Self {
        self.publish_target = Some(target);
        self
    }

    pub fn cleanup_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.cleanup_deadline = Some(deadline);
        self
    }

    pub fn append_content(mut self, kind: ContentKind, entry: GenerationEntry) -> Self {
        self.append_content.push((kind, entry));
        self
    }

    pub fn begin_generation(mut self) -> Self {
        self.generation = Some(GenerationChange::Begin);
        self
    }

    pub fn end_generation(mut self) -> Self {
        self.generation = Some(GenerationChange::End);
        self
    }
}
