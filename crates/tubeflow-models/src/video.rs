//! Video aggregate and lifecycle status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::content::{ContentKind, GenerationEntry};
use crate::failure::ErrorDetail;
use crate::patch::{GenerationChange, VideoPatch};
use crate::publish::PublishTarget;
use crate::transcript::TranscriptSegment;

/// Unique identifier for a video, assigned at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a video.
///
/// `Uploading`, `Downloading`, `Processing`, `Generating` and `Publishing` are
/// in-flight: work is executing against the video. `Ready`, `Published` and
/// `Error` are stable and the only states the cleanup sweep may reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Uploading,
    Downloading,
    Processing,
    Ready,
    Generating,
    Publishing,
    Published,
    Error,
}

impl VideoStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [VideoStatus; 8] = [
        VideoStatus::Uploading,
        VideoStatus::Downloading,
        VideoStatus::Processing,
        VideoStatus::Ready,
        VideoStatus::Generating,
        VideoStatus::Publishing,
        VideoStatus::Published,
        VideoStatus::Error,
    ];

    /// Statuses the cleanup sweep is allowed to reap.
    pub const STABLE: [VideoStatus; 3] = [VideoStatus::Ready, VideoStatus::Published, VideoStatus::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploading => "uploading",
            VideoStatus::Downloading => "downloading",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Generating => "generating",
            VideoStatus::Publishing => "publishing",
            VideoStatus::Published => "published",
            VideoStatus::Error => "error",
        }
    }

    /// Work is currently executing against the video.
    pub fn is_in_flight(&self) -> bool {
        !self.is_stable()
    }

    /// The video is at rest.
    pub fn is_stable(&self) -> bool {
        matches!(self, VideoStatus::Ready | VideoStatus::Published | VideoStatus::Error)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the media came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoSource {
    /// A file staged locally by the upload layer.
    UploadedFile { path: String, original_name: String },
    /// A remote URL to fetch.
    RemoteUrl { url: String },
}

impl VideoSource {
    pub fn uploaded(path: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self::UploadedFile {
            path: path.into(),
            original_name: original_name.into(),
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self::RemoteUrl { url: url.into() }
    }

    /// Status a freshly registered video starts in.
    pub fn initial_status(&self) -> VideoStatus {
        match self {
            VideoSource::UploadedFile { .. } => VideoStatus::Uploading,
            VideoSource::RemoteUrl { .. } => VideoStatus::Downloading,
        }
    }
}

/// Rejected attempt to mutate a video.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("transcript already set for video {0}")]
    TranscriptAlreadySet(VideoId),

    #[error("transition to error status requires an error detail")]
    MissingErrorDetail,

    #[error("generation bookkeeping requires status {expected}, got {actual}")]
    GenerationStatusMismatch {
        expected: VideoStatus,
        actual: VideoStatus,
    },
}

/// One user-submitted media asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    pub id: VideoId,

    /// Requesting user (opaque)
    pub owner_id: String,

    pub source: VideoSource,

    pub status: VideoStatus,

    /// Present only while `status` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,

    /// Last non-terminal failure of a generate or publish step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_step_error: Option<ErrorDetail>,

    /// Working copy awaiting processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_path: Option<String>,

    /// Media store location of the normalized file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    /// Derived from the normalized media, never user-supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TranscriptSegment>>,

    /// Generation history, oldest entry first per kind
    #[serde(default)]
    pub generated_content: BTreeMap<ContentKind, Vec<GenerationEntry>>,

    /// Number of generate calls currently holding the video in `Generating`
    #[serde(default)]
    pub active_generations: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_target: Option<PublishTarget>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_deadline: Option<DateTime<Utc>>,
}

impl Video {
    /// Create a new video record in the initial status for its source.
    pub fn new(owner_id: impl Into<String>, source: VideoSource) -> Self {
        let now = Utc::now();
        Self {
            id: VideoId::new(),
            owner_id: owner_id.into(),
            status: source.initial_status(),
            source,
            error_detail: None,
            last_step_error: None,
            staged_path: None,
            file_path: None,
            file_size: None,
            duration_seconds: None,
            transcript: None,
            generated_content: BTreeMap::new(),
            active_generations: 0,
            publish_target: None,
            created_at: now,
            updated_at: now,
            cleanup_deadline: None,
        }
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: VideoId) -> Self {
        self.id = id;
        self
    }

    /// Set the initial cleanup deadline.
    pub fn with_cleanup_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.cleanup_deadline = Some(deadline);
        self
    }

    /// Record an immediate failure before any work was started.
    pub fn failed(mut self, detail: ErrorDetail) -> Self {
        self.status = VideoStatus::Error;
        self.error_detail = Some(detail);
        self
    }

    /// Most recent generation entry of a kind.
    pub fn latest_content(&self, kind: ContentKind) -> Option<&GenerationEntry> {
        self.generated_content.get(&kind).and_then(|entries| entries.last())
    }

    /// Cleanup deadline has passed and the video is at rest.
    pub fn is_reapable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_stable() && self.cleanup_deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Apply a status transition and its accompanying field changes.
    ///
    /// The caller (a state store) has already checked the expected status set;
    /// this enforces the invariants that hold regardless of backend. On error
    /// `self` is left untouched.
    pub fn apply_transition(
        &mut self,
        new_status: VideoStatus,
        patch: VideoPatch,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if patch.transcript.is_some() && self.transcript.is_some() {
            return Err(TransitionError::TranscriptAlreadySet(self.id.clone()));
        }
        if new_status == VideoStatus::Error && patch.error_detail.is_none() && self.error_detail.is_none() {
            return Err(TransitionError::MissingErrorDetail);
        }

        let mut status = new_status;
        let mut active = self.active_generations;
        match patch.generation {
            Some(GenerationChange::Begin) => {
                if new_status != VideoStatus::Generating {
                    return Err(TransitionError::GenerationStatusMismatch {
                        expected: VideoStatus::Generating,
                        actual: new_status,
                    });
                }
                active += 1;
            }
            Some(GenerationChange::End) => {
                if self.status != VideoStatus::Generating {
                    return Err(TransitionError::GenerationStatusMismatch {
                        expected: VideoStatus::Generating,
                        actual: self.status,
                    });
                }
                active = active.saturating_sub(1);
                // Other generate calls still hold the video.
                if active > 0 && new_status == VideoStatus::Ready {
                    status = VideoStatus::Generating;
                }
            }
            None => {}
        }

        self.status = status;
        self.active_generations = if status == VideoStatus::Generating { active } else { 0 };

        if status == VideoStatus::Error {
            if let Some(detail) = patch.error_detail {
                self.error_detail = Some(detail);
            }
        } else {
            self.error_detail = None;
        }
        if let Some(step_error) = patch.last_step_error {
            self.last_step_error = step_error;
        }
        if let Some(staged) = patch.staged_path {
            self.staged_path = staged;
        }
        if let Some(file_path) = patch.file_path {
            self.file_path = file_path;
        }
        if let Some(size) = patch.file_size {
            self.file_size = size;
        }
        if let Some(duration) = patch.duration_seconds {
            self.duration_seconds = Some(duration);
        }
        if let Some(transcript) = patch.transcript {
            self.transcript = Some(transcript);
        }
        if let Some(target) = patch.publish_target {
            self.publish_target = Some(target);
        }
        if let Some(deadline) = patch.cleanup_deadline {
            self.cleanup_deadline = deadline;
        }
        for (kind, entry) in patch.append_content {
            self.generated_content.entry(kind).or_default().push(entry);
        }

        self.updated_at = if now > self.updated_at { now } else { self.updated_at };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::content::ContentCandidate;
    use crate::failure::ErrorKind;

    fn uploaded() -> Video {
        Video::new("user-1", VideoSource::uploaded("/staging/a.mov", "a.mov"))
    }

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_initial_status_follows_source() {
        assert_eq!(uploaded().status, VideoStatus::Uploading);
        let remote = Video::new("user-1", VideoSource::remote("https://youtu.be/abc"));
        assert_eq!(remote.status, VideoStatus::Downloading);
    }

    #[test]
    fn test_status_partition() {
        let in_flight: Vec<_> = VideoStatus::ALL.iter().filter(|s| s.is_in_flight()).collect();
        assert_eq!(in_flight.len(), 5);
        for status in VideoStatus::STABLE {
            assert!(status.is_stable());
            assert!(!status.is_in_flight());
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&VideoStatus::Publishing).unwrap();
        assert_eq!(json, "\"publishing\"");
    }

    #[test]
    fn test_transcript_is_set_at_most_once() {
        let mut video = uploaded();
        let now = Utc::now();
        let segment = TranscriptSegment::new(0, 1_000, "hello");
        video
            .apply_transition(VideoStatus::Ready, VideoPatch::new().transcript(vec![segment.clone()]), now)
            .unwrap();

        let before = video.clone();
        let err = video
            .apply_transition(VideoStatus::Ready, VideoPatch::new().transcript(vec![segment]), now)
            .unwrap_err();
        assert!(matches!(err, TransitionError::TranscriptAlreadySet(_)));
        assert_eq!(video, before);
    }

    #[test]
    fn test_error_status_requires_detail() {
        let mut video = uploaded();
        let err = video
            .apply_transition(VideoStatus::Error, VideoPatch::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::MissingErrorDetail);
        assert_eq!(video.status, VideoStatus::Uploading);
    }

    #[test]
    fn test_leaving_error_clears_detail() {
        let mut video = uploaded().failed(ErrorDetail::new(ErrorKind::IngestFailed, "disk full"));
        video
            .apply_transition(VideoStatus::Processing, VideoPatch::new(), Utc::now())
            .unwrap();
        assert!(video.error_detail.is_none());
    }

    #[test]
    fn test_overlapping_generations_return_to_ready_once() {
        let mut video = uploaded();
        let now = Utc::now();
        video.status = VideoStatus::Ready;

        video
            .apply_transition(VideoStatus::Generating, VideoPatch::new().begin_generation(), now)
            .unwrap();
        video
            .apply_transition(VideoStatus::Generating, VideoPatch::new().begin_generation(), now)
            .unwrap();
        assert_eq!(video.active_generations, 2);

        video
            .apply_transition(VideoStatus::Ready, VideoPatch::new().end_generation(), now)
            .unwrap();
        assert_eq!(video.status, VideoStatus::Generating);

        video
            .apply_transition(VideoStatus::Ready, VideoPatch::new().end_generation(), now)
            .unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(video.active_generations, 0);
    }

    #[test]
    fn test_generated_content_accumulates() {
        let mut video = uploaded();
        video.status = VideoStatus::Generating;
        video.active_generations = 1;
        let now = Utc::now();

        let first = GenerationEntry::new(vec![ContentCandidate::text("First")], None, None);
        let second = GenerationEntry::new(
            vec![ContentCandidate::text("Second")],
            Some("shorter".to_string()),
            Some("First".to_string()),
        );
        video
            .apply_transition(
                VideoStatus::Generating,
                VideoPatch::new().append_content(ContentKind::Title, first),
                now,
            )
            .unwrap();
        video
            .apply_transition(
                VideoStatus::Ready,
                VideoPatch::new().end_generation().append_content(ContentKind::Title, second),
                now,
            )
            .unwrap();

        let history = &video.generated_content[&ContentKind::Title];
        assert_eq!(history.len(), 2);
        assert_eq!(
            video.latest_content(ContentKind::Title).unwrap().requirements.as_deref(),
            Some("shorter")
        );
    }

    #[test]
    fn test_updated_at_never_moves_backwards() {
        let mut video = uploaded();
        let original = video.updated_at;
        video
            .apply_transition(VideoStatus::Processing, VideoPatch::new(), original - Duration::seconds(10))
            .unwrap();
        assert_eq!(video.updated_at, original);
    }

    #[test]
    fn test_reapable_only_when_stable_and_due() {
        let now = Utc::now();
        let mut video = uploaded().with_cleanup_deadline(now - Duration::minutes(1));
        assert!(!video.is_reapable(now));
        video.status = VideoStatus::Ready;
        assert!(video.is_reapable(now));
        video.cleanup_deadline = Some(now + Duration::minutes(1));
        assert!(!video.is_reapable(now));
    }

    /// Drives random walks over the transition graph and checks the status
    /// partition and generation counter never drift.
    #[test]
    fn test_random_transition_sequences_keep_invariants() {
        let mut seed: u64 = 0x5eed_1234_abcd_ef01;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..200 {
            let mut video = uploaded();
            for _ in 0..40 {
                let target = VideoStatus::ALL[(next() % 8) as usize];
                let mut patch = VideoPatch::new();
                if target == VideoStatus::Error {
                    patch = patch.error(ErrorDetail::new(ErrorKind::ProcessingFailed, "boom"));
                }
                match next() % 3 {
                    0 if target == VideoStatus::Generating => patch = patch.begin_generation(),
                    1 if video.status == VideoStatus::Generating => patch = patch.end_generation(),
                    _ => {}
                }
                let before = video.clone();
                if video.apply_transition(target, patch, Utc::now()).is_err() {
                    assert_eq!(video, before);
                }

                assert!(VideoStatus::ALL.contains(&video.status));
                assert_eq!(video.error_detail.is_some(), video.status == VideoStatus::Error);
                if video.status != VideoStatus::Generating {
                    assert_eq!(video.active_generations, 0);
                }
            }
        }
    }
}
