//! Store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tubeflow_models::{
    ContentKind, GenerationEntry, UserApiKey, Video, VideoId, VideoPatch, VideoStatus, YouTubeToken,
};

use crate::error::{StateError, StateResult};

/// Authoritative record of every video's lifecycle.
///
/// `transition` is the only way to change `status`. It is a compare-and-swap
/// on the status: the store fails with [`StateError::Conflict`] and writes
/// nothing when the stored status is not in `expected`.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn create(&self, video: Video) -> StateResult<VideoId>;

    async fn get(&self, id: &VideoId) -> StateResult<Video>;

    async fn transition(
        &self,
        id: &VideoId,
        expected: &[VideoStatus],
        new_status: VideoStatus,
        patch: VideoPatch,
    ) -> StateResult<Video>;

    /// Append a generation entry without touching the status.
    async fn append_generated_content(
        &self,
        id: &VideoId,
        kind: ContentKind,
        entry: GenerationEntry,
    ) -> StateResult<Video>;

    async fn set_cleanup_deadline(&self, id: &VideoId, deadline: Option<DateTime<Utc>>) -> StateResult<Video>;

    /// Videos at rest whose deadline is at or before `now`, soonest first.
    /// In-flight videos are left out before `limit` applies, so they can
    /// never crowd reapable ones out of a batch.
    async fn list_cleanup_due(&self, now: DateTime<Utc>, limit: usize) -> StateResult<Vec<Video>>;

    async fn check_health(&self) -> StateResult<()>;
}

/// The single live YouTube credential per user.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, user_id: &str) -> StateResult<Option<YouTubeToken>>;

    /// Insert or replace in place; never creates a second record for a user.
    async fn upsert(&self, token: YouTubeToken) -> StateResult<()>;
}

/// Each user's own AI service key, at most one per user.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get(&self, user_id: &str) -> StateResult<Option<UserApiKey>>;

    async fn upsert(&self, key: UserApiKey) -> StateResult<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, user_id: &str) -> StateResult<bool>;
}

/// Check the status CAS and apply the transition to `video`.
pub(crate) fn apply_checked(
    video: &mut Video,
    expected: &[VideoStatus],
    new_status: VideoStatus,
    patch: VideoPatch,
    now: DateTime<Utc>,
) -> StateResult<()> {
    if !expected.contains(&video.status) {
        return Err(StateError::conflict(&video.id, expected, video.status));
    }
    video.apply_transition(new_status, patch, now)?;
    Ok(())
}

/// Field-only update that keeps `updated_at` monotonic.
pub(crate) fn touch(video: &mut Video, now: DateTime<Utc>) {
    if now > video.updated_at {
        video.updated_at = now;
    }
}
