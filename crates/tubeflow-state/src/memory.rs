//! In-process stores for tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tubeflow_models::{
    ContentKind, GenerationEntry, UserApiKey, Video, VideoId, VideoPatch, VideoStatus, YouTubeToken,
};

use crate::error::{StateError, StateResult};
use crate::store::{apply_checked, touch, ApiKeyStore, TokenStore, VideoStore};

#[derive(Default)]
pub struct InMemoryVideoStore {
    videos: RwLock<HashMap<VideoId, Video>>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: &VideoId, f: F) -> StateResult<Video>
    where
        F: FnOnce(&mut Video) -> StateResult<()>,
    {
        let mut videos = self.videos.write().await;
        let video = videos.get_mut(id).ok_or_else(|| StateError::NotFound(id.clone()))?;
        // Work on a copy so a rejected mutation leaves the record as it was.
        let mut next = video.clone();
        f(&mut next)?;
        *video = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn create(&self, video: Video) -> StateResult<VideoId> {
        let mut videos = self.videos.write().await;
        if videos.contains_key(&video.id) {
            return Err(StateError::AlreadyExists(video.id));
        }
        let id = video.id.clone();
        videos.insert(id.clone(), video);
        Ok(id)
    }

    async fn get(&self, id: &VideoId) -> StateResult<Video> {
        self.videos
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(id.clone()))
    }

    async fn transition(
        &self,
        id: &VideoId,
        expected: &[VideoStatus],
        new_status: VideoStatus,
        patch: VideoPatch,
    ) -> StateResult<Video> {
        self.update(id, |video| apply_checked(video, expected, new_status, patch, Utc::now()))
            .await
    }

    async fn append_generated_content(
        &self,
        id: &VideoId,
        kind: ContentKind,
        entry: GenerationEntry,
    ) -> StateResult<Video> {
        self.update(id, |video| {
            video.generated_content.entry(kind).or_default().push(entry);
            touch(video, Utc::now());
            Ok(())
        })
        .await
    }

    async fn set_cleanup_deadline(&self, id: &VideoId, deadline: Option<DateTime<Utc>>) -> StateResult<Video> {
        self.update(id, |video| {
            video.cleanup_deadline = deadline;
            touch(video, Utc::now());
            Ok(())
        })
        .await
    }

    async fn list_cleanup_due(&self, now: DateTime<Utc>, limit: usize) -> StateResult<Vec<Video>> {
        let videos = self.videos.read().await;
        let mut due: Vec<Video> = videos
            .values()
            .filter(|v| v.status.is_stable() && v.cleanup_deadline.is_some_and(|d| d <= now))
            .cloned()
            .collect();
        due.sort_by_key(|v| v.cleanup_deadline);
        due.truncate(limit);
        Ok(due)
    }

    async fn check_health(&self) -> StateResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<String, YouTubeToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, user_id: &str) -> StateResult<Option<YouTubeToken>> {
        Ok(self.tokens.read().await.get(user_id).cloned())
    }

    async fn upsert(&self, token: YouTubeToken) -> StateResult<()> {
        self.tokens.write().await.insert(token.user_id.clone(), token);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyStore {
    keys: RwLock<HashMap<String, UserApiKey>>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn get(&self, user_id: &str) -> StateResult<Option<UserApiKey>> {
        Ok(self.keys.read().await.get(user_id).cloned())
    }

    async fn upsert(&self, key: UserApiKey) -> StateResult<()> {
        self.keys.write().await.insert(key.user_id.clone(), key);
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> StateResult<bool> {
        Ok(self.keys.write().await.remove(user_id).is_some())
    }
}
