//! Firestore-backed stores.
//!
//! Each video is one document in `videos`, holding the serialized record plus
//! a `cleanup_due_at` timestamp mirror for range queries. The mirror is null
//! while the video is in flight, so the due query only ever sees videos at
//! rest and needs no composite index. Mutations read the
//! document, apply the change locally and write it back conditioned on the
//! `updateTime` they read, retrying when another writer got there first.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tubeflow_firestore::{
    fields_from_json, Direction, Document, FieldOperator, Filter, FirestoreClient, FirestoreError, Precondition,
    StructuredQuery, Value,
};
use tubeflow_models::{
    ContentKind, GenerationEntry, UserApiKey, Video, VideoId, VideoPatch, VideoStatus, YouTubeToken,
};

use crate::error::{StateError, StateResult};
use crate::store::{apply_checked, touch, ApiKeyStore, TokenStore, VideoStore};

const VIDEOS: &str = "videos";
const TOKENS: &str = "youtube_tokens";
const API_KEYS: &str = "gemini_keys";
const CLEANUP_DUE_AT: &str = "cleanup_due_at";

/// Read-modify-write attempts before giving up on a contended document.
const MAX_CAS_ATTEMPTS: u32 = 5;

fn encode<T: Serialize>(record: &T) -> StateResult<HashMap<String, Value>> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(object) => Ok(fields_from_json(&object)),
        other => Err(StateError::Corrupt(format!("expected an object, got {}", other))),
    }
}

fn decode<T: DeserializeOwned>(doc: &Document) -> StateResult<T> {
    let mut object = doc.to_json_object();
    object.remove(CLEANUP_DUE_AT);
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

fn encode_video(video: &Video) -> StateResult<HashMap<String, Value>> {
    let mut fields = encode(video)?;
    let due = match video.cleanup_deadline {
        Some(deadline) if video.status.is_stable() => Value::timestamp(deadline),
        _ => Value::NullValue(()),
    };
    fields.insert(CLEANUP_DUE_AT.to_string(), due);
    Ok(fields)
}

#[derive(Clone)]
pub struct FirestoreVideoStore {
    client: FirestoreClient,
}

impl FirestoreVideoStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Optimistic read-modify-write of one video.
    async fn mutate<F>(&self, id: &VideoId, f: F) -> StateResult<Video>
    where
        F: Fn(&mut Video) -> StateResult<()> + Send + Sync,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let doc = self
                .client
                .get_document(VIDEOS, id.as_str())
                .await?
                .ok_or_else(|| StateError::NotFound(id.clone()))?;
            let update_time = doc
                .update_time
                .clone()
                .ok_or_else(|| StateError::Corrupt(format!("video {} has no updateTime", id)))?;

            let mut video: Video = decode(&doc)?;
            f(&mut video)?;

            match self
                .client
                .update_document(VIDEOS, id.as_str(), encode_video(&video)?, Precondition::UpdateTime(update_time))
                .await
            {
                Ok(_) => return Ok(video),
                Err(e) if e.is_precondition_failed() => {
                    debug!(video_id = %id, attempt = attempt + 1, "Concurrent video update, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StateError::Backend(format!(
            "video {} still contended after {} attempts",
            id, MAX_CAS_ATTEMPTS
        )))
    }
}

#[async_trait]
impl VideoStore for FirestoreVideoStore {
    async fn create(&self, video: Video) -> StateResult<VideoId> {
        match self
            .client
            .create_document(VIDEOS, video.id.as_str(), encode_video(&video)?)
            .await
        {
            Ok(_) => Ok(video.id),
            Err(FirestoreError::AlreadyExists(_)) => Err(StateError::AlreadyExists(video.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &VideoId) -> StateResult<Video> {
        let doc = self
            .client
            .get_document(VIDEOS, id.as_str())
            .await?
            .ok_or_else(|| StateError::NotFound(id.clone()))?;
        decode(&doc)
    }

    async fn transition(
        &self,
        id: &VideoId,
        expected: &[VideoStatus],
        new_status: VideoStatus,
        patch: VideoPatch,
    ) -> StateResult<Video> {
        self.mutate(id, |video| {
            apply_checked(video, expected, new_status, patch.clone(), Utc::now())
        })
        .await
    }

    async fn append_generated_content(
        &self,
        id: &VideoId,
        kind: ContentKind,
        entry: GenerationEntry,
    ) -> StateResult<Video> {
        self.mutate(id, |video| {
            video.generated_content.entry(kind).or_default().push(entry.clone());
            touch(video, Utc::now());
            Ok(())
        })
        .await
    }

    async fn set_cleanup_deadline(&self, id: &VideoId, deadline: Option<DateTime<Utc>>) -> StateResult<Video> {
        self.mutate(id, |video| {
            video.cleanup_deadline = deadline;
            touch(video, Utc::now());
            Ok(())
        })
        .await
    }

    async fn list_cleanup_due(&self, now: DateTime<Utc>, limit: usize) -> StateResult<Vec<Video>> {
        let query = StructuredQuery::collection(VIDEOS)
            .filter(Filter::field(CLEANUP_DUE_AT, FieldOperator::LessThanOrEqual, Value::timestamp(now)))
            .order_by(CLEANUP_DUE_AT, Direction::Ascending)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX));

        self.client.run_query(query).await?.iter().map(decode).collect()
    }

    async fn check_health(&self) -> StateResult<()> {
        self.client.get_document(VIDEOS, "__health__").await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FirestoreTokenStore {
    client: FirestoreClient,
}

impl FirestoreTokenStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenStore for FirestoreTokenStore {
    async fn get(&self, user_id: &str) -> StateResult<Option<YouTubeToken>> {
        match self.client.get_document(TOKENS, user_id).await? {
            Some(doc) => Ok(Some(decode(&doc)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, token: YouTubeToken) -> StateResult<()> {
        // PATCH without a precondition creates or replaces the user's document.
        self.client
            .update_document(TOKENS, &token.user_id, encode(&token)?, Precondition::None)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FirestoreApiKeyStore {
    client: FirestoreClient,
}

impl FirestoreApiKeyStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApiKeyStore for FirestoreApiKeyStore {
    async fn get(&self, user_id: &str) -> StateResult<Option<UserApiKey>> {
        match self.client.get_document(API_KEYS, user_id).await? {
            Some(doc) => Ok(Some(decode(&doc)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, key: UserApiKey) -> StateResult<()> {
        self.client
            .update_document(API_KEYS, &key.user_id, encode(&key)?, Precondition::None)
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> StateResult<bool> {
        Ok(self.client.delete_document(API_KEYS, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tubeflow_firestore::{FirestoreConfig, RetryConfig, TokenSource};
    use tubeflow_models::{TranscriptSegment, VideoSource};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const DOCS: &str = "/v1/projects/demo/databases/(default)/documents";

    fn client(server: &MockServer) -> FirestoreClient {
        let config = FirestoreConfig {
            project_id: "demo".into(),
            database_id: "(default)".into(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig::none(),
            emulator_host: None,
        };
        FirestoreClient::with_endpoint(config, &server.uri(), TokenSource::fixed("owner")).unwrap()
    }

    fn stored(video: &Video, update_time: &str) -> serde_json::Value {
        let fields = serde_json::to_value(encode_video(video).unwrap()).unwrap();
        json!({
            "name": format!("projects/demo/databases/(default)/documents/videos/{}", video.id),
            "fields": fields,
            "updateTime": update_time
        })
    }

    #[test]
    fn test_video_document_encoding() {
        let mut video = Video::new("u1", VideoSource::uploaded("/s/a.mov", "a.mov"));
        video.status = VideoStatus::Ready;
        video.duration_seconds = Some(42.0);
        video.file_size = Some(1024);
        video.transcript = Some(vec![TranscriptSegment {
            start_ms: 0,
            end_ms: 800,
            text: "hi".into(),
        }]);
        video.cleanup_deadline = Some(Utc::now());

        let fields = encode_video(&video).unwrap();
        assert!(matches!(fields.get(CLEANUP_DUE_AT), Some(Value::TimestampValue(_))));

        let decoded: Video = decode(&Document::new(fields)).unwrap();
        assert_eq!(decoded, video);
    }

    #[test]
    fn test_in_flight_video_has_no_due_mirror() {
        let mut video = Video::new("u1", VideoSource::uploaded("/s/a.mov", "a.mov"));
        video.cleanup_deadline = Some(Utc::now());

        let fields = encode_video(&video).unwrap();
        assert!(matches!(fields.get(CLEANUP_DUE_AT), Some(Value::NullValue(()))));

        // The deadline itself survives in the record.
        let decoded: Video = decode(&Document::new(fields)).unwrap();
        assert_eq!(decoded.cleanup_deadline, video.cleanup_deadline);
    }

    #[tokio::test]
    async fn test_transition_retries_lost_race() {
        let server = MockServer::start().await;
        let video = Video::new("u1", VideoSource::uploaded("/s/a.mov", "a.mov"));
        let doc_path = format!("{}/videos/{}", DOCS, video.id);

        Mock::given(method("GET"))
            .and(path(doc_path.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored(&video, "t1")))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(doc_path.clone()))
            .and(query_param("currentDocument.updateTime", "t1"))
            .respond_with(ResponseTemplate::new(412))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(doc_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored(&video, "t2")))
            .expect(1)
            .mount(&server)
            .await;

        let store = FirestoreVideoStore::new(client(&server));
        let updated = store
            .transition(&video.id, &[VideoStatus::Uploading], VideoStatus::Processing, VideoPatch::new())
            .await
            .unwrap();
        assert_eq!(updated.status, VideoStatus::Processing);
    }

    #[tokio::test]
    async fn test_transition_conflict_issues_no_write() {
        let server = MockServer::start().await;
        let video = Video::new("u1", VideoSource::uploaded("/s/a.mov", "a.mov"));

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored(&video, "t1")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = FirestoreVideoStore::new(client(&server))
            .transition(&video.id, &[VideoStatus::Ready], VideoStatus::Publishing, VideoPatch::new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_missing_token_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/youtube_tokens/u9", DOCS)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = FirestoreTokenStore::new(client(&server));
        assert!(store.get("u9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_api_key_round_trips_through_document() {
        let server = MockServer::start().await;
        let key = UserApiKey::new("u1", "AIzaSyStoredKey0000000");
        let fields = serde_json::to_value(encode(&key).unwrap()).unwrap();

        Mock::given(method("PATCH"))
            .and(path(format!("{}/gemini_keys/u1", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "fields": fields.clone() })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/gemini_keys/u1", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo/databases/(default)/documents/gemini_keys/u1",
                "fields": fields
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = FirestoreApiKeyStore::new(client(&server));
        store.upsert(key.clone()).await.unwrap();
        assert_eq!(store.get("u1").await.unwrap(), Some(key));
    }
}
