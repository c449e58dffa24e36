//! YouTube Data API: resumable upload, thumbnails and playlists.
//!
//! Uploads use the resumable protocol: a session is opened with the video
//! metadata, then the file is sent in `Content-Range` chunks. Each `308`
//! reply acknowledges a prefix of the file. After a failed chunk the client
//! asks the session how much it holds and continues from there instead of
//! starting over.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};
use tubeflow_models::{PublishMetadata, YouTubeToken};

use crate::config::PublisherConfig;
use crate::error::{PublishError, PublishResult};
use crate::metrics::{record_upload, record_upload_bytes};

/// Upload target platform.
#[async_trait]
pub trait VideoPlatform: Send + Sync {
    /// Upload `media` with `metadata`, returning the platform video id.
    async fn upload(&self, token: &YouTubeToken, media: &Path, metadata: &PublishMetadata) -> PublishResult<String>;

    /// Fetch the image at `image_url` and set it as the video thumbnail.
    async fn set_thumbnail(&self, token: &YouTubeToken, video_id: &str, image_url: &str) -> PublishResult<()>;

    async fn add_to_playlist(&self, token: &YouTubeToken, playlist_id: &str, video_id: &str) -> PublishResult<()>;
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Where an interrupted session stands.
#[derive(Debug, PartialEq, Eq)]
enum SessionState {
    /// Bytes `[0, n)` are stored
    Incomplete(u64),
    Complete(String),
}

#[derive(Clone)]
pub struct YouTubeClient {
    http: Client,
    config: PublisherConfig,
}

impl YouTubeClient {
    pub fn new(config: PublisherConfig) -> PublishResult<Self> {
        let http = Client::builder().connect_timeout(Duration::from_secs(15)).build()?;
        Ok(Self { http, config })
    }

    async fn open_session(
        &self,
        token: &YouTubeToken,
        metadata: &PublishMetadata,
        total: u64,
    ) -> PublishResult<String> {
        let url = format!(
            "{}/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status",
            self.config.upload_base.trim_end_matches('/')
        );

        let mut status = json!({
            "privacyStatus": metadata.privacy_status.as_str(),
            "selfDeclaredMadeForKids": false,
        });
        if let Some(at) = metadata.publish_at {
            status["publishAt"] = json!(at.to_rfc3339());
        }
        let body = json!({
            "snippet": {
                "title": metadata.title,
                "description": metadata.description,
                "tags": metadata.tags,
                "categoryId": metadata.category_id,
            },
            "status": status,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token.access_token)
            .header("X-Upload-Content-Length", total)
            .header("X-Upload-Content-Type", "video/mp4")
            .timeout(self.config.oauth_timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PublishError::upload_failed("Upload session created without a Location header"))
    }

    async fn send_chunk(
        &self,
        session: &str,
        token: &YouTubeToken,
        file: &mut tokio::fs::File,
        offset: u64,
        total: u64,
    ) -> PublishResult<SessionState> {
        let len = (self.config.chunk_size as u64).min(total - offset);
        let mut chunk = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut chunk).await?;

        let response = self
            .http
            .put(session)
            .bearer_auth(&token.access_token)
            .header(CONTENT_RANGE, format!("bytes {}-{}/{}", offset, offset + len - 1, total))
            .timeout(self.config.chunk_timeout)
            .body(chunk)
            .send()
            .await?;

        session_state(response).await
    }

    /// Ask the session how many bytes it has.
    async fn query_session(&self, session: &str, token: &YouTubeToken, total: u64) -> PublishResult<SessionState> {
        let response = self
            .http
            .put(session)
            .bearer_auth(&token.access_token)
            .header(CONTENT_RANGE, format!("bytes */{}", total))
            .timeout(self.config.oauth_timeout)
            .body(Vec::new())
            .send()
            .await?;

        session_state(response).await
    }

    /// Send the file chunk by chunk. A transient failure, or a chunk the
    /// session did not take, costs one of `chunk_retries`; after backing off
    /// the session is asked where to resume.
    async fn upload_chunks(&self, session: &str, token: &YouTubeToken, media: &Path, total: u64) -> PublishResult<String> {
        let mut file = tokio::fs::File::open(media).await?;
        let mut offset = 0u64;
        let mut failures = 0u32;
        let mut resuming = false;

        loop {
            let from_query = std::mem::take(&mut resuming);
            let result = if from_query {
                self.query_session(session, token, total).await
            } else {
                self.send_chunk(session, token, &mut file, offset, total).await
            };

            let failure = match result {
                Ok(SessionState::Complete(id)) => {
                    record_upload_bytes(total - offset);
                    return Ok(id);
                }
                Ok(SessionState::Incomplete(acked)) => {
                    let progressed = acked > offset;
                    if progressed {
                        record_upload_bytes(acked - offset);
                        failures = 0;
                    }
                    offset = acked;
                    debug!(
                        uploaded = offset,
                        total,
                        percent = (offset as f64 / total as f64 * 100.0).round(),
                        "Upload progress"
                    );
                    if offset >= total {
                        // Everything acknowledged but no final reply; ask once more.
                        if let SessionState::Complete(id) = self.query_session(session, token, total).await? {
                            return Ok(id);
                        }
                        return Err(PublishError::upload_failed("Upload acknowledged but never finalized"));
                    }
                    if progressed || from_query {
                        continue;
                    }
                    PublishError::Transient {
                        status: 308,
                        message: format!("Upload session took none of the chunk at byte {}", offset),
                    }
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if failures >= self.config.chunk_retries {
                return Err(failure);
            }
            failures += 1;
            let delay = self
                .config
                .retry_base_delay
                .saturating_mul(2u32.saturating_pow(failures - 1))
                .min(Duration::from_secs(60));
            warn!(offset, attempt = failures, "Upload chunk failed, resuming in {:?}: {}", delay, failure);
            tokio::time::sleep(delay).await;
            resuming = true;
        }
    }
}

/// Interpret a chunk or status reply.
async fn session_state(response: Response) -> PublishResult<SessionState> {
    match response.status().as_u16() {
        200 | 201 => {
            let video: UploadedVideo = response
                .json()
                .await
                .map_err(|e| PublishError::upload_failed(format!("Malformed upload reply: {}", e)))?;
            Ok(SessionState::Complete(video.id))
        }
        308 => {
            let acked = response
                .headers()
                .get(RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_range_end)
                .map_or(0, |end| end + 1);
            Ok(SessionState::Incomplete(acked))
        }
        _ => Err(classify_failure(response).await),
    }
}

/// Last byte index of a `bytes=0-N` header.
fn parse_range_end(value: &str) -> Option<u64> {
    value.trim().strip_prefix("bytes=")?.split_once('-')?.1.trim().parse().ok()
}

async fn classify_failure(response: Response) -> PublishError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED => PublishError::refresh_failed(format!("Access token rejected: {}", body), true),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS || s == StatusCode::REQUEST_TIMEOUT => {
            PublishError::Transient {
                status: s.as_u16(),
                message: body,
            }
        }
        s => PublishError::upload_failed(format!("{}: {}", s.as_u16(), body)),
    }
}

#[async_trait]
impl VideoPlatform for YouTubeClient {
    async fn upload(&self, token: &YouTubeToken, media: &Path, metadata: &PublishMetadata) -> PublishResult<String> {
        let total = tokio::fs::metadata(media).await?.len();
        if total == 0 {
            return Err(PublishError::upload_failed("Media file is empty"));
        }

        let session = self.open_session(token, metadata, total).await;
        let result = match session {
            Ok(session) => self.upload_chunks(&session, token, media, total).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(id) => {
                record_upload("success");
                info!(video_id = %id, bytes = total, privacy = %metadata.privacy_status, "Uploaded video to YouTube");
            }
            Err(e) => {
                record_upload("error");
                warn!(bytes = total, "YouTube upload failed: {}", e);
            }
        }
        result
    }

    async fn set_thumbnail(&self, token: &YouTubeToken, video_id: &str, image_url: &str) -> PublishResult<()> {
        let image = self
            .http
            .get(image_url)
            .timeout(self.config.chunk_timeout)
            .send()
            .await?;
        if !image.status().is_success() {
            return Err(PublishError::upload_failed(format!(
                "Thumbnail image fetch returned {}",
                image.status()
            )));
        }
        let content_type = image
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = image.bytes().await?;

        let url = format!(
            "{}/upload/youtube/v3/thumbnails/set",
            self.config.upload_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .query(&[("videoId", video_id)])
            .bearer_auth(&token.access_token)
            .header(CONTENT_TYPE, content_type)
            .timeout(self.config.chunk_timeout)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        debug!(video_id, "Thumbnail set");
        Ok(())
    }

    async fn add_to_playlist(&self, token: &YouTubeToken, playlist_id: &str, video_id: &str) -> PublishResult<()> {
        let url = format!("{}/youtube/v3/playlistItems", self.config.api_base.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .query(&[("part", "snippet")])
            .bearer_auth(&token.access_token)
            .timeout(self.config.oauth_timeout)
            .json(&json!({
                "snippet": {
                    "playlistId": playlist_id,
                    "resourceId": { "kind": "youtube#video", "videoId": video_id }
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        debug!(video_id, playlist_id, "Added to playlist");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;
    use tubeflow_models::PrivacyStatus;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::CHUNK_GRANULARITY;

    const SESSION_PATH: &str = "/upload-session/abc";

    fn client(server: &MockServer) -> YouTubeClient {
        YouTubeClient::new(PublisherConfig {
            api_base: server.uri(),
            upload_base: server.uri(),
            chunk_size: CHUNK_GRANULARITY,
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap()
    }

    fn token() -> YouTubeToken {
        YouTubeToken::new("u1", "access-1", "refresh-1", Utc::now() + chrono::Duration::hours(1))
    }

    fn metadata() -> PublishMetadata {
        PublishMetadata {
            title: "Learn Rust".into(),
            description: "00:00 Intro".into(),
            tags: vec!["rust".into()],
            category_id: "22".into(),
            privacy_status: PrivacyStatus::Unlisted,
            publish_at: None,
            thumbnail_url: None,
            playlist_id: None,
        }
    }

    fn media(dir: &TempDir, len: usize) -> std::path::PathBuf {
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, vec![9u8; len]).unwrap();
        path
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .and(query_param("uploadType", "resumable"))
            .and(header("authorization", "Bearer access-1"))
            .and(body_string_contains("\"selfDeclaredMadeForKids\":false"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}{}", server.uri(), SESSION_PATH).as_str()),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_range_end() {
        assert_eq!(parse_range_end("bytes=0-262143"), Some(262_143));
        assert_eq!(parse_range_end("bytes=0-"), None);
        assert_eq!(parse_range_end("0-10"), None);
    }

    #[tokio::test]
    async fn test_chunked_upload() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let total = CHUNK_GRANULARITY + 1000;
        let file = media(&dir, total);
        mount_session(&server).await;

        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header("content-range", format!("bytes 0-{}/{}", CHUNK_GRANULARITY - 1, total).as_str()))
            .respond_with(
                ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK_GRANULARITY - 1).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .and(header(
                "content-range",
                format!("bytes {}-{}/{}", CHUNK_GRANULARITY, total - 1, total).as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "yt-123" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).upload(&token(), &file, &metadata()).await.unwrap();
        assert_eq!(id, "yt-123");
    }

    #[tokio::test]
    async fn test_failed_chunk_resumes_from_acknowledged_offset() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let total = 2 * CHUNK_GRANULARITY;
        let file = media(&dir, total);
        mount_session(&server).await;

        let second = format!("bytes {}-{}/{}", CHUNK_GRANULARITY, total - 1, total);
        Mock::given(method("PUT"))
            .and(header("content-range", format!("bytes 0-{}/{}", CHUNK_GRANULARITY - 1, total).as_str()))
            .respond_with(
                ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK_GRANULARITY - 1).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        // Second chunk fails once, then succeeds after the status query.
        Mock::given(method("PUT"))
            .and(header("content-range", second.as_str()))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header("content-range", format!("bytes */{}", total).as_str()))
            .respond_with(
                ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK_GRANULARITY - 1).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header("content-range", second.as_str()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "yt-456" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).upload(&token(), &file, &metadata()).await.unwrap();
        assert_eq!(id, "yt-456");
    }

    #[tokio::test]
    async fn test_stalled_session_gives_up_after_retries() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let total = 2 * CHUNK_GRANULARITY;
        let file = media(&dir, total);
        mount_session(&server).await;

        // Every chunk and status query is acknowledged without progress.
        Mock::given(method("PUT"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(308))
            .mount(&server)
            .await;

        let client = YouTubeClient::new(PublisherConfig {
            api_base: server.uri(),
            upload_base: server.uri(),
            chunk_size: CHUNK_GRANULARITY,
            chunk_retries: 2,
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), client.upload(&token(), &file, &metadata()))
            .await
            .expect("upload should give up")
            .unwrap_err();
        assert!(err.is_transient());

        // Three chunk attempts and two status queries.
        let puts = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.to_string() == "PUT")
            .count();
        assert_eq!(puts, 5);
    }

    #[tokio::test]
    async fn test_failed_status_query_is_retried() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let total = CHUNK_GRANULARITY;
        let file = media(&dir, total);
        mount_session(&server).await;

        let chunk = format!("bytes 0-{}/{}", total - 1, total);
        let query = format!("bytes */{}", total);
        Mock::given(method("PUT"))
            .and(header("content-range", chunk.as_str()))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header("content-range", query.as_str()))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header("content-range", query.as_str()))
            .respond_with(ResponseTemplate::new(308))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header("content-range", chunk.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "yt-789" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).upload(&token(), &file, &metadata()).await.unwrap();
        assert_eq!(id, "yt-789");
    }

    #[tokio::test]
    async fn test_quota_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quotaExceeded"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = client(&server)
            .upload(&token(), &media(&dir, 10), &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::UploadFailed(_)));
        assert!(!err.requires_reauthorization());
    }

    #[tokio::test]
    async fn test_rejected_access_token_needs_reauthorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = client(&server)
            .upload(&token(), &media(&dir, 10), &metadata())
            .await
            .unwrap_err();
        assert!(err.requires_reauthorization());
    }

    #[tokio::test]
    async fn test_set_thumbnail_downloads_and_uploads_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/thumb"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/thumbnails/set"))
            .and(query_param("videoId", "yt-1"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .set_thumbnail(&token(), "yt-1", &format!("{}/img/thumb", server.uri()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_to_playlist() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/youtube/v3/playlistItems"))
            .and(body_string_contains("\"playlistId\":\"PL1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "item" })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).add_to_playlist(&token(), "PL1", "yt-1").await.unwrap();
    }
}
