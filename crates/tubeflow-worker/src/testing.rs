//! In-process fakes for the pipeline's external collaborators.
//!
//! Compiled for this crate's tests and, behind the `test-support` feature,
//! for the HTTP layer's tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tubeflow_ai::{AiError, AiResult, ContentGenerator};
use tubeflow_media::{
    FetchedMedia, MediaError, MediaResult, RemoteSource, SourcePolicy, TranscodeOutput, Transcoder,
};
use tubeflow_models::{ContentCandidate, ContentKind, PublishMetadata, TranscriptSegment, VideoId, YouTubeToken};
use tubeflow_publisher::{PublishError, PublishResult, TokenGrant, TokenManager, TokenRefresher, VideoPlatform};
use tubeflow_state::{InMemoryApiKeyStore, InMemoryTokenStore, InMemoryVideoStore};
use tubeflow_storage::{LocalMediaStore, MediaStore};

use crate::config::WorkerConfig;
use crate::context::PipelineContext;
use crate::orchestrator::Orchestrator;

pub const FAKE_DURATION: f64 = 12.5;
pub const FAKE_MEDIA: &[u8] = b"normalized-media-bytes";

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted result of one `normalize_and_transcribe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Ok,
    /// FFmpeg ran out of memory; worth retrying.
    Transient,
    /// No speech in the audio track.
    Silent,
}

#[derive(Default)]
pub struct FakeTranscoder {
    script: Mutex<VecDeque<TranscodeOutcome>>,
    delay: Mutex<Duration>,
    transcode_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeTranscoder {
    /// Outcomes for the next calls; once exhausted every call succeeds.
    pub fn script(&self, outcomes: impl IntoIterator<Item = TranscodeOutcome>) {
        lock(&self.script).extend(outcomes);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn transcode_calls(&self) -> usize {
        self.transcode_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn normalize_and_transcribe(&self, _source: &Path, work_dir: &Path) -> MediaResult<TranscodeOutput> {
        self.transcode_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = lock(&self.script).pop_front().unwrap_or(TranscodeOutcome::Ok);
        match outcome {
            TranscodeOutcome::Ok => {
                tokio::fs::create_dir_all(work_dir).await?;
                let normalized = work_dir.join("normalized.mp4");
                tokio::fs::write(&normalized, FAKE_MEDIA).await?;
                Ok(TranscodeOutput {
                    normalized_path: normalized,
                    duration_seconds: FAKE_DURATION,
                    transcript: vec![
                        TranscriptSegment::new(0, 4_000, "Welcome to the talk."),
                        TranscriptSegment::new(4_000, 12_500, "Today we look at state machines."),
                    ],
                })
            }
            TranscodeOutcome::Transient => Err(MediaError::ffmpeg_failed(
                "ffmpeg exited",
                Some("Cannot allocate memory".to_string()),
                Some(1),
            )),
            TranscodeOutcome::Silent => Err(MediaError::transcription_failed("No speech detected")),
        }
    }

    async fn fetch_remote(&self, source: &RemoteSource, dest_dir: &Path, file_stem: &str) -> MediaResult<FetchedMedia> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if source.url.as_str().contains("huge") {
            return Err(MediaError::SourceTooLarge { limit_bytes: 1024 });
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("{}.mp4", file_stem));
        tokio::fs::write(&path, b"downloaded").await?;
        Ok(FetchedMedia { path, size_bytes: 10 })
    }
}

/// Records the arguments of the last call as (excerpt, prior, requirements).
pub type GenerateCall = (String, Option<String>, Option<String>);

#[derive(Default)]
pub struct FakeGenerator {
    fail_next: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    last: Mutex<Option<GenerateCall>>,
    last_api_key: Mutex<Option<String>>,
}

impl FakeGenerator {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_call(&self) -> Option<GenerateCall> {
        lock(&self.last).clone()
    }

    /// The user key passed on the latest call; `None` means the server key.
    pub fn last_api_key(&self) -> Option<String> {
        lock(&self.last_api_key).clone()
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        kind: ContentKind,
        transcript_excerpt: &str,
        prior_candidate: Option<&str>,
        requirements: Option<&str>,
        api_key: Option<&str>,
    ) -> AiResult<Vec<ContentCandidate>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.last_api_key) = api_key.map(str::to_string);
        *lock(&self.last) = Some((
            transcript_excerpt.to_string(),
            prior_candidate.map(str::to_string),
            requirements.map(str::to_string),
        ));

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AiError::QuotaExhausted("daily quota used".to_string()));
        }

        Ok(match kind {
            ContentKind::Thumbnail => vec![ContentCandidate::image(
                format!("https://images.example.com/thumb-{}.png", n),
                "speaker on stage",
            )],
            ContentKind::Title => vec![
                ContentCandidate::text(format!("State Machines in Practice #{}", n)),
                ContentCandidate::text("Why Your Pipeline Needs a Status Field"),
            ],
            ContentKind::Description => vec![ContentCandidate::text("A talk about state machines.")],
            ContentKind::Timestamps => vec![ContentCandidate::text("00:00 Intro\n00:04 State machines")],
        })
    }
}

#[derive(Default)]
pub struct FakePlatform {
    uploads: AtomicUsize,
    thumbnails: AtomicUsize,
    playlists: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_thumbnails: AtomicBool,
    last_access_token: Mutex<Option<String>>,
}

impl FakePlatform {
    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    pub fn fail_thumbnails(&self) {
        self.fail_thumbnails.store(true, Ordering::SeqCst);
    }

    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn thumbnail_calls(&self) -> usize {
        self.thumbnails.load(Ordering::SeqCst)
    }

    pub fn playlist_calls(&self) -> usize {
        self.playlists.load(Ordering::SeqCst)
    }

    pub fn last_access_token(&self) -> Option<String> {
        lock(&self.last_access_token).clone()
    }
}

#[async_trait]
impl VideoPlatform for FakePlatform {
    async fn upload(&self, token: &YouTubeToken, media: &Path, _metadata: &PublishMetadata) -> PublishResult<String> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.last_access_token) = Some(token.access_token.clone());

        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(PublishError::upload_failed("quotaExceeded"));
        }
        if !media.exists() {
            return Err(PublishError::upload_failed("media file vanished"));
        }
        Ok(format!("yt-{}", n))
    }

    async fn set_thumbnail(&self, _token: &YouTubeToken, _video_id: &str, _image_url: &str) -> PublishResult<()> {
        self.thumbnails.fetch_add(1, Ordering::SeqCst);
        if self.fail_thumbnails.load(Ordering::SeqCst) {
            return Err(PublishError::upload_failed("thumbnail rejected"));
        }
        Ok(())
    }

    async fn add_to_playlist(&self, _token: &YouTubeToken, _playlist_id: &str, _video_id: &str) -> PublishResult<()> {
        self.playlists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRefresher {
    calls: AtomicUsize,
    revoked: AtomicBool,
}

impl FakeRefresher {
    /// Make every refresh fail as if the user revoked access.
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, _refresh_token: &str) -> PublishResult<TokenGrant> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.revoked.load(Ordering::SeqCst) {
            return Err(PublishError::refresh_failed("invalid_grant: Token has been revoked", true));
        }
        Ok(TokenGrant {
            access_token: "access-refreshed".to_string(),
            expires_in: 3600,
            refresh_token: None,
            scope: None,
            token_type: Some("Bearer".to_string()),
        })
    }
}

/// A fully wired orchestrator over in-memory stores and fakes.
pub struct Harness {
    pub dir: TempDir,
    pub videos: Arc<InMemoryVideoStore>,
    pub tokens: Arc<InMemoryTokenStore>,
    pub api_keys: Arc<InMemoryApiKeyStore>,
    pub media: Arc<LocalMediaStore>,
    pub transcoder: Arc<FakeTranscoder>,
    pub generator: Arc<FakeGenerator>,
    pub platform: Arc<FakePlatform>,
    pub refresher: Arc<FakeRefresher>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn context(&self) -> &PipelineContext {
        self.orchestrator.context()
    }

    pub async fn media_exists(&self, id: &VideoId) -> bool {
        self.media.exists(id).await.unwrap_or(false)
    }
}

/// Config pointing every path into `dir`, with short retry delays.
pub fn test_config(dir: &Path) -> WorkerConfig {
    WorkerConfig {
        work_dir: dir.join("work"),
        staging_dir: dir.join("staging"),
        process_retry_base: Duration::from_millis(5),
        cleanup_sweep_interval: Duration::from_millis(20),
        ..WorkerConfig::default()
    }
}

pub fn harness() -> Harness {
    let dir = TempDir::new().unwrap_or_else(|e| panic!("temp dir: {}", e));
    harness_with_config(test_config(dir.path()), dir)
}

pub fn harness_with_config(config: WorkerConfig, dir: TempDir) -> Harness {
    let videos = Arc::new(InMemoryVideoStore::new());
    let tokens = Arc::new(InMemoryTokenStore::new());
    let api_keys = Arc::new(InMemoryApiKeyStore::new());
    let media = Arc::new(LocalMediaStore::new(dir.path().join("media")));
    let transcoder = Arc::new(FakeTranscoder::default());
    let generator = Arc::new(FakeGenerator::default());
    let platform = Arc::new(FakePlatform::default());
    let refresher = Arc::new(FakeRefresher::default());

    let ctx = PipelineContext {
        videos: videos.clone(),
        tokens: tokens.clone(),
        api_keys: api_keys.clone(),
        media: media.clone(),
        transcoder: transcoder.clone(),
        generator: generator.clone(),
        platform: platform.clone(),
        token_manager: Arc::new(TokenManager::new(
            tokens.clone(),
            refresher.clone(),
            Duration::from_secs(300),
        )),
        source_policy: SourcePolicy::new(),
    };

    Harness {
        dir,
        videos,
        tokens,
        api_keys,
        media,
        transcoder,
        generator,
        platform,
        refresher,
        orchestrator: Arc::new(Orchestrator::new(ctx, config)),
    }
}
