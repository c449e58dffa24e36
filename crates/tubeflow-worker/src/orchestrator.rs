//! Job orchestrator.
//!
//! Drives each video through ingest, processing, content generation and
//! publishing. There is no lock table: every step states the statuses it
//! expects and the state store's compare-and-swap `transition` rejects
//! anything else, so at most one step moves a video out of an in-flight
//! status at a time.
//!
//! Trigger methods (`ingest_upload`, `ingest_remote`, `start_process`,
//! `start_publish`) validate and claim synchronously, then finish on the
//! task runner; callers poll the state store for the outcome. The
//! `process` and `publish` methods run a step to completion in the caller's
//! task; `generate` awaits a tracked task so the video is released even if
//! the caller goes away.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn, Instrument};
use tubeflow_media::{move_file, remove_quietly, MediaError, RemoteSource};
use tubeflow_models::transcript::render_excerpt;
use tubeflow_models::{
    ErrorDetail, ErrorKind, GenerationEntry, GenerationRequest, PublishMetadata, PublishOptions, PublishTarget,
    Video, VideoId, VideoPatch, VideoSource, VideoStatus, YouTubeToken,
};
use tubeflow_state::{StateError, StateResult};

use crate::config::WorkerConfig;
use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::record_step;
use crate::retry::{retry_when, RetryConfig};
use crate::runner::TaskRunner;

/// Retries for state writes that finish a step; losing them would strand
/// the video in an in-flight status.
const COMMIT_RETRIES: u32 = 3;
const COMMIT_RETRY_BASE: Duration = Duration::from_millis(200);

pub struct Orchestrator {
    ctx: PipelineContext,
    config: WorkerConfig,
    runner: TaskRunner,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext, config: WorkerConfig) -> Self {
        let runner = TaskRunner::new(config.max_concurrent_jobs);
        Self { ctx, config, runner }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Create the video record for a new submission.
    ///
    /// The record gets the default retention deadline. A remote URL that is
    /// not a supported source is recorded straight into `Error` and never
    /// enters `Downloading`.
    pub async fn register(&self, owner_id: &str, source: VideoSource) -> WorkerResult<Video> {
        let mut video = Video::new(owner_id, source);

        if let Some(retention) = self.config.cleanup_retention {
            let retention = chrono::Duration::from_std(retention)
                .map_err(|_| WorkerError::config_error("Cleanup retention is out of range"))?;
            let deadline = video
                .created_at
                .checked_add_signed(retention)
                .ok_or_else(|| WorkerError::config_error("Cleanup retention is out of range"))?;
            video = video.with_cleanup_deadline(deadline);
        }

        if let VideoSource::RemoteUrl { url } = &video.source {
            if let Err(e) = self.ctx.source_policy.classify(url) {
                warn!(video_id = %video.id, url = %url, "Rejected remote source: {}", e);
                video = video.failed(ErrorDetail::new(ErrorKind::UnsupportedSource, e.to_string()));
            }
        }

        self.ctx.videos.create(video.clone()).await?;
        info!(video_id = %video.id, owner_id, status = %video.status, "Registered video");
        Ok(video)
    }

    /// Stage an uploaded file and hand the video to processing.
    ///
    /// Expects `Uploading`. Returns the `Processing` snapshot; processing
    /// continues in the background.
    pub async fn ingest_upload(self: &Arc<Self>, id: &VideoId, upload: &Path) -> WorkerResult<Video> {
        let video = self.expect_status(id, &[VideoStatus::Uploading]).await?;
        let log = JobLogger::new(id, "ingest_upload");
        log.log_start(&upload.display().to_string());

        let staging = self.staging_dir(id);
        let staged = staging.join(format!("source.{}", upload_extension(&video, upload)));

        if let Err(e) = move_file(upload, &staged).await {
            log.log_error(&e.to_string());
            record_step("ingest", "error", Duration::from_millis(log.elapsed_ms()));
            remove_quietly(&staging).await;
            self.fail(id, VideoStatus::Uploading, ErrorDetail::new(ErrorKind::IngestFailed, e.to_string()))
                .await?;
            return Err(e.into());
        }

        let patch = VideoPatch::new().staged_path(staged.to_string_lossy());
        let video = match self.commit(id, &[VideoStatus::Uploading], VideoStatus::Processing, patch).await {
            Ok(video) => video,
            Err(e) => {
                remove_quietly(&staging).await;
                return Err(e.into());
            }
        };

        record_step("ingest", "success", Duration::from_millis(log.elapsed_ms()));
        log.log_completion("staged for processing");
        self.dispatch_process(id.clone());
        Ok(video)
    }

    /// Start downloading a remote source.
    ///
    /// Expects `Downloading`. The URL is validated before any work starts; an
    /// unsupported one fails the video with `UnsupportedSource`. Returns the
    /// `Downloading` snapshot; the download and processing continue in the
    /// background.
    pub async fn ingest_remote(self: &Arc<Self>, id: &VideoId, url: &str) -> WorkerResult<Video> {
        let video = self.expect_status(id, &[VideoStatus::Downloading]).await?;

        let source = match self.ctx.source_policy.classify(url) {
            Ok(source) => source,
            Err(e) => {
                self.fail(id, VideoStatus::Downloading, ErrorDetail::new(ErrorKind::UnsupportedSource, e.to_string()))
                    .await?;
                return Err(e.into());
            }
        };

        let this = Arc::clone(self);
        let task_id = id.clone();
        self.runner.spawn("ingest_remote", async move {
            match this.fetch_source(&task_id, &source).await {
                Ok(_) => {
                    if let Err(e) = this.process(&task_id).await {
                        debug!(video_id = %task_id, "Processing after download ended with: {}", e);
                    }
                }
                Err(e) => debug!(video_id = %task_id, "Download ended with: {}", e),
            }
        });

        Ok(video)
    }

    /// Download `source` into staging and move the video to `Processing`.
    pub async fn fetch_source(&self, id: &VideoId, source: &RemoteSource) -> WorkerResult<Video> {
        let log = JobLogger::new(id, "ingest_remote");
        let span = log.create_span();
        log.log_start(source.url.as_str());

        let staging = self.staging_dir(id);
        let fetched = self
            .ctx
            .transcoder
            .fetch_remote(source, &staging, "source")
            .instrument(span)
            .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                log.log_error(&e.to_string());
                record_step("ingest", "error", Duration::from_millis(log.elapsed_ms()));
                remove_quietly(&staging).await;
                let detail = ErrorDetail::new(ingest_error_kind(&e), e.to_string());
                self.fail(id, VideoStatus::Downloading, detail).await?;
                return Err(e.into());
            }
        };

        let patch = VideoPatch::new().staged_path(fetched.path.to_string_lossy());
        match self.commit(id, &[VideoStatus::Downloading], VideoStatus::Processing, patch).await {
            Ok(video) => {
                record_step("ingest", "success", Duration::from_millis(log.elapsed_ms()));
                log.log_completion(&format!("downloaded {} bytes", fetched.size_bytes));
                Ok(video)
            }
            Err(e) => {
                remove_quietly(&staging).await;
                Err(e.into())
            }
        }
    }

    /// Re-dispatch processing for a video already in `Processing`.
    pub async fn start_process(self: &Arc<Self>, id: &VideoId) -> WorkerResult<Video> {
        let video = self.expect_status(id, &[VideoStatus::Processing]).await?;
        self.dispatch_process(id.clone());
        Ok(video)
    }

    fn dispatch_process(self: &Arc<Self>, id: VideoId) {
        let this = Arc::clone(self);
        self.runner.spawn("process", async move {
            if let Err(e) = this.process(&id).await {
                debug!(video_id = %id, "Processing ended with: {}", e);
            }
        });
    }

    /// Normalize, transcribe and store the staged media.
    ///
    /// Expects `Processing`. Transient transcode failures are retried with
    /// backoff; once the budget is spent, or on a permanent failure, the
    /// video moves to `Error{ProcessingFailed}` with the stage failure as
    /// cause. When two calls race, the loser's final transition observes
    /// `Conflict`.
    pub async fn process(&self, id: &VideoId) -> WorkerResult<Video> {
        let video = self.expect_status(id, &[VideoStatus::Processing]).await?;
        let log = JobLogger::new(id, "process");
        log.log_start("normalize and transcribe");
        let started = Instant::now();

        let result = self.transcode_and_store(&video, &log).instrument(log.create_span()).await;

        match result {
            Ok(patch) => {
                let video = self.commit(id, &[VideoStatus::Processing], VideoStatus::Ready, patch).await?;
                remove_quietly(self.staging_dir(id)).await;
                record_step("process", "success", started.elapsed());
                log.log_completion(&format!(
                    "duration {:.1}s, {} transcript segments",
                    video.duration_seconds.unwrap_or_default(),
                    video.transcript.as_ref().map_or(0, Vec::len)
                ));
                Ok(video)
            }
            Err(e) => {
                record_step("process", "error", started.elapsed());
                log.log_error(&e.to_string());

                let mut detail = ErrorDetail::new(ErrorKind::ProcessingFailed, e.to_string());
                if let Some(cause) = e.error_kind() {
                    detail = detail.with_cause(cause);
                }
                self.fail(id, VideoStatus::Processing, detail).await?;
                remove_quietly(self.staging_dir(id)).await;
                Err(e)
            }
        }
    }

    async fn transcode_and_store(&self, video: &Video, log: &JobLogger) -> WorkerResult<VideoPatch> {
        let staged = video
            .staged_path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| MediaError::internal("No staged file to process"))?;

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let work = tempfile::Builder::new()
            .prefix(&format!("process-{}-", video.id))
            .tempdir_in(&self.config.work_dir)?;

        let retry = RetryConfig::new("transcode")
            .with_max_retries(self.config.process_max_retries)
            .with_base_delay(self.config.process_retry_base);
        let (staged, work_dir) = (&staged, work.path());

        let output = retry_when(&retry, MediaError::is_retryable, move || async move {
            self.ctx.transcoder.normalize_and_transcribe(staged, work_dir).await
        })
        .await
        .map_err(|(e, attempts)| {
            if attempts > 1 {
                log.log_warning(&format!("giving up after {} attempts", attempts));
            }
            e
        })?;

        log.log_progress("storing normalized media");
        let stored = self.ctx.media.put(&video.id, &output.normalized_path).await?;

        Ok(VideoPatch::new()
            .stored_file(stored.location, stored.size_bytes)
            .duration_seconds(output.duration_seconds)
            .transcript(output.transcript)
            .clear_staged_path())
    }

    /// Generate candidates of one content kind and fold them into the
    /// video's history.
    ///
    /// Plain generation and refinement (requirements and/or a prior
    /// candidate) are the same call. Overlapping calls on one video are
    /// allowed; the video returns to `Ready` when the last one finishes,
    /// whether or not generation succeeded. Failures are recorded in
    /// `last_step_error` and returned, never as `Error` status.
    ///
    /// Once the video is claimed the work runs on the task runner, so a
    /// caller that stops waiting never strands it in `Generating`.
    pub async fn generate(self: &Arc<Self>, request: GenerationRequest) -> WorkerResult<Video> {
        let id = &request.video_id;
        let expected = [VideoStatus::Ready, VideoStatus::Generating];
        let video = self.expect_status(id, &expected).await?;

        let transcript = video
            .transcript
            .as_deref()
            .filter(|segments| !segments.is_empty())
            .ok_or_else(|| WorkerError::invalid_request("Video has no transcript to generate from"))?;
        let excerpt = render_excerpt(transcript, self.config.transcript_excerpt_chars);
        let api_key = self.user_api_key(&video.owner_id).await;

        let this = Arc::clone(self);
        self.runner
            .spawn_tracked("generate", async move { this.run_generation(request, excerpt, api_key).await })
            .await
            .map_err(|e| WorkerError::TaskFailed(e.to_string()))?
    }

    /// The owner's own key when one is stored and active. A lookup failure
    /// falls back to the server key.
    async fn user_api_key(&self, owner_id: &str) -> Option<String> {
        match self.ctx.api_keys.get(owner_id).await {
            Ok(key) => key.and_then(|k| k.active_key().map(str::to_string)),
            Err(e) => {
                warn!(owner_id, "Could not load user API key, using server key: {}", e);
                None
            }
        }
    }

    async fn run_generation(
        &self,
        request: GenerationRequest,
        excerpt: String,
        api_key: Option<String>,
    ) -> WorkerResult<Video> {
        let id = &request.video_id;
        let expected = [VideoStatus::Ready, VideoStatus::Generating];

        let log = JobLogger::new(id, "generate");
        log.log_start(&format!(
            "{}{}{}",
            request.kind,
            if request.is_refinement() { " (refinement)" } else { "" },
            if api_key.is_some() { " with user key" } else { "" }
        ));
        let started = Instant::now();

        self.commit(id, &expected, VideoStatus::Generating, VideoPatch::new().begin_generation())
            .await?;

        let result = self
            .ctx
            .generator
            .generate(
                request.kind,
                &excerpt,
                request.prior_candidate.as_deref(),
                request.requirements.as_deref(),
                api_key.as_deref(),
            )
            .instrument(log.create_span())
            .await;

        let (patch, outcome) = match result {
            Ok(candidates) => {
                let count = candidates.len();
                let entry = GenerationEntry::new(candidates, request.requirements.clone(), request.prior_candidate.clone());
                let patch = VideoPatch::new()
                    .end_generation()
                    .clear_step_error()
                    .append_content(request.kind, entry);
                (patch, Ok(count))
            }
            Err(e) => {
                let detail = ErrorDetail::new(ErrorKind::GenerationFailed, e.to_string());
                (VideoPatch::new().end_generation().step_error(detail), Err(e))
            }
        };

        let video = self
            .commit(id, &[VideoStatus::Generating], VideoStatus::Ready, patch)
            .await?;

        match outcome {
            Ok(count) => {
                record_step("generate", "success", started.elapsed());
                log.log_completion(&format!("{} {} candidate(s)", count, request.kind));
                Ok(video)
            }
            Err(e) => {
                record_step("generate", "error", started.elapsed());
                log.log_error(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Publish in the background.
    ///
    /// The status check, token refresh and claim happen before returning, so
    /// a conflict or credential problem is reported immediately. Returns the
    /// `Publishing` snapshot.
    pub async fn start_publish(self: &Arc<Self>, id: &VideoId, options: PublishOptions) -> WorkerResult<Video> {
        let (video, token) = self.begin_publish(id).await?;
        let snapshot = video.clone();

        let this = Arc::clone(self);
        self.runner.spawn("publish", async move {
            if let Err(e) = this.finish_publish(video, token, options).await {
                debug!("Publish ended with: {}", e);
            }
        });
        Ok(snapshot)
    }

    /// Upload the processed video to YouTube and record where it went.
    ///
    /// Expects `Ready` and a usable credential for the owner. A video in any
    /// other status fails with `Conflict` before the platform is contacted.
    /// Failures return the video to `Ready` with `last_step_error` set.
    pub async fn publish(&self, id: &VideoId, options: PublishOptions) -> WorkerResult<Video> {
        let (video, token) = self.begin_publish(id).await?;
        self.finish_publish(video, token, options).await
    }

    async fn begin_publish(&self, id: &VideoId) -> WorkerResult<(Video, YouTubeToken)> {
        let video = self.expect_status(id, &[VideoStatus::Ready]).await?;

        if video.file_path.is_none() {
            let err = WorkerError::MediaMissing(id.clone());
            self.record_step_error(id, &err).await;
            return Err(err);
        }

        let token = match self.ctx.token_manager.ensure_live_token(&video.owner_id).await {
            Ok(token) => token,
            Err(e) => {
                let err = WorkerError::from(e);
                warn!(video_id = %id, reauthorize = err.requires_reauthorization(), "No usable YouTube credential: {}", err);
                self.record_step_error(id, &err).await;
                return Err(err);
            }
        };

        let video = self
            .commit(id, &[VideoStatus::Ready], VideoStatus::Publishing, VideoPatch::new())
            .await?;
        Ok((video, token))
    }

    async fn finish_publish(&self, video: Video, token: YouTubeToken, options: PublishOptions) -> WorkerResult<Video> {
        let id = &video.id;
        let log = JobLogger::new(id, "publish");
        let started = Instant::now();

        let metadata = PublishMetadata::resolve(&video, &options, Utc::now());
        log.log_start(&format!("\"{}\" as {}", metadata.title, metadata.privacy_status));

        let uploaded = self
            .upload(&video, &token, &metadata)
            .instrument(log.create_span())
            .await;

        match uploaded {
            Ok(external_id) => {
                self.publish_follow_ups(&log, &token, &metadata, &external_id).await;

                let target = PublishTarget {
                    external_video_id: external_id,
                    privacy_status: metadata.privacy_status,
                    publish_at: metadata.publish_at,
                    published_at: Utc::now(),
                };
                let patch = VideoPatch::new().publish_target(target.clone()).clear_step_error();
                let video = self
                    .commit(id, &[VideoStatus::Publishing], VideoStatus::Published, patch)
                    .await?;

                record_step("publish", "success", started.elapsed());
                log.log_completion(&target.watch_url());
                Ok(video)
            }
            Err(e) => {
                record_step("publish", "error", started.elapsed());
                log.log_error(&e.to_string());

                let kind = e.error_kind().unwrap_or(ErrorKind::UploadFailed);
                let patch = VideoPatch::new().step_error(ErrorDetail::new(kind, e.to_string()));
                self.commit(id, &[VideoStatus::Publishing], VideoStatus::Ready, patch)
                    .await?;
                Err(e)
            }
        }
    }

    async fn upload(&self, video: &Video, token: &YouTubeToken, metadata: &PublishMetadata) -> WorkerResult<String> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("publish-{}-", video.id))
            .tempdir_in(&self.config.work_dir)?;

        let media = self
            .ctx
            .media
            .get(&video.id, scratch.path())
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    WorkerError::MediaMissing(video.id.clone())
                } else {
                    e.into()
                }
            })?;

        Ok(self.ctx.platform.upload(token, &media, metadata).await?)
    }

    /// Thumbnail and playlist are best effort once the upload exists.
    async fn publish_follow_ups(&self, log: &JobLogger, token: &YouTubeToken, metadata: &PublishMetadata, external_id: &str) {
        if let Some(url) = &metadata.thumbnail_url {
            if let Err(e) = self.ctx.platform.set_thumbnail(token, external_id, url).await {
                log.log_warning(&format!("thumbnail not set: {}", e));
            }
        }
        if let Some(playlist_id) = &metadata.playlist_id {
            if let Err(e) = self.ctx.platform.add_to_playlist(token, playlist_id, external_id).await {
                log.log_warning(&format!("not added to playlist {}: {}", playlist_id, e));
            }
        }
    }

    /// Note a non-terminal publish failure on a video that stays `Ready`.
    async fn record_step_error(&self, id: &VideoId, err: &WorkerError) {
        let kind = err.error_kind().unwrap_or(ErrorKind::UploadFailed);
        let patch = VideoPatch::new().step_error(ErrorDetail::new(kind, err.to_string()));
        if let Err(e) = self.commit(id, &[VideoStatus::Ready], VideoStatus::Ready, patch).await {
            debug!(video_id = %id, "Step error not recorded: {}", e);
        }
    }

    async fn expect_status(&self, id: &VideoId, expected: &[VideoStatus]) -> WorkerResult<Video> {
        let video = self.ctx.videos.get(id).await?;
        if !expected.contains(&video.status) {
            return Err(StateError::conflict(id, expected, video.status).into());
        }
        Ok(video)
    }

    /// CAS transition, retrying only backend failures.
    async fn commit(
        &self,
        id: &VideoId,
        expected: &[VideoStatus],
        status: VideoStatus,
        patch: VideoPatch,
    ) -> StateResult<Video> {
        let retry = RetryConfig::new("state_commit")
            .with_max_retries(COMMIT_RETRIES)
            .with_base_delay(COMMIT_RETRY_BASE);

        retry_when(
            &retry,
            |e: &StateError| matches!(e, StateError::Backend(_)),
            || self.ctx.videos.transition(id, expected, status, patch.clone()),
        )
        .await
        .map_err(|(e, _)| e)
    }

    async fn fail(&self, id: &VideoId, from: VideoStatus, detail: ErrorDetail) -> StateResult<Video> {
        let patch = VideoPatch::new().error(detail).clear_staged_path();
        self.commit(id, &[from], VideoStatus::Error, patch).await
    }

    fn staging_dir(&self, id: &VideoId) -> PathBuf {
        self.config.staging_dir.join(id.as_str())
    }
}

/// Extension for the staged copy, from the original file name when known.
fn upload_extension(video: &Video, upload: &Path) -> String {
    let from_name = match &video.source {
        VideoSource::UploadedFile { original_name, .. } => Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string),
        VideoSource::RemoteUrl { .. } => None,
    };

    from_name
        .or_else(|| upload.extension().and_then(|e| e.to_str()).map(str::to_string))
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string())
}

fn ingest_error_kind(e: &MediaError) -> ErrorKind {
    match e.error_kind() {
        kind @ (ErrorKind::SourceTooLarge | ErrorKind::DownloadTimeout | ErrorKind::UnsupportedSource) => kind,
        _ => ErrorKind::IngestFailed,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use tubeflow_models::{ContentKind, PrivacyStatus, UserApiKey};
    use tubeflow_state::{ApiKeyStore, TokenStore, VideoStore};

    use super::*;
    use crate::testing::{harness, Harness, TranscodeOutcome};

    const IDLE: Duration = Duration::from_secs(5);

    async fn uploaded_video(h: &Harness) -> (Video, PathBuf) {
        let upload = h.dir.path().join("incoming.bin");
        tokio::fs::write(&upload, vec![3u8; 2048]).await.unwrap();
        let video = h
            .orchestrator
            .register("user-1", VideoSource::uploaded(upload.to_string_lossy(), "talk.MOV"))
            .await
            .unwrap();
        (video, upload)
    }

    async fn ready_video(h: &Harness) -> Video {
        let (video, upload) = uploaded_video(h).await;
        h.orchestrator.ingest_upload(&video.id, &upload).await.unwrap();
        assert!(h.orchestrator.runner().wait_idle(IDLE).await);
        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        video
    }

    async fn connect_channel(h: &Harness, expires_in: ChronoDuration) {
        h.tokens
            .upsert(YouTubeToken::new("user-1", "access-0", "refresh-0", Utc::now() + expires_in))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_sets_retention_deadline() {
        let h = harness();
        let (video, _) = uploaded_video(&h).await;

        assert_eq!(video.status, VideoStatus::Uploading);
        let deadline = video.cleanup_deadline.unwrap();
        assert_eq!(deadline - video.created_at, ChronoDuration::minutes(30));
    }

    #[tokio::test]
    async fn test_unsupported_url_never_enters_downloading() {
        let h = harness();
        let video = h
            .orchestrator
            .register("user-1", VideoSource::remote("https://example.com/page.html"))
            .await
            .unwrap();

        assert_eq!(video.status, VideoStatus::Error);
        assert_eq!(video.error_detail.unwrap().kind, ErrorKind::UnsupportedSource);
        assert_eq!(h.videos.get(&video.id).await.unwrap().status, VideoStatus::Error);

        let err = h.orchestrator.ingest_remote(&video.id, "https://example.com/page.html").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(h.transcoder.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_round_trip() {
        let h = harness();
        let (video, upload) = uploaded_video(&h).await;

        let snapshot = h.orchestrator.ingest_upload(&video.id, &upload).await.unwrap();
        assert_eq!(snapshot.status, VideoStatus::Processing);
        assert!(snapshot.staged_path.as_deref().unwrap().ends_with("source.mov"));
        assert!(!upload.exists());

        assert!(h.orchestrator.runner().wait_idle(IDLE).await);
        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(video.duration_seconds, Some(crate::testing::FAKE_DURATION));
        assert!(!video.transcript.unwrap().is_empty());
        assert!(video.staged_path.is_none());
        assert_eq!(video.file_size, Some(crate::testing::FAKE_MEDIA.len() as u64));
        assert!(h.media_exists(&video.id).await);
        assert!(!h.orchestrator.config().staging_dir.join(video.id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_missing_upload_fails_ingest() {
        let h = harness();
        let (video, upload) = uploaded_video(&h).await;
        tokio::fs::remove_file(&upload).await.unwrap();

        assert!(h.orchestrator.ingest_upload(&video.id, &upload).await.is_err());
        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Error);
        assert_eq!(video.error_detail.unwrap().kind, ErrorKind::IngestFailed);
    }

    #[tokio::test]
    async fn test_remote_ingest_downloads_then_processes() {
        let h = harness();
        let url = "https://cdn.example.com/talk.mp4";
        let video = h.orchestrator.register("user-1", VideoSource::remote(url)).await.unwrap();
        assert_eq!(video.status, VideoStatus::Downloading);

        let snapshot = h.orchestrator.ingest_remote(&video.id, url).await.unwrap();
        assert_eq!(snapshot.status, VideoStatus::Downloading);

        assert!(h.orchestrator.runner().wait_idle(IDLE).await);
        assert_eq!(h.videos.get(&video.id).await.unwrap().status, VideoStatus::Ready);
        assert_eq!(h.transcoder.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_oversized_download_is_terminal() {
        let h = harness();
        let url = "https://cdn.example.com/huge.mp4";
        let video = h.orchestrator.register("user-1", VideoSource::remote(url)).await.unwrap();

        h.orchestrator.ingest_remote(&video.id, url).await.unwrap();
        assert!(h.orchestrator.runner().wait_idle(IDLE).await);

        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Error);
        assert_eq!(video.error_detail.unwrap().kind, ErrorKind::SourceTooLarge);
        assert_eq!(h.transcoder.transcode_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_transcode_failure_is_retried() {
        let h = harness();
        h.transcoder.script([TranscodeOutcome::Transient, TranscodeOutcome::Ok]);

        let video = ready_video(&h).await;
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(h.transcoder.transcode_calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails_processing() {
        let h = harness();
        h.transcoder.script([TranscodeOutcome::Transient; 3]);
        let (video, upload) = uploaded_video(&h).await;

        h.orchestrator.ingest_upload(&video.id, &upload).await.unwrap();
        assert!(h.orchestrator.runner().wait_idle(IDLE).await);

        let video = h.videos.get(&video.id).await.unwrap();
        let detail = video.error_detail.unwrap();
        assert_eq!(video.status, VideoStatus::Error);
        assert_eq!(detail.kind, ErrorKind::ProcessingFailed);
        assert_eq!(detail.cause, Some(ErrorKind::TranscodeFailed));
        // Default budget: two retries after the first attempt.
        assert_eq!(h.transcoder.transcode_calls(), 3);
    }

    #[tokio::test]
    async fn test_transcription_failure_is_not_retried() {
        let h = harness();
        h.transcoder.script([TranscodeOutcome::Silent]);
        let (video, upload) = uploaded_video(&h).await;

        h.orchestrator.ingest_upload(&video.id, &upload).await.unwrap();
        assert!(h.orchestrator.runner().wait_idle(IDLE).await);

        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.error_detail.unwrap().cause, Some(ErrorKind::TranscriptionFailed));
        assert_eq!(h.transcoder.transcode_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_process_has_one_winner() {
        let h = harness();
        h.transcoder.set_delay(Duration::from_millis(50));
        let (video, upload) = uploaded_video(&h).await;

        // Stage without dispatching so both calls start from Processing.
        let staged = h.dir.path().join("staged.mov");
        tokio::fs::rename(&upload, &staged).await.unwrap();
        h.videos
            .transition(
                &video.id,
                &[VideoStatus::Uploading],
                VideoStatus::Processing,
                VideoPatch::new().staged_path(staged.to_string_lossy()),
            )
            .await
            .unwrap();

        let (a, b) = tokio::join!(h.orchestrator.process(&video.id), h.orchestrator.process(&video.id));

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_ok() { b.unwrap_err() } else { a.unwrap_err() };
        assert!(loser.is_conflict(), "unexpected error: {}", loser);
        assert_eq!(h.videos.get(&video.id).await.unwrap().status, VideoStatus::Ready);
    }

    #[tokio::test]
    async fn test_process_requires_processing_status() {
        let h = harness();
        let video = ready_video(&h).await;

        let err = h.orchestrator.process(&video.id).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(h.videos.get(&video.id).await.unwrap(), video);
    }

    #[tokio::test]
    async fn test_generate_appends_history() {
        let h = harness();
        let video = ready_video(&h).await;

        h.orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Title))
            .await
            .unwrap();
        let video = h
            .orchestrator
            .generate(
                GenerationRequest::new(video.id.clone(), ContentKind::Title)
                    .with_requirements("shorter")
                    .with_prior_candidate("First title"),
            )
            .await
            .unwrap();

        assert_eq!(video.status, VideoStatus::Ready);
        let history = &video.generated_content[&ContentKind::Title];
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].requirements.as_deref(), Some("shorter"));
        assert_eq!(history[1].prior_candidate.as_deref(), Some("First title"));

        let (excerpt, prior, requirements) = h.generator.last_call().unwrap();
        assert!(excerpt.starts_with("[00:00]"));
        assert_eq!(prior.as_deref(), Some("First title"));
        assert_eq!(requirements.as_deref(), Some("shorter"));
    }

    #[tokio::test]
    async fn test_generation_failure_returns_to_ready() {
        let h = harness();
        let video = ready_video(&h).await;
        h.generator.fail_next();

        let err = h
            .orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Description))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), Some(ErrorKind::GenerationFailed));

        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert!(video.error_detail.is_none());
        assert_eq!(video.last_step_error.unwrap().kind, ErrorKind::GenerationFailed);
        assert!(video.generated_content.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_generations_end_ready() {
        let h = harness();
        h.generator.set_delay(Duration::from_millis(30));
        let video = ready_video(&h).await;

        let (a, b) = tokio::join!(
            h.orchestrator.generate(GenerationRequest::new(video.id.clone(), ContentKind::Title)),
            h.orchestrator.generate(GenerationRequest::new(video.id.clone(), ContentKind::Timestamps)),
        );
        a.unwrap();
        b.unwrap();

        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(video.active_generations, 0);
        assert_eq!(video.generated_content.len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_generation_still_finishes() {
        let h = harness();
        h.generator.set_delay(Duration::from_millis(300));
        let video = ready_video(&h).await;

        let call = h
            .orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Title));
        assert!(tokio::time::timeout(Duration::from_millis(50), call).await.is_err());

        assert!(h.orchestrator.runner().wait_idle(Duration::from_secs(5)).await);
        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(video.active_generations, 0);
        assert_eq!(video.generated_content[&ContentKind::Title].len(), 1);
    }

    #[tokio::test]
    async fn test_generation_uses_owner_key() {
        let h = harness();
        let video = ready_video(&h).await;

        h.orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Title))
            .await
            .unwrap();
        assert_eq!(h.generator.last_api_key(), None);

        h.api_keys
            .upsert(UserApiKey::new(video.owner_id.clone(), "AIzaSyOwnerKey000000"))
            .await
            .unwrap();
        h.orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Title))
            .await
            .unwrap();
        assert_eq!(h.generator.last_api_key().as_deref(), Some("AIzaSyOwnerKey000000"));

        let paused = h.api_keys.get(&video.owner_id).await.unwrap().unwrap().updated(None, Some(false));
        h.api_keys.upsert(paused).await.unwrap();
        h.orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Title))
            .await
            .unwrap();
        assert_eq!(h.generator.last_api_key(), None);
    }

    #[tokio::test]
    async fn test_publish_requires_ready() {
        let h = harness();
        connect_channel(&h, ChronoDuration::hours(1)).await;
        let (video, _) = uploaded_video(&h).await;

        let err = h.orchestrator.publish(&video.id, PublishOptions::default()).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(h.platform.upload_calls(), 0);
        assert_eq!(h.refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_publish_success() {
        let h = harness();
        connect_channel(&h, ChronoDuration::hours(1)).await;
        let video = ready_video(&h).await;
        h.orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Thumbnail))
            .await
            .unwrap();

        let options = PublishOptions {
            privacy_status: PrivacyStatus::Unlisted,
            playlist_id: Some("PL1".into()),
            ..Default::default()
        };
        let video = h.orchestrator.publish(&video.id, options).await.unwrap();

        assert_eq!(video.status, VideoStatus::Published);
        let target = video.publish_target.unwrap();
        assert_eq!(target.external_video_id, "yt-1");
        assert_eq!(target.privacy_status, PrivacyStatus::Unlisted);
        assert_eq!(h.platform.upload_calls(), 1);
        assert_eq!(h.platform.thumbnail_calls(), 1);
        assert_eq!(h.platform.playlist_calls(), 1);
        // Token was still live: no refresh.
        assert_eq!(h.refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_publish_refreshes_expiring_token() {
        let h = harness();
        connect_channel(&h, ChronoDuration::minutes(1)).await;
        let video = ready_video(&h).await;

        h.orchestrator.publish(&video.id, PublishOptions::default()).await.unwrap();

        assert_eq!(h.refresher.calls(), 1);
        let stored = h.tokens.get("user-1").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "access-refreshed");
        assert_eq!(h.platform.last_access_token().as_deref(), Some("access-refreshed"));
    }

    #[tokio::test]
    async fn test_upload_failure_returns_to_ready() {
        let h = harness();
        connect_channel(&h, ChronoDuration::hours(1)).await;
        let video = ready_video(&h).await;
        h.platform.fail_uploads();

        let err = h.orchestrator.publish(&video.id, PublishOptions::default()).await.unwrap_err();
        assert_eq!(err.error_kind(), Some(ErrorKind::UploadFailed));
        assert!(!err.requires_reauthorization());

        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert!(video.publish_target.is_none());
        assert_eq!(video.last_step_error.unwrap().kind, ErrorKind::UploadFailed);
    }

    #[tokio::test]
    async fn test_revoked_credential_prompts_reauthorization() {
        let h = harness();
        connect_channel(&h, ChronoDuration::seconds(-10)).await;
        h.refresher.revoke();
        let video = ready_video(&h).await;

        let err = h.orchestrator.publish(&video.id, PublishOptions::default()).await.unwrap_err();

        assert!(err.requires_reauthorization());
        assert_eq!(h.platform.upload_calls(), 0);
        let video = h.videos.get(&video.id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(video.last_step_error.unwrap().kind, ErrorKind::TokenRefreshFailed);
    }

    #[tokio::test]
    async fn test_thumbnail_failure_does_not_fail_publish() {
        let h = harness();
        connect_channel(&h, ChronoDuration::hours(1)).await;
        let video = ready_video(&h).await;
        h.orchestrator
            .generate(GenerationRequest::new(video.id.clone(), ContentKind::Thumbnail))
            .await
            .unwrap();
        h.platform.fail_thumbnails();

        let video = h.orchestrator.publish(&video.id, PublishOptions::default()).await.unwrap();
        assert_eq!(video.status, VideoStatus::Published);
        assert!(video.last_step_error.is_none());
    }

    #[tokio::test]
    async fn test_start_publish_returns_publishing_snapshot() {
        let h = harness();
        connect_channel(&h, ChronoDuration::hours(1)).await;
        let video = ready_video(&h).await;

        let snapshot = h
            .orchestrator
            .start_publish(&video.id, PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(snapshot.status, VideoStatus::Publishing);

        assert!(h.orchestrator.runner().wait_idle(IDLE).await);
        assert_eq!(h.videos.get(&video.id).await.unwrap().status, VideoStatus::Published);
    }

    #[test]
    fn test_upload_extension() {
        let video = Video::new("u", VideoSource::uploaded("/tmp/x", "My Talk.MKV"));
        assert_eq!(upload_extension(&video, Path::new("/tmp/x")), "mkv");

        let video = Video::new("u", VideoSource::uploaded("/tmp/x", "noext"));
        assert_eq!(upload_extension(&video, Path::new("/tmp/blob")), "mp4");
        assert_eq!(upload_extension(&video, Path::new("/tmp/blob.webm")), "webm");
    }
}
