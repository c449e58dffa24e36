//! Normalize-then-transcribe pipeline and the seams the worker depends on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use tubeflow_models::TranscriptSegment;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};
use crate::fetch::{FetchedMedia, RemoteFetcher};
use crate::fs_utils::remove_quietly;
use crate::probe::probe_media;
use crate::source::RemoteSource;

/// Result of a successful transcode.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    pub normalized_path: PathBuf,
    pub duration_seconds: f64,
    pub transcript: Vec<TranscriptSegment>,
}

/// Turns extracted speech audio into timed segments.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> MediaResult<Vec<TranscriptSegment>>;
}

/// Media work the pipeline needs: normalizing sources and fetching remote ones.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Normalize `source` into `work_dir` and transcribe it.
    async fn normalize_and_transcribe(&self, source: &Path, work_dir: &Path) -> MediaResult<TranscodeOutput>;

    /// Download a classified remote source into `dest_dir`.
    async fn fetch_remote(&self, source: &RemoteSource, dest_dir: &Path, file_stem: &str)
        -> MediaResult<FetchedMedia>;
}

/// FFmpeg-backed transcoder.
pub struct FfmpegTranscoder {
    runner: FfmpegRunner,
    fetcher: RemoteFetcher,
    speech: Arc<dyn SpeechToText>,
}

impl FfmpegTranscoder {
    pub fn new(config: MediaConfig, speech: Arc<dyn SpeechToText>) -> MediaResult<Self> {
        Ok(Self {
            runner: FfmpegRunner::new().with_timeout(config.ffmpeg_timeout),
            fetcher: RemoteFetcher::new(config)?,
            speech,
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn normalize_and_transcribe(&self, source: &Path, work_dir: &Path) -> MediaResult<TranscodeOutput> {
        if !source.exists() {
            return Err(MediaError::FileNotFound(source.to_path_buf()));
        }
        tokio::fs::create_dir_all(work_dir).await?;

        let normalized = work_dir.join("normalized.mp4");
        self.runner.run(&FfmpegCommand::normalize(source, &normalized)).await?;

        let info = probe_media(&normalized).await?;
        if !info.has_audio {
            return Err(MediaError::transcription_failed("Video has no audio track"));
        }

        let audio = work_dir.join("speech.mp3");
        self.runner.run(&FfmpegCommand::extract_audio(&normalized, &audio)).await?;

        let transcribed = self.speech.transcribe(&audio).await;
        remove_quietly(&audio).await;
        let transcript = transcribed?;

        if transcript.iter().all(|s| s.text.trim().is_empty()) {
            return Err(MediaError::transcription_failed("No speech detected"));
        }

        info!(
            source = %source.display(),
            duration = info.duration,
            segments = transcript.len(),
            "Normalized and transcribed video"
        );

        Ok(TranscodeOutput {
            normalized_path: normalized,
            duration_seconds: info.duration,
            transcript,
        })
    }

    async fn fetch_remote(
        &self,
        source: &RemoteSource,
        dest_dir: &Path,
        file_stem: &str,
    ) -> MediaResult<FetchedMedia> {
        self.fetcher.fetch(source, dest_dir, file_stem).await
    }
}
