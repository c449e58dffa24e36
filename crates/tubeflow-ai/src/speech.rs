//! Speech-to-text through Gemini audio understanding.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tracing::info;
use tubeflow_media::{MediaError, MediaResult, SpeechToText};
use tubeflow_models::TranscriptSegment;

use crate::error::{AiError, AiResult};
use crate::gemini::{GeminiClient, Part};

const TRANSCRIBE_PROMPT: &str = r#"Transcribe the speech in this audio verbatim, in the spoken language.
Split it into segments of one or two sentences. Give each segment's start and end in seconds from the beginning of the audio.
Return ONLY JSON: {"segments": [{"start": 0.0, "end": 4.2, "text": "..."}]}
Return {"segments": []} if there is no intelligible speech."#;

#[derive(Debug, Deserialize)]
struct TranscriptReply {
    #[serde(default)]
    segments: Vec<SegmentReply>,
}

#[derive(Debug, Deserialize)]
struct SegmentReply {
    start: f64,
    end: f64,
    text: String,
}

/// Transcribes extracted audio with a Gemini model.
#[derive(Clone)]
pub struct GeminiSpeechToText {
    client: GeminiClient,
}

impl GeminiSpeechToText {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    async fn transcribe_audio(&self, audio: &Path) -> AiResult<Vec<TranscriptSegment>> {
        let size = tokio::fs::metadata(audio).await?.len();
        let limit = self.client.config().max_inline_audio_bytes;
        if size > limit {
            return Err(AiError::invalid_input(format!(
                "Audio is {} bytes, inline limit is {}",
                size, limit
            )));
        }

        let data = STANDARD.encode(tokio::fs::read(audio).await?);
        let parts = [Part::inline("audio/mp3", data), Part::text(TRANSCRIBE_PROMPT)];
        let reply: TranscriptReply = self.client.generate_json("transcribe", &parts).await?;

        let segments = to_segments(reply.segments);
        info!(audio = %audio.display(), segments = segments.len(), "Transcribed audio");
        Ok(segments)
    }
}

/// Convert to milliseconds, dropping empty text and ordering by start.
fn to_segments(raw: Vec<SegmentReply>) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = raw
        .into_iter()
        .filter(|s| !s.text.trim().is_empty() && s.start.is_finite() && s.end.is_finite())
        .map(|s| {
            let start_ms = (s.start.max(0.0) * 1000.0).round() as u64;
            let end_ms = (s.end.max(0.0) * 1000.0).round() as u64;
            TranscriptSegment::new(start_ms, end_ms.max(start_ms), s.text.trim())
        })
        .collect();
    segments.sort_by_key(|s| s.start_ms);
    segments
}

#[async_trait]
impl SpeechToText for GeminiSpeechToText {
    async fn transcribe(&self, audio: &Path) -> MediaResult<Vec<TranscriptSegment>> {
        // Retries already happened inside the client; whatever is left is final.
        self.transcribe_audio(audio)
            .await
            .map_err(|e| MediaError::transcription_failed(e.to_string()))
    }
}
