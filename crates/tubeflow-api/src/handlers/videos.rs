//! Video lifecycle handlers.

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tubeflow_models::{
    ContentKind, ErrorDetail, ErrorKind, GenerationEntry, GenerationRequest, PublishOptions, PublishTarget, Video,
    VideoId, VideoSource, VideoStatus,
};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::security::{
    is_valid_video_id, sanitize_file_name, sanitize_string, MAX_PRIOR_CANDIDATE_LENGTH, MAX_REQUIREMENTS_LENGTH,
};
use crate::state::AppState;

/// Multipart field carrying the media file.
const UPLOAD_FIELD: &str = "file";

/// Client-facing view of a video. Storage locations stay internal.
#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub id: String,
    pub status: VideoStatus,
    pub source: SourceResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_step_error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub has_media: bool,
    pub has_transcript: bool,
    /// Number of generation entries per content kind
    pub content: BTreeMap<ContentKind, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_target: Option<PublishTargetResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceResponse {
    UploadedFile { original_name: String },
    RemoteUrl { url: String },
}

impl From<VideoSource> for SourceResponse {
    fn from(source: VideoSource) -> Self {
        match source {
            VideoSource::UploadedFile { original_name, .. } => SourceResponse::UploadedFile { original_name },
            VideoSource::RemoteUrl { url } => SourceResponse::RemoteUrl { url },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublishTargetResponse {
    #[serde(flatten)]
    pub target: PublishTarget,
    pub watch_url: String,
}

impl From<Video> for VideoResponse {
    fn from(video: Video) -> Self {
        Self {
            id: video.id.to_string(),
            status: video.status,
            source: video.source.into(),
            error: video.error_detail,
            last_step_error: video.last_step_error,
            file_size: video.file_size,
            duration_seconds: video.duration_seconds,
            has_media: video.file_path.is_some(),
            has_transcript: video.transcript.as_ref().is_some_and(|t| !t.is_empty()),
            content: video
                .generated_content
                .iter()
                .map(|(kind, history)| (*kind, history.len()))
                .collect(),
            publish_target: video.publish_target.map(|target| PublishTargetResponse {
                watch_url: target.watch_url(),
                target,
            }),
            created_at: video.created_at,
            updated_at: video.updated_at,
            cleanup_deadline: video.cleanup_deadline,
        }
    }
}

/// Load a video and check that the caller owns it.
///
/// Someone else's video is reported as missing.
async fn load_owned(state: &AppState, user: &AuthUser, video_id: &str) -> ApiResult<Video> {
    if !is_valid_video_id(video_id) {
        return Err(ApiError::bad_request("Invalid video ID format"));
    }

    let video = state.context().videos.get(&VideoId::from(video_id)).await?;
    if video.owner_id != user.uid {
        return Err(ApiError::not_found("Video not found"));
    }
    Ok(video)
}

// ============================================================================
// Ingest
// ============================================================================

/// Accept a multipart upload and start ingest.
pub async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<VideoResponse>)> {
    let uploads_dir = state.orchestrator.config().staging_dir.join("uploads");
    tokio::fs::create_dir_all(&uploads_dir)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to prepare upload directory: {}", e)))?;
    let upload_path = uploads_dir.join(Uuid::new_v4().to_string());

    let mut original_name = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = sanitize_file_name(field.file_name().unwrap_or_default());

        if let Err(e) = receive_upload(field, &upload_path, state.config.max_upload_size).await {
            discard_upload(&upload_path).await;
            return Err(e);
        }
        original_name = Some(name);
        break;
    }

    let Some(original_name) = original_name else {
        return Err(ApiError::bad_request(format!("Missing multipart field '{}'", UPLOAD_FIELD)));
    };

    let source = VideoSource::uploaded(upload_path.to_string_lossy(), original_name);
    let video = match state.orchestrator.register(&user.uid, source).await {
        Ok(video) => video,
        Err(e) => {
            discard_upload(&upload_path).await;
            return Err(e.into());
        }
    };

    let video = state.orchestrator.ingest_upload(&video.id, &upload_path).await?;
    info!(video_id = %video.id, uid = %user.uid, "Upload accepted");

    Ok((StatusCode::ACCEPTED, Json(video.into())))
}

/// Stream one multipart field to disk, enforcing the size cap.
async fn receive_upload(
    mut field: Field<'_>,
    path: &FsPath,
    max_bytes: usize,
) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create upload file: {}", e)))?;

    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(multipart_error)?
    {
        written += chunk.len() as u64;
        if written > max_bytes as u64 {
            return Err(ApiError::PayloadTooLarge(format!(
                "Upload exceeds the {} byte limit",
                max_bytes
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to write upload: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to write upload: {}", e)))?;

    if written == 0 {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }
    Ok(written)
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::bad_request(format!("Malformed upload: {}", err.body_text()))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitUrlRequest {
    #[validate(url, length(max = 2048))]
    pub source_url: String,
}

/// Register a remote URL and start downloading it.
pub async fn submit_url(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SubmitUrlRequest>,
) -> ApiResult<(StatusCode, Json<VideoResponse>)> {
    request.validate()?;
    let url = request.source_url.trim().to_string();

    let video = state.orchestrator.register(&user.uid, VideoSource::remote(&url)).await?;
    if video.status == VideoStatus::Error {
        let message = video
            .error_detail
            .as_ref()
            .map(|d| d.message.clone())
            .unwrap_or_else(|| "Unsupported source URL".to_string());
        return Err(ApiError::pipeline(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::UnsupportedSource,
            message,
        ));
    }

    let video = state.orchestrator.ingest_remote(&video.id, &url).await?;
    info!(video_id = %video.id, uid = %user.uid, "Remote source accepted");

    Ok((StatusCode::ACCEPTED, Json(video.into())))
}

// ============================================================================
// Status and processing
// ============================================================================

pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_owned(&state, &user, &video_id).await?;
    Ok(Json(video.into()))
}

/// Run processing for a video whose staged file is waiting.
pub async fn process_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<(StatusCode, Json<VideoResponse>)> {
    let video = load_owned(&state, &user, &video_id).await?;
    let video = state.orchestrator.start_process(&video.id).await?;
    Ok((StatusCode::ACCEPTED, Json(video.into())))
}

// ============================================================================
// Content generation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub kind: ContentKind,
    #[serde(default)]
    pub requirements: Option<String>,
    /// Candidate from an earlier round to refine
    #[serde(default)]
    pub prior_candidate: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub video_id: String,
    pub kind: ContentKind,
    pub entry: GenerationEntry,
}

/// Generate (or refine) one kind of content. Runs inline.
pub async fn generate_content(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    let video = load_owned(&state, &user, &video_id).await?;

    let mut generation = GenerationRequest::new(video.id.clone(), request.kind);
    if let Some(requirements) = request
        .requirements
        .as_deref()
        .map(|r| sanitize_string(r, MAX_REQUIREMENTS_LENGTH))
        .filter(|r| !r.is_empty())
    {
        generation = generation.with_requirements(requirements);
    }
    if let Some(prior) = request
        .prior_candidate
        .as_deref()
        .map(|p| sanitize_string(p, MAX_PRIOR_CANDIDATE_LENGTH))
        .filter(|p| !p.is_empty())
    {
        generation = generation.with_prior_candidate(prior);
    }

    let updated = state.orchestrator.generate(generation).await?;
    let entry = updated
        .latest_content(request.kind)
        .cloned()
        .ok_or_else(|| ApiError::internal("Generated content was not recorded"))?;

    Ok(Json(GenerateResponse {
        video_id: updated.id.to_string(),
        kind: request.kind,
        entry,
    }))
}

#[derive(Debug, Serialize)]
pub struct ContentHistoryResponse {
    pub video_id: String,
    pub content: BTreeMap<ContentKind, Vec<GenerationEntry>>,
}

/// Full generation history, oldest first per kind.
pub async fn get_content(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<ContentHistoryResponse>> {
    let video = load_owned(&state, &user, &video_id).await?;
    Ok(Json(ContentHistoryResponse {
        video_id: video.id.to_string(),
        content: video.generated_content,
    }))
}

// ============================================================================
// Publishing
// ============================================================================

pub async fn publish_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
    body: Option<Json<PublishOptions>>,
) -> ApiResult<(StatusCode, Json<VideoResponse>)> {
    let video = load_owned(&state, &user, &video_id).await?;
    let options = body.map(|Json(options)| options).unwrap_or_default();

    let video = state.orchestrator.start_publish(&video.id, options).await?;
    info!(video_id = %video.id, uid = %user.uid, "Publish started");
    Ok((StatusCode::ACCEPTED, Json(video.into())))
}

// ============================================================================
// Cleanup
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ScheduleCleanupRequest {
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Relative alternative to `deadline`
    #[serde(default)]
    pub delay_secs: Option<u64>,
}

impl ScheduleCleanupRequest {
    fn resolve(&self, now: DateTime<Utc>) -> ApiResult<DateTime<Utc>> {
        match (self.deadline, self.delay_secs) {
            (Some(deadline), None) => Ok(deadline),
            (None, Some(secs)) => i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| ApiError::bad_request("delay_secs is out of range")),
            _ => Err(ApiError::bad_request("Provide exactly one of deadline or delay_secs")),
        }
    }
}

pub async fn schedule_cleanup(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
    Json(request): Json<ScheduleCleanupRequest>,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_owned(&state, &user, &video_id).await?;
    let deadline = request.resolve(Utc::now())?;

    let video = state.cleanup.schedule_cleanup(&video.id, deadline).await?;
    Ok(Json(video.into()))
}

pub async fn cancel_cleanup(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<VideoResponse>> {
    let video = load_owned(&state, &user, &video_id).await?;
    let video = state.cleanup.cancel_cleanup(&video.id).await?;
    Ok(Json(video.into()))
}

/// Remove an abandoned upload file, logging instead of failing.
async fn discard_upload(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "Failed to remove abandoned upload: {}", e);
    }
}
