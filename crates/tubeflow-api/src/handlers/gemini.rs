//! Per-user Gemini key handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use tubeflow_models::UserApiKey;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Key summary. Only a masked preview of the key is ever returned.
#[derive(Debug, Serialize)]
pub struct ApiKeyStatusResponse {
    pub has_key: bool,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Option<&UserApiKey>> for ApiKeyStatusResponse {
    fn from(key: Option<&UserApiKey>) -> Self {
        match key {
            Some(key) => Self {
                has_key: true,
                is_active: key.is_active,
                key_preview: Some(key.preview()),
                updated_at: Some(key.updated_at),
            },
            None => Self {
                has_key: false,
                is_active: false,
                key_preview: None,
                updated_at: None,
            },
        }
    }
}

/// Set the key, toggle it, or both. A first call must carry `api_key`.
#[derive(Debug, Deserialize, Validate)]
pub struct SetApiKeyRequest {
    #[validate(length(min = 10, max = 1000))]
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

pub async fn api_key_status(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<ApiKeyStatusResponse>> {
    let key = state.context().api_keys.get(&user.uid).await?;
    Ok(Json(key.as_ref().into()))
}

pub async fn set_api_key(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SetApiKeyRequest>,
) -> ApiResult<Json<ApiKeyStatusResponse>> {
    request.validate()?;
    let api_key = request.api_key.map(|k| k.trim().to_string());

    let store = &state.context().api_keys;
    let key = match (store.get(&user.uid).await?, api_key) {
        (Some(existing), api_key) => existing.updated(api_key, request.is_active),
        (None, Some(api_key)) => UserApiKey::new(user.uid.clone(), api_key).updated(None, request.is_active),
        (None, None) => return Err(ApiError::bad_request("api_key is required")),
    };
    store.upsert(key.clone()).await?;
    info!(uid = %user.uid, is_active = key.is_active, "Stored Gemini API key");

    Ok(Json(Some(&key).into()))
}

pub async fn delete_api_key(State(state): State<AppState>, user: AuthUser) -> ApiResult<StatusCode> {
    if !state.context().api_keys.delete(&user.uid).await? {
        return Err(ApiError::not_found("No Gemini API key stored"));
    }
    info!(uid = %user.uid, "Removed Gemini API key");
    Ok(StatusCode::NO_CONTENT)
}
