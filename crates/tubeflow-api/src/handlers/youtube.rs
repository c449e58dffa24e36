//! YouTube channel connection handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use tubeflow_models::YouTubeToken;
use tubeflow_publisher::TokenGrant;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Credential summary. Token values never leave the server.
#[derive(Debug, Serialize)]
pub struct TokenStatusResponse {
    pub has_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenStatusResponse {
    fn from_token(token: Option<&YouTubeToken>, now: DateTime<Utc>) -> Self {
        match token {
            Some(token) => Self {
                has_token: true,
                expires_at: Some(token.expires_at),
                is_expired: token.is_expired(now),
                scope: token.scope.clone(),
            },
            None => Self {
                has_token: false,
                expires_at: None,
                is_expired: false,
                scope: None,
            },
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExchangeCodeRequest {
    #[validate(length(min = 1, max = 2048))]
    pub code: String,
    #[validate(url)]
    pub redirect_uri: String,
}

/// Finish the OAuth consent flow by exchanging the authorization code.
pub async fn exchange_code(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ExchangeCodeRequest>,
) -> ApiResult<Json<TokenStatusResponse>> {
    request.validate()?;

    let grant = state.oauth.exchange_code(&request.code, &request.redirect_uri).await?;
    let token = state.context().token_manager.save_grant(&user.uid, grant).await?;
    info!(uid = %user.uid, "Connected YouTube channel");

    Ok(Json(TokenStatusResponse::from_token(Some(&token), Utc::now())))
}

/// Token payload obtained by a client-side OAuth flow.
#[derive(Debug, Deserialize, Validate)]
pub struct StoreTokenRequest {
    #[validate(length(min = 1))]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, at most ten years
    #[validate(range(min = 1, max = 315_360_000))]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

impl From<StoreTokenRequest> for TokenGrant {
    fn from(request: StoreTokenRequest) -> Self {
        TokenGrant {
            access_token: request.access_token,
            expires_in: request.expires_in,
            refresh_token: request.refresh_token,
            scope: request.scope,
            token_type: None,
        }
    }
}

/// Replace the caller's stored credential.
pub async fn store_token(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<StoreTokenRequest>,
) -> ApiResult<Json<TokenStatusResponse>> {
    request.validate()?;

    let token = state.context().token_manager.save_grant(&user.uid, request.into()).await?;
    Ok(Json(TokenStatusResponse::from_token(Some(&token), Utc::now())))
}

pub async fn token_status(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<TokenStatusResponse>> {
    let token = state.context().token_manager.current(&user.uid).await?;
    Ok(Json(TokenStatusResponse::from_token(token.as_ref(), Utc::now())))
}
