//! Bearer token authentication.
//!
//! Two token sources are accepted: Firebase ID tokens (RS256, verified
//! against Google's published keys) and HS256 tokens signed with a shared
//! secret for service-to-service callers and local development.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Google JWKS URL for Firebase Auth.
const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Firebase token issuer prefix.
const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// JWKS cache TTL.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600); // 1 hour

/// Claims common to both token sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User ID
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    /// Expiration
    pub exp: i64,
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl From<TokenClaims> for AuthUser {
    fn from(claims: TokenClaims) -> Self {
        Self {
            uid: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified.unwrap_or(false),
        }
    }
}

/// JWKS response from Google.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
}

/// Cached Firebase signing keys, refreshed lazily.
pub struct JwksCache {
    http: Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: RwLock<Option<Instant>>,
    project_id: String,
}

impl JwksCache {
    pub fn new(project_id: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
            project_id: project_id.into(),
        })
    }

    /// Refresh JWKS keys from Google.
    async fn refresh_keys(&self) -> Result<(), ApiError> {
        debug!("Refreshing JWKS keys");

        let jwks: JwksResponse = self
            .http
            .get(GOOGLE_JWKS_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::internal(format!("JWKS fetch failed: {}", e)))?
            .json()
            .await
            .map_err(|e| ApiError::internal(format!("JWKS response unreadable: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => warn!(kid = %jwk.kid, "Skipping unusable JWKS key: {}", e),
            }
        }

        let key_count = keys.len();
        *self.keys.write().await = keys;
        *self.last_refresh.write().await = Some(Instant::now());

        debug!("Refreshed {} JWKS keys", key_count);
        Ok(())
    }

    /// Get decoding key for a key ID.
    async fn get_key(&self, kid: &str) -> Option<DecodingKey> {
        let needs_refresh = self
            .last_refresh
            .read()
            .await
            .map_or(true, |last| last.elapsed() > JWKS_CACHE_TTL);

        if needs_refresh {
            if let Err(e) = self.refresh_keys().await {
                warn!("Failed to refresh JWKS keys: {}", e);
            }
        }

        self.keys.read().await.get(kid).cloned()
    }

    /// Verify a Firebase ID token.
    pub async fn verify_token(&self, token: &str, kid: Option<String>) -> Result<TokenClaims, ApiError> {
        let kid = kid.ok_or_else(|| ApiError::unauthorized("Token missing key ID"))?;

        let key = self
            .get_key(&kid)
            .await
            .ok_or_else(|| ApiError::unauthorized("Unknown key ID"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!("{}{}", FIREBASE_ISSUER_PREFIX, self.project_id)]);
        validation.set_audience(&[&self.project_id]);

        let token_data = decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?;

        Ok(token_data.claims)
    }
}

/// Verifies bearer tokens from whichever sources are configured.
pub struct Authenticator {
    firebase: Option<JwksCache>,
    shared_secret: Option<DecodingKey>,
}

impl Authenticator {
    pub fn new(firebase: Option<JwksCache>, shared_secret: Option<&str>) -> Self {
        Self {
            firebase,
            shared_secret: shared_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        }
    }

    /// Shared-secret mode only.
    pub fn with_secret(secret: &str) -> Self {
        Self::new(None, Some(secret))
    }

    pub fn is_configured(&self) -> bool {
        self.firebase.is_some() || self.shared_secret.is_some()
    }

    pub async fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let header = decode_header(token).map_err(|e| ApiError::unauthorized(format!("Invalid token header: {}", e)))?;

        let claims = match (header.alg, &self.shared_secret, &self.firebase) {
            (Algorithm::HS256, Some(key), _) => {
                decode::<TokenClaims>(token, key, &Validation::new(Algorithm::HS256))
                    .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?
                    .claims
            }
            (Algorithm::RS256, _, Some(jwks)) => jwks.verify_token(token, header.kid).await?,
            (alg, _, _) => {
                return Err(ApiError::unauthorized(format!("Unsupported token algorithm {:?}", alg)));
            }
        };

        if claims.sub.trim().is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }
        Ok(AuthUser::from(claims))
    }
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthorized("Missing or invalid Authorization header"))?;

        state.auth.verify(bearer.token()).await
    }
}
