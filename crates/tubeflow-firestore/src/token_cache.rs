//! Access-token caching for Firestore requests.
//!
//! Reads take a shared lock; only a stale token takes the write lock, and
//! the cache is re-checked after acquiring it so concurrent callers share a
//! single refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

/// Refresh this long before the provider-reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// TTL assumed when the provider reports an expiry we cannot convert.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for the Firestore REST API.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }

    fn is_usable(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

enum Source {
    /// Service-account tokens from gcp_auth, cached until near expiry.
    ServiceAccount {
        provider: Arc<dyn TokenProvider>,
        cache: RwLock<Option<CachedToken>>,
    },
    /// A fixed token (the emulator accepts `owner`).
    Static(String),
}

/// Where request bearer tokens come from.
pub struct TokenSource {
    source: Source,
}

impl TokenSource {
    pub fn service_account(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            source: Source::ServiceAccount {
                provider,
                cache: RwLock::new(None),
            },
        }
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
        }
    }

    /// Drop the cached token after the server rejected it.
    pub async fn invalidate(&self) {
        if let Source::ServiceAccount { cache, .. } = &self.source {
            *cache.write().await = None;
        }
    }

    /// Current bearer token, refreshing when stale.
    pub async fn token(&self) -> FirestoreResult<String> {
        let (provider, cache) = match &self.source {
            Source::Static(token) => return Ok(token.clone()),
            Source::ServiceAccount { provider, cache } => (provider, cache),
        };

        if let Some(cached) = cache.read().await.as_ref() {
            if cached.is_fresh(Instant::now()) {
                return Ok(cached.access_token.clone());
            }
        }

        let mut guard = cache.write().await;
        if let Some(cached) = guard.as_ref() {
            if cached.is_fresh(Instant::now()) {
                return Ok(cached.access_token.clone());
            }
        }

        match provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let remaining = token.expires_at() - Utc::now();
                let ttl = if remaining > chrono::Duration::zero() {
                    remaining.to_std().unwrap_or(FALLBACK_TTL)
                } else {
                    Duration::ZERO
                };
                let access_token = token.as_str().to_string();
                *guard = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at: Instant::now() + ttl,
                });
                debug!(ttl_secs = ttl.as_secs(), "Refreshed Firestore access token");
                Ok(access_token)
            }
            Err(e) => match guard.as_ref() {
                Some(cached) if cached.is_usable(Instant::now()) => {
                    warn!("Token refresh failed, reusing current token: {}", e);
                    Ok(cached.access_token.clone())
                }
                _ => Err(FirestoreError::auth_error(format!("Failed to obtain auth token: {}", e))),
            },
        }
    }
}
