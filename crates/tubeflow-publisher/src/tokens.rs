//! Lazy, single-flight access token renewal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use tubeflow_models::YouTubeToken;
use tubeflow_state::TokenStore;

use crate::error::{PublishError, PublishResult};
use crate::metrics::record_token_refresh;
use crate::oauth::{TokenGrant, TokenRefresher};

/// Absolute expiry for a lifetime in seconds, rejecting values chrono
/// cannot represent.
fn expiry_after(expires_in: i64) -> PublishResult<DateTime<Utc>> {
    Duration::try_seconds(expires_in)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| PublishError::refresh_failed(format!("Token lifetime of {}s is out of range", expires_in), false))
}

/// Hands out live access tokens, refreshing on demand.
///
/// Refresh tokens can be single-use, so concurrent callers for one user
/// queue behind a per-user lock and reuse whatever the first refresh stored.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    margin: Duration,
    user_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>, margin: std::time::Duration) -> Self {
        Self {
            store,
            refresher,
            margin: Duration::from_std(margin).unwrap_or_else(|_| Duration::minutes(5)),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(user_id.to_string()).or_default().clone()
    }

    async fn load(&self, user_id: &str) -> PublishResult<YouTubeToken> {
        self.store
            .get(user_id)
            .await?
            .ok_or_else(|| PublishError::TokenMissing(user_id.to_string()))
    }

    /// Return a token valid for longer than the safety margin.
    pub async fn ensure_live_token(&self, user_id: &str) -> PublishResult<YouTubeToken> {
        let token = self.load(user_id).await?;
        if token.is_live(self.margin, Utc::now()) {
            return Ok(token);
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let token = self.load(user_id).await?;
        if token.is_live(self.margin, Utc::now()) {
            return Ok(token);
        }

        let grant = match self.refresher.refresh(&token.refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                record_token_refresh(if e.requires_reauthorization() { "revoked" } else { "error" });
                return Err(e);
            }
        };

        let expires_at = expiry_after(grant.expires_in)?;
        let refreshed = token.refreshed(grant.access_token, expires_at, grant.refresh_token);
        self.store.upsert(refreshed.clone()).await?;
        record_token_refresh("success");
        info!(user_id, expires_at = %refreshed.expires_at, "Refreshed YouTube access token");

        Ok(refreshed)
    }

    /// Store a grant from code exchange or a client-supplied token payload.
    ///
    /// Replaces the user's single credential in place. A grant without a
    /// refresh token keeps the stored one.
    pub async fn save_grant(&self, user_id: &str, grant: TokenGrant) -> PublishResult<YouTubeToken> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let expires_at = expiry_after(grant.expires_in)?;
        let existing = self.store.get(user_id).await?;
        let mut token = match (existing, grant.refresh_token.filter(|r| !r.is_empty())) {
            (Some(current), rotated) => current.refreshed(grant.access_token, expires_at, rotated),
            (None, Some(refresh)) => YouTubeToken::new(user_id, grant.access_token, refresh, expires_at),
            (None, None) => {
                return Err(PublishError::refresh_failed(
                    "A refresh token is required to connect a channel",
                    true,
                ))
            }
        };
        if grant.scope.is_some() {
            token.scope = grant.scope;
        }

        self.store.upsert(token.clone()).await?;
        info!(user_id, "Stored YouTube credential");
        Ok(token)
    }

    /// Current credential, if any, without refreshing.
    pub async fn current(&self, user_id: &str) -> PublishResult<Option<YouTubeToken>> {
        Ok(self.store.get(user_id).await?)
    }
}
