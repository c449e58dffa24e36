//! External platform OAuth credential.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The single live YouTube credential of a user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct YouTubeToken {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl YouTubeToken {
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
            scope: None,
            expires_at,
            updated_at: Utc::now(),
        }
    }

    /// Access token stays valid for longer than `margin`.
    pub fn is_live(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - now > margin
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Replace the access token in place after a refresh exchange.
    ///
    /// Providers may rotate the refresh token; keep the old one otherwise.
    pub fn refreshed(
        mut self,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        rotated_refresh_token: Option<String>,
    ) -> Self {
        self.access_token = access_token.into();
        self.expires_at = expires_at;
        if let Some(refresh) = rotated_refresh_token.filter(|r| !r.is_empty()) {
            self.refresh_token = refresh;
        }
        self.updated_at = Utc::now();
        self
    }
}

// Tokens never reach logs.
impl std::fmt::Debug for YouTubeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeToken")
            .field("user_id", &self.user_id)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
