//! User-supplied AI service key.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A user's own Gemini API key. Generation for that user's videos is billed
/// to it while active; otherwise the server key is used.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UserApiKey {
    pub user_id: String,
    pub api_key: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl UserApiKey {
    pub fn new(user_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            api_key: api_key.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the key value and/or active flag, keeping `created_at`.
    pub fn updated(mut self, api_key: Option<String>, is_active: Option<bool>) -> Self {
        if let Some(key) = api_key {
            self.api_key = key;
        }
        if let Some(active) = is_active {
            self.is_active = active;
        }
        self.updated_at = Utc::now();
        self
    }

    /// The key to use for calls, when active.
    pub fn active_key(&self) -> Option<&str> {
        self.is_active.then_some(self.api_key.as_str())
    }

    /// First ten and last four characters; short keys are fully masked.
    pub fn preview(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 14 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

impl std::fmt::Debug for UserApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserApiKey")
            .field("user_id", &self.user_id)
            .field("api_key", &self.preview())
            .field("is_active", &self.is_active)
            .finish()
    }
}
