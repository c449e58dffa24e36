//! AI service configuration.

use std::time::Duration;

use crate::error::{AiError, AiResult};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://image.pollinations.ai";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Bound on a single HTTP attempt
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
    /// Longest prompt accepted, in characters
    pub max_input_chars: usize,
    /// Largest audio file sent inline for transcription
    pub max_inline_audio_bytes: u64,
    /// Image service that renders thumbnail prompts
    pub image_base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(8),
            max_input_chars: 100_000,
            max_inline_audio_bytes: 20 * 1024 * 1024,
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
        }
    }
}

impl GeminiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> AiResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AiError::config("GEMINI_API_KEY not set"))?;
        let defaults = Self::default();

        Ok(Self {
            api_key,
            model: std::env::var("GEMINI_MODEL")
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or(defaults.model),
            base_url: std::env::var("GEMINI_BASE_URL")
                .ok()
                .filter(|u| !u.is_empty())
                .unwrap_or(defaults.base_url),
            timeout: std::env::var("AI_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_attempts: std::env::var("AI_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            max_input_chars: std::env::var("AI_MAX_INPUT_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_input_chars),
            image_base_url: std::env::var("THUMBNAIL_IMAGE_BASE_URL")
                .ok()
                .filter(|u| !u.is_empty())
                .unwrap_or(defaults.image_base_url),
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_missing_api_key_is_an_error() {
        std::env::remove_var("GEMINI_API_KEY");
        assert!(matches!(GeminiConfig::from_env(), Err(AiError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::set_var("GEMINI_API_KEY", "k");
        std::env::set_var("AI_MAX_ATTEMPTS", "0");
        let config = GeminiConfig::from_env().unwrap();
        std::env::remove_var("GEMINI_API_KEY");
        std::env::remove_var("AI_MAX_ATTEMPTS");

        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_input_chars, 100_000);
    }
}
