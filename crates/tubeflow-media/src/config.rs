//! Media tool configuration.

use std::time::Duration;

/// Limits and tool locations for transcoding and remote fetches.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Upper bound for a single FFmpeg invocation
    pub ffmpeg_timeout: Duration,
    /// Hard cap on downloaded bytes
    pub max_download_bytes: u64,
    /// Hard cap on download wall time
    pub max_download_time: Duration,
    /// yt-dlp binary (resolved from PATH when unset)
    pub ytdlp_path: Option<String>,
    /// Permit loopback and private network sources
    pub allow_private_sources: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_timeout: Duration::from_secs(1800),
            max_download_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            max_download_time: Duration::from_secs(900),
            ytdlp_path: None,
            allow_private_sources: false,
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_timeout: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ffmpeg_timeout),
            max_download_bytes: std::env::var("MAX_DOWNLOAD_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_download_bytes),
            max_download_time: std::env::var("MAX_DOWNLOAD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_download_time),
            ytdlp_path: std::env::var("YTDLP_PATH").ok().filter(|s| !s.is_empty()),
            allow_private_sources: std::env::var("ALLOW_PRIVATE_SOURCES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides_and_fallbacks() {
        std::env::set_var("MAX_DOWNLOAD_BYTES", "1048576");
        std::env::set_var("MAX_DOWNLOAD_SECS", "not-a-number");
        let config = MediaConfig::from_env();
        std::env::remove_var("MAX_DOWNLOAD_BYTES");
        std::env::remove_var("MAX_DOWNLOAD_SECS");

        assert_eq!(config.max_download_bytes, 1_048_576);
        assert_eq!(config.max_download_time, Duration::from_secs(900));
    }
}
