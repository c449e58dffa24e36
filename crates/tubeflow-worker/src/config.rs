//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scratch root for per-step working directories
    pub work_dir: PathBuf,
    /// Where ingested files wait for processing
    pub staging_dir: PathBuf,
    /// Maximum background steps running at once
    pub max_concurrent_jobs: usize,
    /// Retries of a transient transcode failure (not including the first attempt)
    pub process_max_retries: u32,
    /// Base delay for process retry backoff (doubles each attempt)
    pub process_retry_base: Duration,
    /// Default cleanup deadline after registration; `None` disables it
    pub cleanup_retention: Option<Duration>,
    pub cleanup_sweep_interval: Duration,
    /// Videos examined per sweep
    pub cleanup_batch_size: usize,
    /// Transcript characters handed to the content generator
    pub transcript_excerpt_chars: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/tubeflow"),
            staging_dir: PathBuf::from("/tmp/tubeflow/staging"),
            max_concurrent_jobs: 4,
            process_max_retries: 2,
            process_retry_base: Duration::from_millis(2000),
            cleanup_retention: Some(Duration::from_secs(1800)), // 30 minutes
            cleanup_sweep_interval: Duration::from_secs(60),
            cleanup_batch_size: 100,
            transcript_excerpt_chars: 12_000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let work_dir = std::env::var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);
        let staging_dir = std::env::var("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| work_dir.join("staging"));

        Self {
            work_dir,
            staging_dir,
            max_concurrent_jobs: env_parse::<usize>("MAX_CONCURRENT_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            process_max_retries: env_parse("PROCESS_MAX_RETRIES").unwrap_or(defaults.process_max_retries),
            process_retry_base: env_parse("PROCESS_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.process_retry_base),
            cleanup_retention: match env_parse::<u64>("CLEANUP_RETENTION_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.cleanup_retention,
            },
            cleanup_sweep_interval: env_parse::<u64>("CLEANUP_SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_sweep_interval),
            cleanup_batch_size: env_parse::<usize>("CLEANUP_BATCH_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.cleanup_batch_size),
            transcript_excerpt_chars: env_parse("TRANSCRIPT_EXCERPT_CHARS")
                .unwrap_or(defaults.transcript_excerpt_chars),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }
}
