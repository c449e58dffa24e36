//! Retry with exponential backoff and jitter.
//!
//! Retries network failures, 429 (honoring the server delay) and 5xx.
//! Everything else, including precondition failures, is returned at once so
//! callers running a compare-and-swap loop can react to it themselves.

use std::future::Future;
use std::time::{Duration, SystemTime};

use tracing::{info_span, warn, Instrument};

use crate::error::FirestoreResult;
use crate::metrics::record_retry;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: std::env::var("FIRESTORE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            base_delay_ms: std::env::var("FIRESTORE_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.base_delay_ms),
            max_delay_ms: std::env::var("FIRESTORE_RETRY_MAX_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_delay_ms),
        }
    }

    /// No retries; used by tests that assert exact call counts.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Execute an async operation, retrying transient failures.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = FirestoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let span = info_span!("firestore_attempt", operation = %operation, attempt = attempt + 1);
        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = backoff_delay(config, attempt, e.retry_after_ms());
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Firestore operation failed, retrying: {}",
                    e
                );
                record_retry(operation);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Delay before retry number `attempt + 1`.
///
/// A server-provided delay wins. Otherwise `base * 2^attempt`, capped, with
/// full jitter and a floor of `base`.
pub(crate) fn backoff_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after);
    }

    let ceiling = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_delay_ms);

    let jittered = (ceiling as f64 * jitter_fraction()) as u64;
    Duration::from_millis(jittered.max(config.base_delay_ms))
}

/// Pseudo-random fraction in [0, 1) from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::FirestoreError;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_delay_honors_retry_after() {
        assert_eq!(backoff_delay(&RetryConfig::default(), 0, Some(2000)), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_bounds() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 2000,
        };
        for attempt in 0..12 {
            let delay = backoff_delay(&config, attempt, None);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(), "get", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FirestoreError::ServerError(503, "unavailable".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_precondition_failure_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: FirestoreResult<()> = with_retry(&fast(), "patch", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FirestoreError::PreconditionFailed("stale".into()))
        })
        .await;
        assert!(result.unwrap_err().is_precondition_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: FirestoreResult<()> = with_retry(&fast(), "get", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FirestoreError::ServerError(500, "boom".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
