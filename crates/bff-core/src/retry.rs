//! Retry with exponential backoff and jitter
//!
//! Used by the capability gate so that access reviews survive transient
//! upstream failures regardless of which client issued them.
//!
//! # Example
//!
//! ```ignore
//! use bff_core::retry::{retry_with_backoff, RetryConfig};
//!
//! let allowed = retry_with_backoff(
//!     &RetryConfig::default(),
//!     "self_access_review",
//!     |e: &Error| e.is_transient(),
//!     || async { client.self_access_review(&attrs).await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Backoff policy for transient failures
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied after every retry
    pub factor: f64,
    /// Relative jitter; 0.2 spreads each delay over ±20%
    pub jitter: f64,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            factor: 1.5,
            jitter: 0.2,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (0-based)
    pub fn base_delay(&self, retry: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(retry as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base.as_secs_f64() * (1.0 + spread)).max(0.0))
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// `retryable` decides whether an error is worth another attempt; a
/// non-retryable error is returned immediately.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !retryable(&e) => {
                debug!(operation = %operation_name, attempt, error = %e, "Operation failed permanently");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "Operation failed after max retries"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.jittered(config.base_delay(attempt - 1));
                debug!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.factor, 1.5);
        assert_eq!(config.jitter, 0.2);
    }

    #[test]
    fn test_base_delay_grows() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay(0), Duration::from_millis(500));
        assert_eq!(config.base_delay(1), Duration::from_millis(750));
        assert_eq!(config.base_delay(2), Duration::from_millis(1125));
    }

    #[test]
    fn test_base_delay_capped() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(config.base_delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::default();
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = config.jittered(base);
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_immediately() {
        let result: Result<i32, &str> =
            retry_with_backoff(&RetryConfig::default(), "op", |_| true, || async { Ok(42) })
                .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, String> = retry_with_backoff(
            &RetryConfig::default(),
            "op",
            |_| true,
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), String> = retry_with_backoff(
            &RetryConfig::default(),
            "op",
            |_| true,
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_string())
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), String> = retry_with_backoff(
            &RetryConfig::default(),
            "op",
            |e: &String| e != "forbidden",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("forbidden".to_string())
                }
            },
        )
        .await;

        assert_eq!(result, Err("forbidden".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
