// SPDX-License-Identifier: MIT
//! Exponential backoff retry for the review task and external calls.
//!
//! [`retry_with_backoff`] drives a fallible async operation through up to
//! `max_attempts` tries, consulting a predicate after each failure so that
//! terminal errors (bad credentials, bad signatures) abort immediately while
//! transient ones wait out the computed delay.
//!
//! # Example
//! ```rust,ignore
//! use revd::retry::{retry_with_backoff, RetryConfig};
//!
//! let out = retry_with_backoff(&RetryConfig::review_attempts(3), |e| e.is_retryable(), || async {
//!     run_pipeline().await
//! })
//! .await;
//! ```

use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, counting the first try.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled (by `multiplier`) thereafter.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Factor applied to the previous delay after each failed attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Schedule for the end-to-end review task: one initial run plus
    /// `max_retries` retries, waiting 60 s, then 120 s, then 240 s (capped)
    /// between them.
    pub fn review_attempts(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(240),
            multiplier: 2.0,
        }
    }

    /// Schedule for idempotent upstream reads inside a single attempt:
    /// short waits so one flaky GET does not burn a task-level retry.
    pub fn transient_fetch() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    /// Config suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.base_delay.as_millis() as f64 * factor) as u128;
        Duration::from_millis(ms.min(self.max_delay.as_millis()) as u64)
    }
}

/// Retry an async operation with exponential backoff.
///
/// Calls `f()` up to `config.max_attempts` times. After each failure the
/// error is passed to `should_retry`; a `false` answer returns the error
/// immediately without sleeping. Otherwise the computed backoff delay is
/// waited out before the next attempt.
///
/// Returns `Ok(value)` on the first success, or the last error once the
/// attempt budget is spent.
///
/// # Panics
/// Panics if `config.max_attempts` is 0 (the operation would never run).
pub async fn retry_with_backoff<F, Fut, P, T, E>(
    config: &RetryConfig,
    should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    assert!(
        config.max_attempts > 0,
        "RetryConfig.max_attempts must be at least 1"
    );

    let mut last_err: Option<E> = None;

    for attempt in 1..=config.max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(attempt, err = ?e, "non-retryable error — giving up");
                    return Err(e);
                }
                if attempt < config.max_attempts {
                    let delay = config.delay_for(attempt);
                    warn!(
                        attempt,
                        max = config.max_attempts,
                        delay_ms = delay.as_millis(),
                        err = ?e,
                        "attempt failed — retrying"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!(
                        attempt,
                        max = config.max_attempts,
                        err = ?e,
                        "all retry attempts exhausted"
                    );
                }
                last_err = Some(e);
            }
        }
    }

    // The loop always assigns last_err before falling through.
    Err(last_err.expect("retry loop ended without setting last_err"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn always(_: &String) -> bool {
        true
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let cfg = RetryConfig::instant();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> = retry_with_backoff(&cfg, always, || {
            let c = calls2.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let cfg = RetryConfig::instant();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> = retry_with_backoff(&cfg, always, || {
            let c = calls2.clone();
            async move {
                let n = c.fetch_add(1, Ordering::Relaxed) + 1;
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn returns_last_error_after_all_attempts() {
        let cfg = RetryConfig {
            max_attempts: 4,
            ..RetryConfig::instant()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> = retry_with_backoff(&cfg, always, || {
            let c = calls2.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Err("permanent error".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "permanent error");
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let cfg = RetryConfig::instant();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> = retry_with_backoff(
            &cfg,
            |e: &String| !e.contains("credentials"),
            || {
                let c = calls2.clone();
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Err("bad credentials".to_string())
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn review_schedule_doubles_from_sixty_seconds() {
        let cfg = RetryConfig::review_attempts(3);
        assert_eq!(cfg.max_attempts, 4);
        assert_eq!(cfg.delay_for(1), Duration::from_secs(60));
        assert_eq!(cfg.delay_for(2), Duration::from_secs(120));
        assert_eq!(cfg.delay_for(3), Duration::from_secs(240));
    }

    #[test]
    fn review_schedule_follows_configured_retry_budget() {
        assert_eq!(RetryConfig::review_attempts(0).max_attempts, 1);
        assert_eq!(RetryConfig::review_attempts(5).max_attempts, 6);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let cfg = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 10.0,
        };
        assert_eq!(cfg.delay_for(9), Duration::from_millis(5));
    }
}
