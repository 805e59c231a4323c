//! Shared retry-with-backoff logic for stream reconnects and notification delivery.
//!
//! Exponential backoff (factor 2) with jitter and a hard cap on the computed delay.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries (not counting the initial attempt).
    /// `None` retries until cancelled.
    pub max_retries: Option<u32>,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay, jitter included.
    pub max_delay: Duration,
    /// When true, adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl RetryPolicy {
    /// Reconnect policy for the event stream: 1s base, 30s cap, never gives up.
    pub fn reconnect() -> Self {
        Self {
            max_retries: None,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Delivery policy for sinks: 3 attempts in total with short delays.
    pub fn delivery() -> Self {
        Self {
            max_retries: Some(2),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt saturates for attempts >= 32.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }

    /// Check if another retry is allowed after `attempt` (0-indexed) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt < max)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T> {
    /// Operation succeeded.
    Success(T),
    /// Transient failure. `not_before` is a server-provided minimum wait
    /// (e.g. `Retry-After`) that overrides a shorter computed backoff.
    Retry {
        error: Error,
        not_before: Option<Duration>,
    },
    /// Permanent failure.
    Fail(Error),
}

impl<T> RetryAction<T> {
    pub fn retry(error: Error) -> Self {
        Self::Retry {
            error,
            not_before: None,
        }
    }
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed).
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry { error, not_before } => {
                if !policy.should_retry(attempt) {
                    return Err(error);
                }
                let backoff = policy.delay_for_attempt(attempt);
                let delay = not_before.map_or(backoff, |min| min.max(backoff));
                warn!(
                    attempt = attempt + 1,
                    max = ?policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: Option<u32>, jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter,
        }
    }

    #[test]
    fn delay_respects_max_cap() {
        let policy = RetryPolicy::reconnect();
        for attempt in [5, 10, 40, u32::MAX] {
            assert!(policy.delay_for_attempt(attempt) <= Duration::from_secs(30));
        }
    }

    #[test]
    fn delay_without_jitter_is_deterministic() {
        let policy = policy(Some(3), false);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_with_jitter_adds_bounded_random_component() {
        let policy = policy(Some(3), true);
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[test]
    fn reconnect_policy_is_unbounded() {
        let policy = RetryPolicy::reconnect();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(10_000));
        assert_eq!(
            RetryPolicy {
                jitter: false,
                ..policy
            }
            .delay_for_attempt(0),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn delivery_policy_allows_three_attempts() {
        let policy = RetryPolicy::delivery();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[tokio::test]
    async fn retry_fails_immediately_on_permanent_error() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = retry_with_backoff(&policy(Some(3), false), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Fail(Error::config("bad channel")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_then_fails() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = retry_with_backoff(&policy(Some(2), false), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::retry(Error::transport("reset")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_honors_not_before_hint() {
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let result = retry_with_backoff(&policy(Some(2), false), &token, |attempt| async move {
            if attempt == 0 {
                RetryAction::Retry {
                    error: Error::RateLimited {
                        retry_after: Some(Duration::from_secs(7)),
                    },
                    not_before: Some(Duration::from_secs(7)),
                }
            } else {
                RetryAction::Success(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn retry_stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<u32> =
            retry_with_backoff(&policy(None, false), &token, |_| async {
                RetryAction::Success(1)
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
