//! Deadline-bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// How long and how often to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total time budget; attempts still running at the deadline are dropped.
    pub timeout: Duration,
    /// Wait after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for a single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::config::DEFAULT_CONNECT_RETRY_TIMEOUT_SEC),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Default backoff with the given time budget.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// An attempt was still pending when the time budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no answer within {timeout:?}")]
pub struct AttemptTimedOut {
    /// The budget that elapsed.
    pub timeout: Duration,
}

/// Run `op` until it succeeds or the policy's timeout elapses.
///
/// Every attempt is cut off at the deadline, so a server that accepts but
/// never answers cannot stall the loop. A zero budget still gets one full
/// attempt. When the budget runs out the last error is returned, or
/// [`AttemptTimedOut`] if no attempt finished. `op` receives the 1-based
/// attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + From<AttemptTimedOut>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt = 1;
    let mut last_err: Option<E> = None;
    loop {
        let outcome = if policy.timeout.is_zero() {
            Some(op(attempt).await)
        } else {
            tokio::time::timeout_at(deadline, op(attempt)).await.ok()
        };
        let err = match outcome {
            Some(Ok(value)) => return Ok(value),
            Some(Err(err)) => err,
            None => {
                warn!(operation = what, attempt, "Attempt still pending at deadline");
                return Err(last_err.unwrap_or_else(|| {
                    AttemptTimedOut {
                        timeout: policy.timeout,
                    }
                    .into()
                }));
            },
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(err);
        }
        let wait = policy.backoff(attempt).min(deadline - now);
        warn!(
            operation = what,
            attempt,
            error = %err,
            wait_ms = wait.as_millis() as u64,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(wait).await;
        if Instant::now() >= deadline {
            return Err(err);
        }
        last_err = Some(err);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn refused(n: u32) -> ProviderError {
        ProviderError::Connection(format!("refused {}", n))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let waits: Vec<_> = (1..=7).map(|a| policy.backoff(a).as_millis()).collect();
        assert_eq!(waits, vec![500, 1000, 2000, 4000, 8000, 10000, 10000]);
        assert_eq!(policy.backoff(64), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, ProviderError> = retry(&RetryPolicy::default(), "ping", |n| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let start = Instant::now();
        let result = retry(&RetryPolicy::default(), "ping", |n| async move {
            if n < 3 {
                Err(refused(n))
            } else {
                Ok("up")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "up");
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_timeout_with_last_error() {
        let start = Instant::now();
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::with_timeout(Duration::from_secs(3));
        let result: Result<(), ProviderError> = retry(&policy, "ping", |n| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(refused(n)) }
        })
        .await;

        // Attempts at 0s, 0.5s and 1.5s; the clipped wait ends on the deadline.
        assert_eq!(result.unwrap_err().to_string(), refused(3).to_string());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_is_cut_off_at_deadline() {
        let start = Instant::now();
        let policy = RetryPolicy::with_timeout(Duration::from_secs(2));
        let result: Result<(), ProviderError> =
            retry(&policy, "ping", |_| std::future::pending()).await;

        let err = result.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(err.to_string(), "no answer within 2s");
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_retry_reports_earlier_failure() {
        let start = Instant::now();
        let policy = RetryPolicy::with_timeout(Duration::from_secs(3));
        let result: Result<(), ProviderError> = retry(&policy, "ping", |n| async move {
            if n == 1 {
                return Err(refused(n));
            }
            std::future::pending().await
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), refused(1).to_string());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_attempts_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), ProviderError> =
            retry(&RetryPolicy::with_timeout(Duration::ZERO), "ping", |n| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(refused(n)) }
            })
            .await;
        assert_eq!(result.unwrap_err().to_string(), refused(1).to_string());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_waits_for_slow_attempt() {
        let start = Instant::now();
        let result: Result<&str, ProviderError> =
            retry(&RetryPolicy::with_timeout(Duration::ZERO), "ping", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("up")
            })
            .await;
        assert_eq!(result.unwrap(), "up");
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
