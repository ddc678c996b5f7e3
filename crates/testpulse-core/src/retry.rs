//! Retry with capped exponential backoff and shared rate-limit state.
//!
//! Every remote request of a run goes through [`retry_with_backoff`] with the
//! run's single [`RateLimitState`]. The mutex inside the state is only held
//! for bookkeeping and never across an `.await`.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::{SourceError, SourceResult};
use crate::metrics::METRICS;
use crate::obs::emit_source_retry;

/// Bounded retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds).
    pub base_delay_ms: u64,
    /// Cap for any single backoff delay (milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Default)]
struct RateLimitInner {
    blocked_until: Option<Instant>,
    remaining: Option<u64>,
    retries: u32,
}

/// Rate-limit and backoff bookkeeping shared by all requests of one run.
#[derive(Debug, Default)]
pub struct RateLimitState {
    inner: Mutex<RateLimitInner>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long the next request has to wait before it may be sent.
    pub fn wait_duration(&self) -> Duration {
        let inner = self.lock();
        match inner.blocked_until {
            Some(until) => until.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Block further requests for `retry_after` (when the server told us).
    pub fn record_rate_limit(&self, retry_after: Option<Duration>) {
        let mut inner = self.lock();
        inner.remaining = Some(0);
        if let Some(delay) = retry_after {
            let until = Instant::now() + delay;
            inner.blocked_until = Some(match inner.blocked_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
        }
    }

    /// Remember the server-reported request budget.
    pub fn record_remaining(&self, remaining: u64) {
        let mut inner = self.lock();
        inner.remaining = Some(remaining);
        if remaining > 0 {
            inner.blocked_until = None;
        }
    }

    pub fn record_retry(&self) -> u32 {
        let mut inner = self.lock();
        inner.retries += 1;
        inner.retries
    }

    pub fn retries(&self) -> u32 {
        self.lock().retries
    }

    pub fn remaining(&self) -> Option<u64> {
        self.lock().remaining
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateLimitInner> {
        // The guarded data is plain counters; a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// States of one retried operation.
enum RetryState<T> {
    Attempt(u32),
    Backoff {
        attempt: u32,
        delay: Duration,
        error: SourceError,
    },
    Finished(SourceResult<T>),
}

/// Run `op` until it succeeds, fails permanently, or exhausts `policy`.
///
/// `op` receives the 1-based attempt number. Non-retryable errors are returned
/// unchanged; retryable ones escalate to [`SourceError::RetriesExhausted`]
/// once the attempt bound is hit. Dropping the returned future cancels any
/// pending backoff.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    limiter: &RateLimitState,
    mut op: F,
) -> SourceResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = RetryState::Attempt(1);

    loop {
        state = match state {
            RetryState::Attempt(attempt) => {
                let pause = limiter.wait_duration();
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                match op(attempt).await {
                    Ok(value) => RetryState::Finished(Ok(value)),
                    Err(error) if error.is_retryable() && attempt < max_attempts => {
                        let mut delay = policy.delay_for(attempt);
                        if let SourceError::RateLimited { retry_after, .. } = &error {
                            limiter.record_rate_limit(*retry_after);
                            delay = delay.max(limiter.wait_duration());
                        }
                        RetryState::Backoff {
                            attempt,
                            delay,
                            error,
                        }
                    }
                    Err(error) if error.is_retryable() => {
                        RetryState::Finished(Err(SourceError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(error),
                        }))
                    }
                    Err(error) => RetryState::Finished(Err(error)),
                }
            }
            RetryState::Backoff {
                attempt,
                delay,
                error,
            } => {
                limiter.record_retry();
                METRICS.inc_source_retries();
                emit_source_retry(operation, attempt, delay.as_millis() as u64, &error);
                tokio::time::sleep(delay).await;
                RetryState::Attempt(attempt + 1)
            }
            RetryState::Finished(result) => return result,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 10,
            max_delay_ms: 40,
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_retry_policy_serde_roundtrip() {
        let policy = fast_policy(3);
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let limiter = RateLimitState::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry_with_backoff("clone", &fast_policy(4), &limiter, move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SourceError::Transient("connection reset".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_become_fatal() {
        let limiter = RateLimitState::new();
        let result: SourceResult<()> =
            retry_with_backoff("branch lookup", &fast_policy(3), &limiter, |_| async {
                Err(SourceError::AuthRejected("bad credentials".into()))
            })
            .await;

        match result.unwrap_err() {
            SourceError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SourceError::AuthRejected(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let limiter = RateLimitState::new();
        let calls = AtomicU32::new(0);
        let result: SourceResult<()> =
            retry_with_backoff("branch lookup", &fast_policy(5), &limiter, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SourceError::BranchNotFound {
                        target: "org/repo".into(),
                        branch: "nope".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(SourceError::BranchNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_blocks_shared_state() {
        let limiter = RateLimitState::new();
        limiter.record_rate_limit(Some(Duration::from_secs(30)));
        assert_eq!(limiter.remaining(), Some(0));
        assert!(limiter.wait_duration() > Duration::from_secs(29));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(limiter.wait_duration(), Duration::ZERO);

        limiter.record_remaining(4_999);
        assert_eq!(limiter.remaining(), Some(4_999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_attempt_waits_for_retry_after() {
        let limiter = RateLimitState::new();
        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry_with_backoff("api", &fast_policy(2), &limiter, move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SourceError::RateLimited {
                        detail: "secondary rate limit".into(),
                        retry_after: Some(Duration::from_secs(5)),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
