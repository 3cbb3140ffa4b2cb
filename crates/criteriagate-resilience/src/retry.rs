// crates/criteriagate-resilience/src/retry.rs
// ============================================================================
// Module: CriteriaGate Resilience Retry
// Description: Bounded retry with exponential backoff and jitter for
//              transient-only failures.
// Purpose: Give every outbound call (blob fetch, LLM extraction, terminology
//          lookup) the same retry shape without duplicating the loop.
// Dependencies: rand, tokio, criteriagate_core
// ============================================================================

//! ## Overview
//! [`RetryPolicy::run`] calls the given closure up to `max_attempts` times.
//! An attempt's error is inspected by a caller-supplied predicate: if it is
//! not retryable, the loop stops immediately and returns that error. If it
//! is retryable and attempts remain, the loop sleeps for a jittered
//! exponentially-growing delay before trying again, mirroring the schedule
//! the outbox dispatcher uses for redelivery.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ResilienceError;

/// Backoff schedule and attempt budget for [`RetryPolicy::run`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Base delay in milliseconds before the first retry.
    pub base_ms: u64,
    /// Maximum delay in milliseconds, regardless of attempt count.
    pub max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_ms: 250, max_ms: 10_000 }
    }
}

impl RetryPolicy {
    /// Runs `operation`, retrying while `is_retryable` returns `true` for
    /// the error and attempts remain.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Inner`] immediately for a non-retryable
    /// error, or [`ResilienceError::RetriesExhausted`] once `max_attempts`
    /// attempts have all failed.
    pub async fn run<T, E, F, Fut>(
        &self,
        is_retryable: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_retryable(&err) || attempt >= attempts {
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(ResilienceError::Inner(err)),
                        });
                    }
                    let delay = self.delay_ms(attempt);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Computes the jittered delay, in milliseconds, before the retry that
    /// follows attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(20);
        let unjittered = self.base_ms.saturating_mul(1u64 << exponent).min(self.max_ms);
        jitter(unjittered)
    }
}

/// Applies +/-25% uniform jitter to `delay_ms`.
fn jitter(delay_ms: u64) -> u64 {
    let quarter = delay_ms / 4;
    if quarter == 0 {
        return delay_ms;
    }
    let mut rng = rand::thread_rng();
    let offset = rng.gen_range(0..=(2 * quarter));
    delay_ms.saturating_sub(quarter).saturating_add(offset)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions on constructed fixtures")]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_succeeds() {
        let policy = RetryPolicy { max_attempts: 3, base_ms: 1, max_ms: 2 };
        let calls = AtomicU32::new(0);
        let result: Result<u32, ResilienceError<&str>> = policy
            .run(|_: &&str| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, &str>(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_budget_exhausted() {
        let policy = RetryPolicy { max_attempts: 3, base_ms: 1, max_ms: 2 };
        let calls = AtomicU32::new(0);
        let result: Result<u32, ResilienceError<&str>> = policy
            .run(|_: &&str| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, &str>("transient") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable_error() {
        let policy = RetryPolicy { max_attempts: 5, base_ms: 1, max_ms: 2 };
        let calls = AtomicU32::new(0);
        let result: Result<u32, ResilienceError<&str>> = policy
            .run(|_: &&str| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, &str>("permanent") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
