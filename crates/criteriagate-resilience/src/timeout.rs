// crates/criteriagate-resilience/src/timeout.rs
// ============================================================================
// Module: CriteriaGate Resilience Timeout
// Description: Per-call deadline wrapper around an async operation.
// Purpose: Bound how long the pipeline waits on a single provider call,
//          independent of that provider's own (possibly absent) timeouts.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`with_timeout`] races the given future against a deadline. Dropping the
//! future on expiry cancels any in-flight `.await` points inside it; the
//! underlying I/O resource (socket, file handle) is released by its own
//! `Drop` impl exactly as it would be on any other early return.

use std::future::Future;
use std::time::Duration;

use crate::error::ResilienceError;

/// Runs `operation`, failing with [`ResilienceError::TimedOut`] if it has
/// not completed within `deadline`.
///
/// # Errors
///
/// Returns [`ResilienceError::TimedOut`] on expiry, or
/// [`ResilienceError::Inner`] if `operation` completes with an error before
/// the deadline.
pub async fn with_timeout<T, E, Fut>(deadline: Duration, operation: Fut) -> Result<T, ResilienceError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ResilienceError::Inner(err)),
        Err(_elapsed) => {
            let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
            Err(ResilienceError::TimedOut { deadline_ms })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions on constructed fixtures")]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_when_faster_than_deadline() {
        let result: Result<u32, ResilienceError<&str>> =
            with_timeout(Duration::from_millis(50), async { Ok::<u32, &str>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn times_out_when_slower_than_deadline() {
        let result: Result<u32, ResilienceError<&str>> = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<u32, &str>(7)
        })
        .await;
        assert!(matches!(result, Err(ResilienceError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn propagates_inner_error_before_deadline() {
        let result: Result<u32, ResilienceError<&str>> =
            with_timeout(Duration::from_millis(50), async { Err::<u32, &str>("boom") }).await;
        assert!(matches!(result, Err(ResilienceError::Inner("boom"))));
    }
}
