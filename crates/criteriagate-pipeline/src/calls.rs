// crates/criteriagate-pipeline/src/calls.rs
// ============================================================================
// Module: CriteriaGate Pipeline Resilient Call Helpers
// Description: Flattens the resilience crate's nested `ResilienceError` back
//              onto `ClassifiedError` so node code reads like a plain call.
// Purpose: Give every outbound call (blob fetch, LLM call, terminology
//          search) the same circuit-breaker-then-timeout(-then-retry) shape
//          without each node matching on `ResilienceError` itself.
// Dependencies: criteriagate-core, criteriagate-resilience
// ============================================================================

//! ## Overview
//! [`call_guarded`] is a circuit breaker wrapped around a deadline: it is
//! the shape every single outbound call uses. [`call_resilient`] adds a
//! [`RetryPolicy`] around that for calls where a transient failure is worth
//! retrying without bubbling back up to the node's own error handling
//! (terminology search, most LLM calls). Both flatten their wrapper's
//! nested `ResilienceError` back down to the plain [`ClassifiedError`]
//! every node already knows how to handle.

use std::future::Future;
use std::time::Duration;

use criteriagate_core::ClassifiedError;
use criteriagate_core::TransientError;
use criteriagate_resilience::CircuitBreaker;
use criteriagate_resilience::ResilienceError;
use criteriagate_resilience::RetryPolicy;
use criteriagate_resilience::with_timeout;

/// Runs `operation` through `breaker`, bounding it to `deadline`.
///
/// # Errors
///
/// Returns the classified error `operation` failed with, a transient error
/// if `deadline` elapsed first, or a transient error if `breaker` is open.
pub async fn call_guarded<T, F, Fut>(
    breaker: &CircuitBreaker,
    deadline: Duration,
    operation: F,
) -> Result<T, ClassifiedError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ClassifiedError>>,
{
    match breaker.call(|| with_timeout(deadline, operation())).await {
        Ok(value) => Ok(value),
        Err(ResilienceError::Inner(ResilienceError::Inner(err))) => Err(err),
        Err(ResilienceError::Inner(ResilienceError::TimedOut { deadline_ms })) => {
            Err(TransientError::new(format!("call did not complete within {deadline_ms}ms")).into())
        }
        Err(ResilienceError::CircuitOpen) => {
            Err(TransientError::new("circuit breaker is open").into())
        }
        Err(ResilienceError::Inner(ResilienceError::RetriesExhausted { .. } | ResilienceError::CircuitOpen)) => {
            unreachable!("with_timeout never returns RetriesExhausted or CircuitOpen")
        }
        Err(ResilienceError::TimedOut { .. } | ResilienceError::RetriesExhausted { .. }) => {
            unreachable!("CircuitBreaker::call only returns Inner or CircuitOpen")
        }
    }
}

/// Runs `operation` through `breaker`, retrying transient failures under
/// `retry`, each attempt bounded to `deadline`.
///
/// # Errors
///
/// Returns the classified error from the final attempt once the retry
/// budget is exhausted, or a transient error if the breaker trips during
/// the attempt window.
pub async fn call_resilient<T, F, Fut>(
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    deadline: Duration,
    operation: F,
) -> Result<T, ClassifiedError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClassifiedError>>,
{
    match retry.run(ClassifiedError::is_transient, || call_guarded(breaker, deadline, &operation)).await {
        Ok(value) => Ok(value),
        Err(ResilienceError::Inner(err)) => Err(err),
        Err(ResilienceError::RetriesExhausted { last, .. }) => match *last {
            ResilienceError::Inner(err) => Err(err),
            ResilienceError::TimedOut { .. } | ResilienceError::CircuitOpen | ResilienceError::RetriesExhausted { .. } => {
                Err(TransientError::new("retry budget exhausted").into())
            }
        },
        Err(ResilienceError::TimedOut { .. } | ResilienceError::CircuitOpen) => {
            unreachable!("RetryPolicy::run only returns Inner or RetriesExhausted")
        }
    }
}
