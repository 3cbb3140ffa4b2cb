// crates/criteriagate-resilience/src/error.rs
// ============================================================================
// Module: CriteriaGate Resilience Errors
// Description: Error type shared by every resilience wrapper.
// Purpose: Let callers distinguish "the inner call failed" from "the wrapper
//          itself refused to run the call".
// Dependencies: thiserror, criteriagate_core
// ============================================================================

use criteriagate_core::ClassifiedError;
use thiserror::Error;

/// Outcome of a call made through a resilience wrapper.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The wrapped call ran and returned this error.
    #[error(transparent)]
    Inner(E),
    /// The retry budget was exhausted without a successful attempt.
    #[error("retry budget exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The error from the final attempt.
        last: Box<ResilienceError<E>>,
    },
    /// The call did not complete within the allotted deadline.
    #[error("call did not complete within {deadline_ms}ms")]
    TimedOut {
        /// The configured deadline, in milliseconds.
        deadline_ms: u64,
    },
    /// The circuit breaker is open and rejected the call without running it.
    #[error("circuit breaker is open, rejecting call without attempting it")]
    CircuitOpen,
}

impl ResilienceError<ClassifiedError> {
    /// Reports whether this error reflects a transient failure, and is
    /// therefore safe to retry at a higher level (for example, by the
    /// outbox dispatcher re-delivering the whole event).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Inner(err) => err.is_transient(),
            Self::RetriesExhausted { last, .. } => last.is_transient(),
            Self::TimedOut { .. } | Self::CircuitOpen => true,
        }
    }
}
