// crates/criteriagate-resilience/src/circuit_breaker.rs
// ============================================================================
// Module: CriteriaGate Resilience Circuit Breaker
// Description: Per-provider closed/open/half-open circuit breaker.
// Purpose: Stop hammering a provider that is already failing, and probe it
//          back open once a cooldown window has passed.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! The breaker starts `closed`. Consecutive failures (no intervening
//! success) trip it to `open` once they reach `failure_threshold`; while
//! open, calls are rejected with [`ResilienceError::CircuitOpen`] without
//! running the operation. Once `open_duration` has elapsed the next caller
//! is let through as a single `half_open` probe: success closes the
//! breaker and resets the failure count, failure reopens it immediately.
//! Only one probe is admitted at a time; callers that arrive while a probe
//! is in flight are rejected the same as a fully open breaker.

use std::future::Future;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::error::ResilienceError;

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_duration: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

/// A per-provider circuit breaker guarding calls that share a failure mode.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    /// Builds a breaker starting in the closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, state: Mutex::new(CircuitState::Closed { consecutive_failures: 0 }) }
    }

    /// Reports whether the breaker is currently rejecting calls outright
    /// (fully open, cooldown not yet elapsed).
    pub async fn is_open(&self) -> bool {
        match *self.state.lock().await {
            CircuitState::Open { opened_at } => opened_at.elapsed() < self.config.open_duration,
            CircuitState::Closed { .. } | CircuitState::HalfOpen => false,
        }
    }

    /// Runs `operation` if the breaker admits the call, tracking the
    /// outcome to update the breaker's state.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without running `operation`
    /// if the breaker is open (or a probe is already in flight), or
    /// [`ResilienceError::Inner`] if `operation` itself fails.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let is_probe = {
            let mut state = self.state.lock().await;
            match *state {
                CircuitState::Closed { .. } => false,
                CircuitState::Open { opened_at } => {
                    if opened_at.elapsed() >= self.config.open_duration {
                        *state = CircuitState::HalfOpen;
                        true
                    } else {
                        return Err(ResilienceError::CircuitOpen);
                    }
                }
                CircuitState::HalfOpen => return Err(ResilienceError::CircuitOpen),
            }
        };

        match operation().await {
            Ok(value) => {
                let mut state = self.state.lock().await;
                *state = CircuitState::Closed { consecutive_failures: 0 };
                Ok(value)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                if is_probe {
                    *state = CircuitState::Open { opened_at: Instant::now() };
                } else {
                    let consecutive_failures = match *state {
                        CircuitState::Closed { consecutive_failures } => consecutive_failures + 1,
                        CircuitState::Open { .. } | CircuitState::HalfOpen => 1,
                    };
                    *state = if consecutive_failures >= self.config.failure_threshold {
                        CircuitState::Open { opened_at: Instant::now() }
                    } else {
                        CircuitState::Closed { consecutive_failures }
                    };
                }
                Err(ResilienceError::Inner(err))
            }
        }
    }
}
