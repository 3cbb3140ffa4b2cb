// crates/criteriagate-resilience/src/lib.rs
// ============================================================================
// Module: CriteriaGate Resilience
// Description: Retry, timeout, circuit breaker, bounded semaphore, and TTL
//              cache primitives for calls to external providers.
// Purpose: Give the pipeline and outbox dispatcher one shared, tested set of
//          fault-tolerance wrappers instead of ad hoc handling per call site.
// Dependencies: tokio, lru, rand, thiserror, criteriagate_core
// ============================================================================

//! ## Overview
//! Every external call the pipeline makes (blob fetch, LLM extraction,
//! terminology search) is expected to pass through some combination of
//! these wrappers: a [`circuit_breaker::CircuitBreaker`] to stop calling a
//! provider that is already down, a [`retry::RetryPolicy`] to absorb
//! transient blips, a [`timeout::with_timeout`] deadline so one slow call
//! cannot stall a whole batch, a [`semaphore::BoundedSemaphore`] to cap
//! concurrency per provider, and a [`cache::TtlCache`] to avoid repeating
//! identical terminology lookups within a short window.
//!
//! None of these wrappers classify errors themselves; callers pass a
//! predicate (usually [`criteriagate_core::ClassifiedError::is_transient`])
//! so the policy stays decoupled from any one provider's error type.

pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod retry;
pub mod semaphore;
pub mod timeout;

pub use cache::CacheKey;
pub use cache::TtlCache;
pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitBreakerConfig;
pub use error::ResilienceError;
pub use retry::RetryPolicy;
pub use semaphore::BoundedSemaphore;
pub use semaphore::SemaphorePermit;
pub use timeout::with_timeout;
