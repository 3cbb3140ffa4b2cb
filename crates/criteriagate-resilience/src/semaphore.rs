// crates/criteriagate-resilience/src/semaphore.rs
// ============================================================================
// Module: CriteriaGate Resilience Semaphore
// Description: Fixed-capacity, fair, RAII-guarded concurrency limiter.
// Purpose: Bound how many grounding or structuring calls run at once against
//          a single external provider.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! Wraps [`tokio::sync::Semaphore`], which grants permits strictly in
//! request order. The returned [`SemaphorePermit`] releases its slot on
//! drop, so a cancelled task or an early `?` return always frees capacity
//! for the next waiter.

use std::sync::Arc;

use tokio::sync::AcquireError;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

/// A fixed-capacity limiter shared across concurrent callers.
#[derive(Debug, Clone)]
pub struct BoundedSemaphore {
    inner: Arc<Semaphore>,
}

impl BoundedSemaphore {
    /// Builds a limiter admitting at most `capacity` concurrent holders.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { inner: Arc::new(Semaphore::new(capacity)) }
    }

    /// Waits for a free slot and returns a guard holding it.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] only if the limiter has been closed, which
    /// this type never does on its own.
    pub async fn acquire(&self) -> Result<SemaphorePermit, AcquireError> {
        self.inner.clone().acquire_owned().await.map(SemaphorePermit)
    }

    /// Number of slots currently free.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

/// Holds one slot of a [`BoundedSemaphore`]; releases it on drop.
#[derive(Debug)]
pub struct SemaphorePermit(OwnedSemaphorePermit);
