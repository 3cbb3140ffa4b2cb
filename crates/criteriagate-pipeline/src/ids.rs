// crates/criteriagate-pipeline/src/ids.rs
// ============================================================================
// Module: CriteriaGate Pipeline Id Allocator
// Description: Client-side primary key allocation for store rows the schema
//              does not auto-increment.
// Purpose: `criteria`, `entities`, `atomic_criteria`, and `composite_criteria`
//          are declared `INTEGER PRIMARY KEY` without `AUTOINCREMENT`, so the
//          caller must supply a unique id on every insert.
// Dependencies: criteriagate-core
// ============================================================================

//! ## Overview
//! One [`IdAllocator`] is constructed at process startup and shared via
//! `Arc` across every protocol the pipeline processes concurrently; it is
//! never reseeded per run, which is what keeps ids unique across protocols
//! racing each other against the same non-auto-incrementing keyspace. The
//! seed is derived from an explicit [`Timestamp`] passed in at construction
//! rather than read from the clock internally, so allocation stays
//! deterministic and testable.

use std::num::NonZeroU64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use criteriagate_core::AtomId;
use criteriagate_core::CompositeId;
use criteriagate_core::CriterionId;
use criteriagate_core::EntityId;
use criteriagate_core::Timestamp;

/// Process-lifetime counter that assigns client-side primary keys.
///
/// # Invariants
/// - Seeded once at startup and never reset; every `next_*` call returns a
///   value strictly greater than every value returned before it, for the
///   life of the process.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Seeds the allocator from `now`, spacing the starting value well
    /// clear of the small ids fixtures and migrations tend to use.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        let epoch_seconds = now.as_offset_date_time().unix_timestamp().max(0);
        #[allow(
            clippy::cast_sign_loss,
            reason = "epoch_seconds is clamped non-negative above"
        )]
        let seed = (epoch_seconds as u64).saturating_mul(1_000_000).max(1);
        Self { next: AtomicU64::new(seed) }
    }

    fn next_raw(&self) -> NonZeroU64 {
        let value = self.next.fetch_add(1, Ordering::Relaxed);
        NonZeroU64::new(value).unwrap_or(NonZeroU64::MIN)
    }

    /// Allocates the next [`CriterionId`].
    #[must_use]
    pub fn next_criterion_id(&self) -> CriterionId {
        CriterionId::new(self.next_raw())
    }

    /// Allocates the next [`EntityId`].
    #[must_use]
    pub fn next_entity_id(&self) -> EntityId {
        EntityId::new(self.next_raw())
    }

    /// Allocates the next [`AtomId`].
    #[must_use]
    pub fn next_atom_id(&self) -> AtomId {
        AtomId::new(self.next_raw())
    }

    /// Allocates the next [`CompositeId`].
    #[must_use]
    pub fn next_composite_id(&self) -> CompositeId {
        CompositeId::new(self.next_raw())
    }
}
