// crates/criteriagate-core/src/core/identifiers.rs
// ============================================================================
// Module: CriteriaGate Identifiers
// Description: Canonical opaque identifiers for protocols, batches, criteria,
//              entities, expression-tree nodes, and outbox events.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque and serialize as numbers on the wire. All are
//! 1-based (non-zero) so a zero value can never be mistaken for a valid id.

use std::fmt;
use std::num::NonZeroU64;

use serde::Deserialize;
use serde::Serialize;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Creates a new identifier from a non-zero value.
            #[must_use]
            pub const fn new(id: NonZeroU64) -> Self {
                Self(id)
            }

            /// Creates an identifier from a raw value (returns `None` if zero).
            #[must_use]
            pub fn from_raw(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            /// Returns the raw identifier value (always >= 1).
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.get().fmt(f)
            }
        }
    };
}

opaque_id!(ProtocolId, "Identifier for a `Protocol` aggregate root.");
opaque_id!(BatchId, "Identifier for a `CriteriaBatch`.");
opaque_id!(CriterionId, "Identifier for a `Criteria` row.");
opaque_id!(EntityId, "Identifier for an extracted `Entity`.");
opaque_id!(AtomId, "Identifier for an `AtomicCriterion` leaf node.");
opaque_id!(CompositeId, "Identifier for a `CompositeCriterion` interior node.");
opaque_id!(TriggerId, "Identifier for a trigger event, used for idempotency.");
opaque_id!(ReviewId, "Identifier for a `Review` record.");
opaque_id!(AuditLogId, "Identifier for an `AuditLog` entry.");

/// Identifier for any node (atom or composite) within a single criterion's
/// expression tree, used by `CriterionRelationship` edges.
///
/// # Invariants
/// - Edges reference nodes by id within the same `CriterionId`; cross-criterion
///   references are forbidden and rejected at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NodeId {
    /// References an `AtomicCriterion` leaf.
    Atom(AtomId),
    /// References a `CompositeCriterion` interior node.
    Composite(CompositeId),
}
