// crates/criteriagate-outbox/src/event.rs
// ============================================================================
// Module: CriteriaGate Outbox Event
// Description: The durable event record written alongside every domain write.
// Purpose: Give producers and the dispatcher a single row shape covering
//          identity, payload, delivery status, and retry bookkeeping.
// Dependencies: serde, criteriagate_core
// ============================================================================

//! ## Overview
//! An `OutboxEvent` is written in the same storage transaction as the
//! domain write it announces. The dispatcher never originates events; it
//! only claims, dispatches, and retires rows a producer already committed.

use criteriagate_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Not yet claimed by any dispatcher worker.
    Pending,
    /// Claimed by a worker; in the process of being handled.
    InFlight,
    /// Handler completed successfully.
    Published,
    /// Handler failed; may still be retried.
    Failed,
    /// Retries exhausted or the event type has no registered handler.
    DeadLetter,
}

/// A durable event row describing one pending effect (e.g. "dispatch to the
/// pipeline runtime", "notify a reviewer").
///
/// # Invariants
/// - `idempotency_key` is globally unique; a second write with the same key
///   is rejected by the store, not silently merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Row identifier, assigned by the store on insert.
    pub id: u64,
    /// Handler registry key (e.g. `"protocol_uploaded"`).
    pub event_type: String,
    /// Kind of aggregate this event concerns (e.g. `"protocol"`).
    pub aggregate_type: String,
    /// Identifier of the aggregate this event concerns, as decimal text.
    pub aggregate_id: String,
    /// Event payload, validated by the handler it is dispatched to.
    pub payload: serde_json::Value,
    /// Globally unique key derived by the producer (see
    /// [`crate::idempotency_key`]).
    pub idempotency_key: String,
    /// Current delivery status.
    pub status: OutboxStatus,
    /// Number of delivery attempts made so far.
    pub retry_count: u32,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Earliest time the dispatcher may attempt (or re-attempt) delivery.
    pub next_attempt_at: Timestamp,
    /// Time the handler reported success, if it has.
    pub published_at: Option<Timestamp>,
}

/// Derives the canonical idempotency key for a trigger-style event, per the
/// trigger contract: `"{aggregate_id}:{event_type}:{version}"`.
#[must_use]
pub fn idempotency_key(aggregate_id: &str, event_type: &str, version: u32) -> String {
    format!("{aggregate_id}:{event_type}:{version}")
}

#[cfg(test)]
mod tests {
    use super::idempotency_key;

    #[test]
    fn idempotency_key_is_stable_for_same_inputs() {
        let a = idempotency_key("42", "upload", 1);
        let b = idempotency_key("42", "upload", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn idempotency_key_changes_with_version() {
        assert_ne!(
            idempotency_key("42", "upload", 1),
            idempotency_key("42", "upload", 2)
        );
    }
}
