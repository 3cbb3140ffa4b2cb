// crates/criteriagate-outbox/src/lib.rs
// ============================================================================
// Module: CriteriaGate Outbox Library
// Description: Durable event records and a poll/claim/dispatch worker loop.
// Purpose: Guarantee no handler ever runs without a committed outbox row,
//          with bounded, jittered retry and eventual dead-lettering.
// Dependencies: criteriagate-core, tokio, tracing
// ============================================================================

//! ## Overview
//! CriteriaGate Outbox provides the event shape, the storage-facing trait
//! the dispatcher needs, and the dispatcher loop itself. A concrete store
//! (see `criteriagate-store-sqlite`) implements [`OutboxStore`]; producers
//! never import this crate directly, they only use the storage layer's
//! `persist_with_outbox` helper.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod backoff;
pub mod dispatcher;
pub mod event;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backoff::BackoffPolicy;
pub use dispatcher::DispatcherConfig;
pub use dispatcher::HandlerRegistry;
pub use dispatcher::run_once;
pub use event::OutboxEvent;
pub use event::OutboxStatus;
pub use event::idempotency_key;
pub use store::OutboxStore;
pub use store::OutboxStoreError;

#[cfg(test)]
mod tests {
    //! Test-only lint relaxations for panic-based assertions and debug output.
    #![allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )]

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use criteriagate_core::ClassifiedError;
    use criteriagate_core::EventHandler;
    use criteriagate_core::PermanentError;
    use criteriagate_core::Timestamp;
    use time::macros::datetime;
    use tokio::sync::Mutex;

    use super::DispatcherConfig;
    use super::HandlerRegistry;
    use super::OutboxEvent;
    use super::OutboxStatus;
    use super::OutboxStore;
    use super::OutboxStoreError;
    use super::run_once;

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _payload: &serde_json::Value) -> Result<(), ClassifiedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl EventHandler for RejectingHandler {
        async fn handle(&self, _payload: &serde_json::Value) -> Result<(), ClassifiedError> {
            Err(PermanentError::new("always rejects").into())
        }
    }

    struct MemoryStore {
        events: Mutex<Vec<OutboxEvent>>,
    }

    impl MemoryStore {
        fn with_events(events: Vec<OutboxEvent>) -> Self {
            Self { events: Mutex::new(events) }
        }
    }

    #[async_trait]
    impl OutboxStore for MemoryStore {
        async fn claim_batch(
            &self,
            now: Timestamp,
            limit: u32,
        ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
            let mut events = self.events.lock().await;
            let mut claimed = Vec::new();
            for event in events.iter_mut() {
                if claimed.len() as u32 >= limit {
                    break;
                }
                if event.status == OutboxStatus::Pending && event.next_attempt_at.is_at_or_after(&now) {
                    event.status = OutboxStatus::InFlight;
                    claimed.push(event.clone());
                }
            }
            Ok(claimed)
        }

        async fn mark_published(&self, id: u64, now: Timestamp) -> Result<(), OutboxStoreError> {
            let mut events = self.events.lock().await;
            if let Some(event) = events.iter_mut().find(|event| event.id == id) {
                event.status = OutboxStatus::Published;
                event.published_at = Some(now);
            }
            Ok(())
        }

        async fn mark_failed(
            &self,
            id: u64,
            next_attempt_at: Timestamp,
        ) -> Result<(), OutboxStoreError> {
            let mut events = self.events.lock().await;
            if let Some(event) = events.iter_mut().find(|event| event.id == id) {
                event.status = OutboxStatus::Pending;
                event.retry_count += 1;
                event.next_attempt_at = next_attempt_at;
            }
            Ok(())
        }

        async fn mark_dead_letter(&self, id: u64) -> Result<(), OutboxStoreError> {
            let mut events = self.events.lock().await;
            if let Some(event) = events.iter_mut().find(|event| event.id == id) {
                event.status = OutboxStatus::DeadLetter;
            }
            Ok(())
        }

        async fn archive_dead_letters(&self, _older_than: Timestamp) -> Result<u64, OutboxStoreError> {
            Ok(0)
        }
    }

    fn sample_event(id: u64, event_type: &str, now: Timestamp) -> OutboxEvent {
        OutboxEvent {
            id,
            event_type: event_type.to_owned(),
            aggregate_type: "protocol".to_owned(),
            aggregate_id: "1".to_owned(),
            payload: serde_json::json!({"protocol_id": 1}),
            idempotency_key: format!("1:{event_type}:1"),
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: now,
            next_attempt_at: now,
            published_at: None,
        }
    }

    #[tokio::test]
    async fn successful_handler_marks_event_published() {
        let now = Timestamp::new(datetime!(2026 - 01 - 01 00:00:00 UTC));
        let store = MemoryStore::with_events(vec![sample_event(1, "protocol_uploaded", now)]);
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0) });
        let registry = HandlerRegistry::new().with_handler("protocol_uploaded", handler.clone());
        let config = DispatcherConfig::default();

        let dispatched = run_once(&store, &registry, &config, now).await.expect("dispatch");
        assert_eq!(dispatched, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let events = store.events.lock().await;
        assert_eq!(events[0].status, OutboxStatus::Published);
    }

    #[tokio::test]
    async fn unregistered_event_type_is_dead_lettered_without_retry() {
        let now = Timestamp::new(datetime!(2026 - 01 - 01 00:00:00 UTC));
        let store = MemoryStore::with_events(vec![sample_event(1, "unknown_event", now)]);
        let registry = HandlerRegistry::new();
        let config = DispatcherConfig::default();

        run_once(&store, &registry, &config, now).await.expect("dispatch");

        let events = store.events.lock().await;
        assert_eq!(events[0].status, OutboxStatus::DeadLetter);
        assert_eq!(events[0].retry_count, 0);
    }

    #[tokio::test]
    async fn permanent_failure_dead_letters_on_first_attempt() {
        let now = Timestamp::new(datetime!(2026 - 01 - 01 00:00:00 UTC));
        let store = MemoryStore::with_events(vec![sample_event(1, "protocol_uploaded", now)]);
        let registry = HandlerRegistry::new().with_handler("protocol_uploaded", Arc::new(RejectingHandler));
        let config = DispatcherConfig::default();

        run_once(&store, &registry, &config, now).await.expect("dispatch");

        let events = store.events.lock().await;
        assert_eq!(events[0].status, OutboxStatus::DeadLetter);
    }
}
