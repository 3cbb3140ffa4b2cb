// crates/criteriagate-outbox/src/dispatcher.rs
// ============================================================================
// Module: CriteriaGate Outbox Dispatcher
// Description: Poll/claim/dispatch loop driving registered event handlers.
// Purpose: Guarantee at-least-once, timeout- and panic-guarded delivery of
//          outbox events without ever running a handler off an outbox row.
// Dependencies: tokio, tracing, criteriagate_core
// ============================================================================

//! ## Overview
//! Mirrors the teacher's scheme-keyed composite broker: handlers are
//! registered by a string key (`event_type` here, URI scheme there) in a
//! `BTreeMap` built through a small builder. Unregistered event types are a
//! permanent failure and are dead-lettered without ever being retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use criteriagate_core::ClassifiedError;
use criteriagate_core::EventHandler;
use criteriagate_core::Timestamp;
use tracing::Instrument;
use tracing::info_span;
use tracing::warn;

use crate::backoff::BackoffPolicy;
use crate::event::OutboxEvent;
use crate::store::OutboxStore;
use crate::store::OutboxStoreError;

/// Configuration for one dispatcher loop run.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the dispatcher polls for due events.
    pub poll_interval: StdDuration,
    /// Maximum retries before an event is dead-lettered.
    pub max_retries: u32,
    /// Maximum events claimed per poll.
    pub batch_size: u32,
    /// Per-handler-call timeout.
    pub handler_timeout: StdDuration,
    /// Backoff schedule applied between retries.
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_millis(500),
            max_retries: 3,
            batch_size: 32,
            handler_timeout: StdDuration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Registry of event handlers keyed by `event_type`, built once at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type`, replacing any prior handler for
    /// the same key.
    #[must_use]
    pub fn with_handler(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    /// Looks up the handler registered for `event_type`.
    #[must_use]
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }
}

/// Drives one poll/claim/dispatch cycle against `store` using `registry`.
///
/// Producers commit outbox rows in the same transaction as their domain
/// write; this function only claims rows already committed and never
/// originates one.
///
/// # Errors
///
/// Returns [`OutboxStoreError`] when the store itself cannot be polled or
/// claimed against; individual handler failures are absorbed into retry or
/// dead-letter transitions and never propagate here.
pub async fn run_once(
    store: &dyn OutboxStore,
    registry: &HandlerRegistry,
    config: &DispatcherConfig,
    now: Timestamp,
) -> Result<usize, OutboxStoreError> {
    let claimed = store.claim_batch(now, config.batch_size).await?;
    let dispatched = claimed.len();
    for event in claimed {
        dispatch_one(store, registry, config, now, event).await;
    }
    Ok(dispatched)
}

/// Dispatches a single claimed event to its registered handler, applying the
/// timeout/panic guard and the retry/dead-letter transition.
async fn dispatch_one(
    store: &dyn OutboxStore,
    registry: &HandlerRegistry,
    config: &DispatcherConfig,
    now: Timestamp,
    event: OutboxEvent,
) {
    let span = info_span!(
        "outbox_dispatch",
        event_id = event.id,
        event_type = %event.event_type,
        retry_count = event.retry_count,
    );
    async {
        let Some(handler) = registry.get(&event.event_type) else {
            warn!("no handler registered for event type, dead-lettering");
            if let Err(err) = store.mark_dead_letter(event.id).await {
                warn!(error = %err, "failed to mark unregistered event dead-lettered");
            }
            return;
        };

        let outcome = tokio::time::timeout(config.handler_timeout, handler.handle(&event.payload)).await;

        match outcome {
            Ok(Ok(())) => {
                if let Err(err) = store.mark_published(event.id, now).await {
                    warn!(error = %err, "failed to mark event published");
                }
            }
            Ok(Err(ClassifiedError::Permanent(reason))) => {
                warn!(reason = %reason, "handler reported permanent failure, dead-lettering");
                if let Err(err) = store.mark_dead_letter(event.id).await {
                    warn!(error = %err, "failed to mark event dead-lettered");
                }
            }
            Ok(Err(ClassifiedError::Transient(reason))) => {
                warn!(reason = %reason, "handler reported transient failure");
                retry_or_dead_letter(store, config, now, &event).await;
            }
            Err(_elapsed) => {
                warn!("handler timed out");
                retry_or_dead_letter(store, config, now, &event).await;
            }
        }
    }
    .instrument(span)
    .await;
}

/// Transitions an event to `failed` with backoff, or `dead_letter` once
/// `max_retries` is exceeded.
async fn retry_or_dead_letter(
    store: &dyn OutboxStore,
    config: &DispatcherConfig,
    now: Timestamp,
    event: &OutboxEvent,
) {
    let next_retry_count = event.retry_count.saturating_add(1);
    if next_retry_count > config.max_retries {
        if let Err(err) = store.mark_dead_letter(event.id).await {
            warn!(error = %err, "failed to mark event dead-lettered after retry exhaustion");
        }
        return;
    }
    let delay_ms = config.backoff.delay_ms(next_retry_count);
    let next_attempt_at = now.plus(time::Duration::milliseconds(
        i64::try_from(delay_ms).unwrap_or(i64::MAX),
    ));
    if let Err(err) = store.mark_failed(event.id, next_attempt_at).await {
        warn!(error = %err, "failed to mark event failed");
    }
}
