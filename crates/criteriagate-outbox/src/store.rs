// crates/criteriagate-outbox/src/store.rs
// ============================================================================
// Module: CriteriaGate Outbox Store Interface
// Description: Storage-agnostic operations the dispatcher needs against the
//              outbox table.
// Purpose: Let the dispatcher loop run against any backend (SQLite today)
//          without depending on it directly.
// Dependencies: async-trait, criteriagate_core::Timestamp
// ============================================================================

//! ## Overview
//! `claim_batch` must perform its selection and status update atomically
//! (e.g. `UPDATE ... WHERE status = 'pending' AND next_attempt_at <= ?
//! RETURNING *` under `SELECT ... FOR UPDATE SKIP LOCKED` semantics) so two
//! dispatcher workers never claim the same row.

use async_trait::async_trait;
use criteriagate_core::Timestamp;
use thiserror::Error;

use crate::event::OutboxEvent;

/// Errors raised by an outbox store implementation.
#[derive(Debug, Error)]
pub enum OutboxStoreError {
    /// Underlying storage I/O failure.
    #[error("outbox store io error: {0}")]
    Io(String),
    /// The store is temporarily unable to accept more claims (e.g. writer
    /// queue saturated).
    #[error("outbox store overloaded, retry after {retry_after_ms}ms")]
    Overloaded {
        /// Suggested backoff before retrying the claim.
        retry_after_ms: u64,
    },
}

/// Storage operations the dispatcher needs against the outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically claims up to `limit` pending, due events, marking them
    /// `in_flight`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError`] on I/O failure or overload.
    async fn claim_batch(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError>;

    /// Marks an event as `published`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError`] on I/O failure.
    async fn mark_published(&self, id: u64, now: Timestamp) -> Result<(), OutboxStoreError>;

    /// Marks an event as `failed`, incrementing `retry_count` and setting
    /// `next_attempt_at`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError`] on I/O failure.
    async fn mark_failed(
        &self,
        id: u64,
        next_attempt_at: Timestamp,
    ) -> Result<(), OutboxStoreError>;

    /// Marks an event as `dead_letter`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError`] on I/O failure.
    async fn mark_dead_letter(&self, id: u64) -> Result<(), OutboxStoreError>;

    /// Archives dead-letter rows older than `older_than`, applied lazily
    /// whenever the owning aggregate is next accessed.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError`] on I/O failure.
    async fn archive_dead_letters(&self, older_than: Timestamp) -> Result<u64, OutboxStoreError>;
}
