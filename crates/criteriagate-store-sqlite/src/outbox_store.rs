// crates/criteriagate-store-sqlite/src/outbox_store.rs
// ============================================================================
// Module: CriteriaGate SQLite Outbox Store
// Description: `OutboxStore` implementation against the `outbox_events` table.
// Purpose: Let the dispatcher loop claim, publish, retry, and dead-letter
//          rows without knowing they live in `SQLite`.
// Dependencies: async-trait, rusqlite, criteriagate_core, criteriagate_outbox
// ============================================================================

//! ## Overview
//! `claim_batch` runs as a single transaction: select due rows, then update
//! their status to `in_flight` before returning them, so two dispatcher
//! workers sharing one store never claim the same row twice. All work is
//! synchronous `rusqlite` wrapped in [`tokio::task::spawn_blocking`] so the
//! async trait contract holds without pulling in a separate async driver.

use async_trait::async_trait;
use criteriagate_core::Timestamp;
use criteriagate_outbox::OutboxEvent;
use criteriagate_outbox::OutboxStatus;
use criteriagate_outbox::OutboxStore;
use criteriagate_outbox::OutboxStoreError;
use rusqlite::Row;
use rusqlite::params;

use crate::store::SqliteStore;
use crate::store::id_to_sql;
use crate::store::sql_to_id;
use crate::store::text_to_timestamp;
use crate::store::timestamp_to_text;

/// Decodes a stored [`OutboxStatus`] text value, defaulting unrecognized
/// values to `dead_letter` so a corrupt row cannot be retried forever.
fn text_to_status(value: &str) -> OutboxStatus {
    match value {
        "pending" => OutboxStatus::Pending,
        "in_flight" => OutboxStatus::InFlight,
        "published" => OutboxStatus::Published,
        "failed" => OutboxStatus::Failed,
        _ => OutboxStatus::DeadLetter,
    }
}

/// Maps one `outbox_events` row to an [`OutboxEvent`].
fn row_to_event(row: &Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let id: i64 = row.get(0)?;
    let event_type: String = row.get(1)?;
    let aggregate_type: String = row.get(2)?;
    let aggregate_id: String = row.get(3)?;
    let payload_json: String = row.get(4)?;
    let idempotency_key: String = row.get(5)?;
    let status: String = row.get(6)?;
    let retry_count: u32 = row.get(7)?;
    let created_at: String = row.get(8)?;
    let next_attempt_at: String = row.get(9)?;
    let published_at: Option<String> = row.get(10)?;

    let to_sql_err = |err: crate::error::StoreError| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(err.to_string())),
        )
    };

    Ok(OutboxEvent {
        id: sql_to_id(id).map_err(to_sql_err)?,
        event_type,
        aggregate_type,
        aggregate_id,
        payload: serde_json::from_str(&payload_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?,
        idempotency_key,
        status: text_to_status(&status),
        retry_count,
        created_at: text_to_timestamp(&created_at).map_err(to_sql_err)?,
        next_attempt_at: text_to_timestamp(&next_attempt_at).map_err(to_sql_err)?,
        published_at: published_at.map(|value| text_to_timestamp(&value)).transpose().map_err(to_sql_err)?,
    })
}

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn claim_batch(&self, now: Timestamp, limit: u32) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let connection = self.shared_connection();
        tokio::task::spawn_blocking(move || {
            let mut guard = connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let tx = guard.transaction().map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            let ids: Vec<i64> = {
                let mut statement = tx
                    .prepare(
                        "SELECT id FROM outbox_events
                         WHERE status IN ('pending', 'failed') AND next_attempt_at <= ?1
                         ORDER BY next_attempt_at ASC LIMIT ?2",
                    )
                    .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
                let rows = statement
                    .query_map(params![timestamp_to_text(now), limit], |row| row.get::<_, i64>(0))
                    .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(|err| OutboxStoreError::Io(err.to_string()))?
            };
            if ids.is_empty() {
                tx.commit().map_err(|err| OutboxStoreError::Io(err.to_string()))?;
                return Ok(Vec::new());
            }
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            tx.execute(
                &format!("UPDATE outbox_events SET status = 'in_flight' WHERE id IN ({placeholders})"),
                rusqlite::params_from_iter(ids.iter().copied()),
            )
            .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            let mut statement = tx
                .prepare(&format!(
                    "SELECT id, event_type, aggregate_type, aggregate_id, payload_json,
                            idempotency_key, status, retry_count, created_at, next_attempt_at,
                            published_at
                     FROM outbox_events WHERE id IN ({placeholders})"
                ))
                .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            let events = statement
                .query_map(rusqlite::params_from_iter(ids.iter().copied()), row_to_event)
                .map_err(|err| OutboxStoreError::Io(err.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            drop(statement);
            tx.commit().map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            Ok(events)
        })
        .await
        .map_err(|err| OutboxStoreError::Io(err.to_string()))?
    }

    async fn mark_published(&self, id: u64, now: Timestamp) -> Result<(), OutboxStoreError> {
        let connection = self.shared_connection();
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .execute(
                    "UPDATE outbox_events SET status = 'published', published_at = ?1 WHERE id = ?2",
                    params![timestamp_to_text(now), id_to_sql(id)],
                )
                .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|err| OutboxStoreError::Io(err.to_string()))?
    }

    async fn mark_failed(&self, id: u64, next_attempt_at: Timestamp) -> Result<(), OutboxStoreError> {
        let connection = self.shared_connection();
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .execute(
                    "UPDATE outbox_events
                     SET status = 'failed', retry_count = retry_count + 1, next_attempt_at = ?1
                     WHERE id = ?2",
                    params![timestamp_to_text(next_attempt_at), id_to_sql(id)],
                )
                .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|err| OutboxStoreError::Io(err.to_string()))?
    }

    async fn mark_dead_letter(&self, id: u64) -> Result<(), OutboxStoreError> {
        let connection = self.shared_connection();
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .execute(
                    "UPDATE outbox_events SET status = 'dead_letter' WHERE id = ?1",
                    params![id_to_sql(id)],
                )
                .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|err| OutboxStoreError::Io(err.to_string()))?
    }

    async fn archive_dead_letters(&self, older_than: Timestamp) -> Result<u64, OutboxStoreError> {
        let connection = self.shared_connection();
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let changed = guard
                .execute(
                    "DELETE FROM outbox_events WHERE status = 'dead_letter' AND created_at < ?1",
                    params![timestamp_to_text(older_than)],
                )
                .map_err(|err| OutboxStoreError::Io(err.to_string()))?;
            Ok(u64::try_from(changed).unwrap_or(0))
        })
        .await
        .map_err(|err| OutboxStoreError::Io(err.to_string()))?
    }
}
