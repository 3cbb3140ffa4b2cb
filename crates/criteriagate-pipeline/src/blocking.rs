// crates/criteriagate-pipeline/src/blocking.rs
// ============================================================================
// Module: CriteriaGate Pipeline Blocking Store Bridge
// Description: Runs a synchronous `SqliteStore` call on a blocking thread.
// Purpose: Every node function is async; `SqliteStore` is a synchronous,
//          mutex-guarded `rusqlite::Connection`. Centralize the
//          `spawn_blocking` + `JoinError` mapping so node code reads like a
//          plain store call.
// Dependencies: tokio, criteriagate-store-sqlite
// ============================================================================

//! ## Overview
//! Mirrors [`criteriagate_store_sqlite`]'s own `OutboxStore` adapter, which
//! wraps every synchronous `rusqlite` call in [`tokio::task::spawn_blocking`]
//! rather than pulling in a separate async database driver.

use criteriagate_store_sqlite::StoreError;

use crate::error::PipelineError;

/// Runs `operation` on a blocking thread, flattening a task join failure
/// into [`PipelineError::Join`] and a store failure into
/// [`PipelineError::Store`].
///
/// # Errors
///
/// Returns [`PipelineError::Join`] if the blocking task panicked or was
/// cancelled, or [`PipelineError::Store`] if `operation` itself failed.
pub(crate) async fn store_call<F, T>(operation: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(operation).await?;
    Ok(result?)
}
