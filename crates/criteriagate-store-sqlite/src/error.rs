// crates/criteriagate-store-sqlite/src/error.rs
// ============================================================================
// Module: CriteriaGate SQLite Store Errors
// Description: Error taxonomy for the SQLite-backed store.
// Purpose: Translate rusqlite/serde failures into a store-level vocabulary
//          the pipeline and outbox dispatcher can match on.
// Dependencies: rusqlite, thiserror, criteriagate_outbox
// ============================================================================

use criteriagate_outbox::OutboxStoreError;
use thiserror::Error;

/// Errors raised by the `SQLite`-backed store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("sqlite error: {0}")]
    Db(#[from] rusqlite::Error),
    /// A row's JSON column failed to (de)serialize.
    #[error("json (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// A requested row does not exist.
    #[error("{what} {id} not found")]
    NotFound {
        /// Human-readable kind of row (e.g. `"protocol"`).
        what: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// A persisted value violated an invariant the store is responsible for
    /// enforcing (e.g. a relationship edge crossing criterion boundaries).
    #[error("invalid state: {0}")]
    Invalid(String),
}

impl From<StoreError> for OutboxStoreError {
    fn from(err: StoreError) -> Self {
        Self::Io(err.to_string())
    }
}
