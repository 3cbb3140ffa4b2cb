// crates/criteriagate-pipeline/src/error.rs
// ============================================================================
// Module: CriteriaGate Pipeline Error
// Description: Infrastructure-level failure type for the pipeline runtime.
// Purpose: Distinguish failures the runtime cannot route around (store I/O,
//          serialization, task join) from business-logic failures, which
//          stay captured in `PipelineState.error` and never become `Err`.
// Dependencies: criteriagate-store-sqlite, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! A node function returns `Err(PipelineError)` only when the pipeline
//! itself cannot continue: the store is unreachable, a checkpoint could
//! not be serialized, or the blocking task that ran a synchronous store
//! call panicked or was cancelled. Extraction failures, grounding
//! failures, and every other business outcome the spec calls "fatal" or
//! "partial" are recorded on [`criteriagate_core::PipelineState`] instead
//! and the runtime routes to `END` by inspecting `should_halt`.

use criteriagate_store_sqlite::StoreError;
use thiserror::Error;

/// Infrastructure failures that abort the pipeline runtime outright.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The durable store rejected a read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// A value could not be serialized to or deserialized from JSON.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The blocking task wrapping a synchronous store call panicked or was
    /// cancelled.
    #[error("blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// A dependency the runtime expected to be configured was absent.
    #[error("missing dependency: {0}")]
    MissingDependency(String),
}
