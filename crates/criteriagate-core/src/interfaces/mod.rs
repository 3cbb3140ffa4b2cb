// crates/criteriagate-core/src/interfaces/mod.rs
// ============================================================================
// Module: CriteriaGate Interfaces
// Description: Backend-agnostic capability interfaces for blob storage,
//              structured LLM calls, terminology lookup, and outbox
//              handler dispatch.
// Purpose: Define the contract surfaces the pipeline runtime depends on
//          without embedding any particular backend.
// Dependencies: async-trait, serde, thiserror, crate::core
// ============================================================================

//! ## Overview
//! Every capability here is consumed by the pipeline across an `await`
//! point, so each trait is `async_trait` and `Send + Sync`. Errors are
//! classified as transient (safe to retry) or permanent (never retry)
//! throughout; callers decide backoff policy, implementations only
//! classify.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::domain::EntityType;

// ============================================================================
// SECTION: Classified Errors
// ============================================================================

/// An error that may succeed if retried (network blip, provider rate limit,
/// timeout).
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct TransientError {
    /// Human-readable detail.
    pub message: String,
}

impl TransientError {
    /// Builds a transient error from any displayable cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// An error that will not succeed on retry (malformed request, auth
/// failure, resource does not exist).
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct PermanentError {
    /// Human-readable detail.
    pub message: String,
}

impl PermanentError {
    /// Builds a permanent error from any displayable cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Unified error classification returned by every capability interface.
#[derive(Debug, Error, Clone)]
pub enum ClassifiedError {
    /// Retry may succeed.
    #[error(transparent)]
    Transient(#[from] TransientError),
    /// Retry will not succeed.
    #[error(transparent)]
    Permanent(#[from] PermanentError),
}

impl ClassifiedError {
    /// Reports whether this error is safe to retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// ============================================================================
// SECTION: Blob Store
// ============================================================================

/// Fetches document bytes from object storage or a local filesystem root.
///
/// # Invariants
/// - Implementations resolve `gs://` and `local://` schemes; `local://`
///   implementations must reject paths that escape their allow-listed root.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetches the bytes at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Transient`] for network/IO failures safe
    /// to retry, [`ClassifiedError::Permanent`] for missing objects, path
    /// traversal attempts, or unsupported schemes.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ClassifiedError>;
}

// ============================================================================
// SECTION: Structured LLM
// ============================================================================

/// One chat-style message sent to a structured LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// Message role (`system`, `user`, `assistant`).
    pub role: String,
    /// Message text.
    pub text: String,
    /// Optional inline attachment bytes (e.g. a PDF page image), base64-free
    /// in memory and encoded only at the transport boundary.
    pub attachment: Option<Vec<u8>>,
}

/// Calls a large language model and deserializes its response against a
/// caller-supplied JSON Schema.
///
/// # Invariants
/// - Implementations validate the model's raw output against `schema`
///   before returning; a schema violation is a [`PermanentError`].
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    /// Issues a structured call, returning the parsed response as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Transient`] for timeouts and provider
    /// errors, [`ClassifiedError::Permanent`] for schema violations or
    /// content-policy rejections.
    async fn call(
        &self,
        schema: &serde_json::Value,
        messages: &[LlmMessage],
    ) -> Result<serde_json::Value, ClassifiedError>;
}

// ============================================================================
// SECTION: Terminology Provider
// ============================================================================

/// A single terminology match returned by a [`TerminologyProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Provider that produced this candidate (e.g. `"snomed"`).
    pub provider: String,
    /// Terminology concept code.
    pub code: String,
    /// Canonical display text for the concept.
    pub display: String,
    /// Match confidence in `[0, 1]`, set by the provider's matching tier.
    pub confidence: f64,
}

/// Resolves free-text entity mentions against a terminology vocabulary
/// (SNOMED, LOINC, RxNorm, ICD-10, HPO, or UMLS).
///
/// # Invariants
/// - `search` never blocks on anything but network I/O and is cancellable.
#[async_trait]
pub trait TerminologyProvider: Send + Sync {
    /// Searches for candidates matching `entity_text` under `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Transient`] for provider outages,
    /// [`ClassifiedError::Permanent`] for malformed queries.
    async fn search(
        &self,
        entity_text: &str,
        entity_type: EntityType,
    ) -> Result<Vec<Candidate>, ClassifiedError>;
}

// ============================================================================
// SECTION: Outbox Event Handler
// ============================================================================

/// Handles one class of outbox event, identified by `event_type`.
///
/// # Invariants
/// - Implementations must be idempotent: the dispatcher guarantees
///   at-least-once delivery, never exactly-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes a single event payload.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Transient`] to trigger a retry with
    /// backoff, [`ClassifiedError::Permanent`] to dead-letter immediately.
    async fn handle(&self, payload: &serde_json::Value) -> Result<(), ClassifiedError>;
}

#[cfg(test)]
mod tests {
    use super::ClassifiedError;
    use super::PermanentError;
    use super::TransientError;

    #[test]
    fn transient_error_reports_as_transient() {
        let err: ClassifiedError = TransientError::new("timed out").into();
        assert!(err.is_transient());
    }

    #[test]
    fn permanent_error_reports_as_not_transient() {
        let err: ClassifiedError = PermanentError::new("schema mismatch").into();
        assert!(!err.is_transient());
    }
}
