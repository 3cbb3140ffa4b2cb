// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Shared capability mocks and a `PipelineDeps` builder reused
//              across the black-box pipeline/outbox scenarios.
// Purpose: Keep each scenario file focused on the behavior it exercises;
//          every mock here mirrors a pattern already used in a node's own
//          `#[cfg(test)]` module.
// Dependencies: async-trait, criteriagate-core, criteriagate-providers,
//               criteriagate-store-sqlite, serde_json, time
// ============================================================================

#![allow(dead_code, reason = "not every scenario file exercises every helper")]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use criteriagate_config::PipelineConfig;
use criteriagate_core::BlobStore;
use criteriagate_core::Candidate;
use criteriagate_core::ClassifiedError;
use criteriagate_core::EntityType;
use criteriagate_core::LlmMessage;
use criteriagate_core::PermanentError;
use criteriagate_core::StructuredLlm;
use criteriagate_core::TerminologyProvider;
use criteriagate_core::Timestamp;
use criteriagate_pipeline::IdAllocator;
use criteriagate_pipeline::LlmRoster;
use criteriagate_pipeline::PipelineDeps;
use criteriagate_providers::RoutingTable;
use criteriagate_providers::TerminologyRouter;
use criteriagate_store_sqlite::SqliteStore;
use criteriagate_store_sqlite::SqliteStoreConfig;
use serde_json::Value;
use serde_json::json;
use time::macros::datetime;

/// Fixed clock for every scenario; deterministic and comfortably inside the
/// valid `OffsetDateTime` range.
pub fn now() -> Timestamp {
    Timestamp::new(datetime!(2026 - 01 - 15 09:00:00 UTC))
}

/// Opens a fresh in-memory store. Each scenario gets its own, so tests never
/// interfere with each other.
pub fn fresh_store() -> SqliteStore {
    SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("in-memory store opens")
}

/// A `BlobStore` that always returns the same fixed bytes, standing in for
/// a real object store fetch of the protocol PDF.
pub struct FixedBlobStore {
    bytes: Vec<u8>,
}

impl FixedBlobStore {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

#[async_trait]
impl BlobStore for FixedBlobStore {
    async fn fetch(&self, _uri: &str) -> Result<Vec<u8>, ClassifiedError> {
        Ok(self.bytes.clone())
    }
}

/// A `BlobStore` that always fails, for exercising the ingest fatal path.
pub struct AlwaysFailsBlobStore;

#[async_trait]
impl BlobStore for AlwaysFailsBlobStore {
    async fn fetch(&self, _uri: &str) -> Result<Vec<u8>, ClassifiedError> {
        Err(PermanentError::new("no such object").into())
    }
}

/// A `StructuredLlm` that always returns one fixed response, regardless of
/// schema or message content. Mirrors the `RespondsWith`/`FixedResponseLlm`
/// idiom every node's own test module already uses.
pub struct FixedResponseLlm(pub Value);

#[async_trait]
impl StructuredLlm for FixedResponseLlm {
    async fn call(&self, _schema: &Value, _messages: &[LlmMessage]) -> Result<Value, ClassifiedError> {
        Ok(self.0.clone())
    }
}

/// A content-agnostic grounding-decision `StructuredLlm`: always reports a
/// single fixed high-confidence candidate, except for the ground node's own
/// warmup call, which it answers with a placeholder of confidence 0.
pub struct ConfidentDecisionLlm {
    pub provider: &'static str,
    pub code: &'static str,
    pub display: &'static str,
    pub confidence: f64,
}

impl ConfidentDecisionLlm {
    pub fn new(provider: &'static str, code: &'static str, display: &'static str, confidence: f64) -> Self {
        Self { provider, code, display, confidence }
    }
}

#[async_trait]
impl StructuredLlm for ConfidentDecisionLlm {
    async fn call(&self, _schema: &Value, messages: &[LlmMessage]) -> Result<Value, ClassifiedError> {
        if messages.first().is_some_and(|message| message.text.contains("Warmup")) {
            return Ok(json!({
                "best_candidate": {"provider": "snomed", "code": "0", "display": "warmup", "confidence": 0.0},
                "confidence": 0.0,
                "rationale": "warmup"
            }));
        }
        Ok(json!({
            "best_candidate": {
                "provider": self.provider,
                "code": self.code,
                "display": self.display,
            },
            "confidence": self.confidence,
            "rationale": "fixed decision for system test",
        }))
    }
}

/// A `TerminologyProvider` that grounds only entity texts on its allow
/// list, returning an empty candidate list for anything else. Used to
/// engineer a mix of grounded and expert-review outcomes in one run.
pub struct SelectiveProvider {
    pub name: &'static str,
    pub grounds: Vec<&'static str>,
    pub confidence: f64,
}

#[async_trait]
impl TerminologyProvider for SelectiveProvider {
    async fn search(&self, entity_text: &str, _entity_type: EntityType) -> Result<Vec<Candidate>, ClassifiedError> {
        if self.grounds.contains(&entity_text) {
            Ok(vec![Candidate {
                provider: self.name.to_owned(),
                code: "38341003".to_owned(),
                display: entity_text.to_owned(),
                confidence: self.confidence,
            }])
        } else {
            Ok(Vec::new())
        }
    }
}

/// A `TerminologyProvider` that never returns a candidate. The router
/// treats a routing-table entry absent from the registry as a permanent
/// configuration error for the whole route, so every provider the table
/// lists for a given entity type must be registered even when a scenario
/// only cares about one of them.
pub struct EmptyProvider;

#[async_trait]
impl TerminologyProvider for EmptyProvider {
    async fn search(&self, _entity_text: &str, _entity_type: EntityType) -> Result<Vec<Candidate>, ClassifiedError> {
        Ok(Vec::new())
    }
}

/// Builds `PipelineDeps` over a fresh store, parameterized by the blob
/// store, the four-role LLM roster, and the terminology provider registry a
/// given scenario needs.
pub fn deps_with(
    store: SqliteStore,
    blob_store: Arc<dyn BlobStore>,
    roster: LlmRoster,
    providers: BTreeMap<String, Arc<dyn TerminologyProvider>>,
) -> PipelineDeps {
    let router = Arc::new(TerminologyRouter::new(RoutingTable::default_table(), providers));
    let ids = Arc::new(IdAllocator::new(now()));
    PipelineDeps::new(store, PipelineConfig::default(), blob_store, roster, router, ids)
}

/// An ordinal-detection response that never flags any atom as an ordinal
/// scale; safe to reuse across every scenario regardless of whether any of
/// its atoms end up missing a unit, since an empty resolutions list is
/// always a harmless no-op for `ordinal_resolve`.
pub fn no_ordinal_scales() -> Value {
    json!({ "resolutions": [] })
}
