// crates/criteriagate-pipeline/src/event_handler.rs
// ============================================================================
// Module: CriteriaGate Pipeline Event Handler
// Description: Outbox handler for the `protocol_uploaded` event; the
//              dispatcher's entry point into the pipeline.
// Purpose: Translate an outbox delivery into a pipeline run and translate
//          the run's outcome back into the dispatcher's retry/dead-letter
//          contract.
// Dependencies: async-trait, criteriagate-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! A dispatcher delivery and a pipeline run have different failure
//! vocabularies. The dispatcher only understands "retry" (transient) and
//! "dead-letter" (permanent); the pipeline itself may complete a run that
//! ends in a fatal business outcome (extraction failed, the PDF exceeded
//! the size guardrail) without that being a handler *failure* — the event
//! was processed, just with a bad result recorded on the protocol. Only an
//! infrastructure-level [`PipelineError`] is translated into a
//! [`ClassifiedError`] here; a completed run with `state.error` set still
//! returns `Ok(())` so the dispatcher marks the event published rather than
//! retrying a run that will deterministically fail again.

use async_trait::async_trait;
use criteriagate_core::ClassifiedError;
use criteriagate_core::EventHandler;
use criteriagate_core::PermanentError;
use criteriagate_core::PipelineState;
use criteriagate_core::ProtocolId;
use criteriagate_core::TransientError;
use serde::Deserialize;
use tracing::error;
use tracing::info;

use crate::deps::PipelineDeps;
use crate::error::PipelineError;
use crate::runtime;

/// Decoded `protocol_uploaded` event payload.
#[derive(Debug, Deserialize)]
struct ProtocolUploaded {
    protocol_id: u64,
    file_uri: String,
}

/// Outbox handler that runs the full pipeline for a newly uploaded
/// protocol.
pub struct ProtocolUploadedHandler {
    /// Shared pipeline dependencies.
    deps: PipelineDeps,
}

impl ProtocolUploadedHandler {
    /// Builds a handler over `deps`.
    #[must_use]
    pub const fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl EventHandler for ProtocolUploadedHandler {
    async fn handle(&self, payload: &serde_json::Value) -> Result<(), ClassifiedError> {
        let decoded: ProtocolUploaded = serde_json::from_value(payload.clone())
            .map_err(|err| PermanentError::new(format!("protocol_uploaded: malformed payload: {err}")))?;
        let protocol_id = ProtocolId::from_raw(decoded.protocol_id)
            .ok_or_else(|| PermanentError::new("protocol_uploaded: protocol_id is zero"))?;

        let store = self.deps.store.clone();
        let protocol = crate::blocking::store_call(move || store.load_protocol(protocol_id))
            .await
            .map_err(|err| classify_load_failure(&err))?;

        let initial = PipelineState::new(protocol_id, decoded.file_uri, protocol.title);
        let thread_id = format!("protocol:{}", protocol_id.get());

        match runtime::run_pipeline(initial, &thread_id, &self.deps).await {
            Ok(state) => {
                if let Some(reason) = state.error {
                    info!(protocol_id = protocol_id.get(), reason, "protocol_uploaded: run halted on a business error");
                } else {
                    info!(protocol_id = protocol_id.get(), "protocol_uploaded: run reached END");
                }
                Ok(())
            }
            Err(err) => {
                error!(protocol_id = protocol_id.get(), %err, "protocol_uploaded: run failed on an infrastructure error");
                Err(classify_pipeline_failure(&err))
            }
        }
    }
}

/// Classifies a [`criteriagate_store_sqlite::StoreError`] surfaced while
/// loading the triggering protocol: a missing row is permanent, anything
/// else is assumed transient (a lock contention or IO blip).
fn classify_load_failure(err: &PipelineError) -> ClassifiedError {
    match err {
        PipelineError::Store(criteriagate_store_sqlite::StoreError::NotFound { .. }) => {
            PermanentError::new(format!("protocol_uploaded: {err}")).into()
        }
        other => TransientError::new(format!("protocol_uploaded: {other}")).into(),
    }
}

/// Classifies a [`PipelineError`] raised mid-run. Every variant here comes
/// from the durable store or the async runtime, none of which this handler
/// can distinguish as permanent, so all are treated as transient and left
/// to the dispatcher's retry policy and eventual dead-letter.
fn classify_pipeline_failure(err: &PipelineError) -> ClassifiedError {
    TransientError::new(format!("protocol_uploaded: {err}")).into()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted to unwrap.")]

    use std::sync::Arc;

    use async_trait::async_trait;
    use criteriagate_config::PipelineConfig;
    use criteriagate_core::BlobStore;
    use criteriagate_core::ClassifiedError;
    use criteriagate_core::EventHandler;
    use criteriagate_core::LlmMessage;
    use criteriagate_core::PermanentError;
    use criteriagate_core::StructuredLlm;
    use criteriagate_providers::RoutingTable;
    use criteriagate_providers::TerminologyRouter;
    use criteriagate_store_sqlite::SqliteStore;
    use criteriagate_store_sqlite::SqliteStoreConfig;
    use serde_json::Value;
    use serde_json::json;

    use super::ProtocolUploadedHandler;
    use crate::deps::PipelineDeps;
    use crate::ids::IdAllocator;
    use crate::roster::LlmRoster;

    struct AlwaysFailsBlob;

    #[async_trait]
    impl BlobStore for AlwaysFailsBlob {
        async fn fetch(&self, _uri: &str) -> Result<Vec<u8>, ClassifiedError> {
            Err(PermanentError::new("no such object").into())
        }
    }

    struct UnusedLlm;

    #[async_trait]
    impl StructuredLlm for UnusedLlm {
        async fn call(&self, _schema: &Value, _messages: &[LlmMessage]) -> Result<Value, ClassifiedError> {
            Err(PermanentError::new("unused in this test").into())
        }
    }

    fn deps() -> PipelineDeps {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).unwrap();
        let router = Arc::new(TerminologyRouter::new(RoutingTable::default_table(), std::collections::BTreeMap::new()));
        let ids = Arc::new(IdAllocator::new(crate::nodes::now()));
        PipelineDeps::new(store, PipelineConfig::default(), Arc::new(AlwaysFailsBlob), LlmRoster::uniform(Arc::new(UnusedLlm)), router, ids)
    }

    #[tokio::test]
    async fn a_completed_run_with_a_business_error_is_still_a_successful_delivery() {
        let deps = deps();
        let protocol_id = deps.store.insert_protocol("Sample", "local://p.pdf", crate::nodes::now()).unwrap();
        let handler = ProtocolUploadedHandler::new(deps);
        let payload = json!({ "protocol_id": protocol_id.get(), "file_uri": "local://p.pdf" });
        let result = handler.handle(&payload).await;
        assert!(result.is_ok(), "a fatal pipeline outcome is not a handler failure");
    }

    #[tokio::test]
    async fn a_malformed_payload_is_a_permanent_failure() {
        let handler = ProtocolUploadedHandler::new(deps());
        let payload = json!({ "nonsense": true });
        let result = handler.handle(&payload).await;
        assert!(matches!(result, Err(ClassifiedError::Permanent(_))));
    }

    #[tokio::test]
    async fn an_unknown_protocol_id_is_a_permanent_failure() {
        let handler = ProtocolUploadedHandler::new(deps());
        let payload = json!({ "protocol_id": 999_999, "file_uri": "local://missing.pdf" });
        let result = handler.handle(&payload).await;
        assert!(matches!(result, Err(ClassifiedError::Permanent(_))));
    }
}
