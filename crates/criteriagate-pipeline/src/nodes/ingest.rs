// crates/criteriagate-pipeline/src/nodes/ingest.rs
// ============================================================================
// Module: CriteriaGate Pipeline Ingest Node
// Description: Fetches a protocol's PDF bytes from its source location.
// Purpose: The pipeline's first node; every later node reads `pdf_bytes`
//          (extract) or the rows extract/parse derived from it.
// Dependencies: criteriagate-core, criteriagate-resilience
// ============================================================================

//! ## Overview
//! `file_uri` names a `gs://` or `local://` location; which scheme it is
//! belongs entirely to [`criteriagate_core::BlobStore`]'s implementation,
//! not to this node. A transient fetch failure is retried under
//! [`criteriagate_resilience::RetryPolicy`] behind a circuit breaker; a
//! permanent failure (missing object, path traversal, unsupported scheme)
//! is fatal and routes the run straight to `END`.

use std::sync::Arc;

use criteriagate_core::PipelineState;
use criteriagate_core::ProtocolStatus;
use criteriagate_resilience::RetryPolicy;
use tracing::Instrument;
use tracing::info_span;

use crate::calls::call_resilient;
use crate::deps::PipelineDeps;
use crate::error::PipelineError;
use crate::nodes::now;

/// Fetches `state.file_uri`'s bytes into `state.pdf_bytes`. Transitions the
/// protocol to `extracting` before attempting the fetch, and to
/// `extraction_failed` if it does not recover.
///
/// # Errors
///
/// Returns [`PipelineError`] only if the store itself rejects a status
/// transition; a fetch failure is recorded as a fatal `state.error` instead.
pub async fn run(mut state: PipelineState, deps: &PipelineDeps) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_node", node = "ingest", protocol_id = state.protocol_id.get());
    async move {
        let store = deps.store.clone();
        let protocol_id = state.protocol_id;
        crate::blocking::store_call(move || {
            store.transition_protocol_status(protocol_id, ProtocolStatus::Extracting, None, now())
        })
        .await?;
        state.status = "extracting".to_owned();

        let retry = RetryPolicy::default();
        let blob_store = Arc::clone(&deps.blob_store);
        let file_uri = state.file_uri.clone();
        let fetched = call_resilient(&deps.blob_breaker, &retry, deps.config.provider_timeout, || {
            let blob_store = Arc::clone(&blob_store);
            let uri = file_uri.clone();
            async move { blob_store.fetch(&uri).await }
        })
        .await;

        match fetched {
            Ok(bytes) => {
                state.pdf_bytes = Some(bytes);
            }
            Err(err) => {
                state.fail(format!("ingest: failed to fetch {}: {err}", state.file_uri));
                let store = deps.store.clone();
                let protocol_id = state.protocol_id;
                let error_reason = state.error.clone();
                crate::blocking::store_call(move || {
                    store.transition_protocol_status(
                        protocol_id,
                        ProtocolStatus::ExtractionFailed,
                        error_reason.as_deref(),
                        now(),
                    )
                })
                .await?;
            }
        }
        Ok(state)
    }
    .instrument(span)
    .await
}
