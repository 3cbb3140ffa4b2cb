// crates/criteriagate-pipeline/src/nodes/extract.rs
// ============================================================================
// Module: CriteriaGate Pipeline Extract Node
// Description: Calls the extraction LLM over the protocol PDF and captures
//              its structured result.
// Purpose: Turns raw PDF bytes into the typed `ExtractionResult` the parse
//          node later writes into `CriteriaBatch`/`Criteria` rows.
// Dependencies: criteriagate-contract, criteriagate-core, criteriagate-resilience
// ============================================================================

//! ## Overview
//! The extraction call is multimodal: a short instruction message plus the
//! PDF bytes as an attachment, constrained to
//! [`criteriagate_contract::schemas::extraction_result_schema`]. The prompt
//! asks the model to split AND/OR-joined criteria sentences into separate
//! items; the structure node rebuilds the composite later from field
//! mappings, so extraction never needs to understand boolean structure.
//!
//! A base64-encoded payload over the hard size limit is fatal
//! (`pdf_too_large`); one approaching it only warns, since the LLM provider
//! itself is the authority on what it can actually accept.

use criteriagate_contract::schemas::extraction_result_schema;
use criteriagate_core::PipelineState;
use criteriagate_core::ProtocolStatus;
use criteriagate_resilience::RetryPolicy;
use tracing::Instrument;
use tracing::info_span;
use tracing::warn;

use crate::calls::call_resilient;
use crate::deps::PipelineDeps;
use crate::error::PipelineError;
use crate::nodes::now;

/// Records a fatal `state.error` and transitions the protocol to
/// `extraction_failed`, the edge spec.md documents for every fatal failure
/// while a protocol is `extracting`.
async fn fail_extraction(
    state: &mut PipelineState,
    deps: &PipelineDeps,
    message: impl Into<String>,
) -> Result<(), PipelineError> {
    state.fail(message);
    let store = deps.store.clone();
    let protocol_id = state.protocol_id;
    let error_reason = state.error.clone();
    crate::blocking::store_call(move || {
        store.transition_protocol_status(protocol_id, ProtocolStatus::ExtractionFailed, error_reason.as_deref(), now())
    })
    .await?;
    Ok(())
}

/// Base64 expands binary input by roughly 4/3; budget against the encoded
/// size since that is what crosses the wire to the LLM provider.
const BASE64_EXPANSION_NUMERATOR: usize = 4;
const BASE64_EXPANSION_DENOMINATOR: usize = 3;

/// Hard ceiling on the base64-encoded PDF payload. Above this, the call is
/// never attempted.
const HARD_LIMIT_BYTES: usize = 20 * 1024 * 1024;

/// Fraction of `HARD_LIMIT_BYTES` at which we warn but still attempt the call.
const WARN_THRESHOLD_NUMERATOR: usize = 9;
const WARN_THRESHOLD_DENOMINATOR: usize = 10;

const EXTRACTION_PROMPT: &str = "You are extracting eligibility criteria from a clinical trial \
protocol. Read the attached PDF and return every inclusion and exclusion criterion as a separate \
item, even when the source sentence joins several conditions with \"and\"/\"or\" — split each \
conjunct or disjunct into its own criterion rather than preserving the composite sentence. For \
each criterion, report its verbatim or lightly normalized text, whether it is inclusion or \
exclusion, any numeric thresholds and temporal constraints, free-text sub-conditions, whether the \
statement is asserted, negated, or uncertain, and your confidence in the extraction.";

/// Runs the extraction LLM over `state.pdf_bytes`, recording its structured
/// result on `state.extraction_json` and clearing `pdf_bytes`.
///
/// # Errors
///
/// Returns [`PipelineError`] only if the checkpoint's status transition
/// fails at the store; an oversized payload or LLM failure is recorded as a
/// fatal `state.error` instead.
pub async fn run(mut state: PipelineState, deps: &PipelineDeps) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_node", node = "extract", protocol_id = state.protocol_id.get());
    async move {
        let Some(pdf_bytes) = state.pdf_bytes.take() else {
            fail_extraction(&mut state, deps, "extract: no pdf_bytes available, ingest must run first").await?;
            return Ok(state);
        };

        let encoded_len = pdf_bytes.len() * BASE64_EXPANSION_NUMERATOR / BASE64_EXPANSION_DENOMINATOR;
        if encoded_len > HARD_LIMIT_BYTES {
            fail_extraction(&mut state, deps, "pdf_too_large").await?;
            return Ok(state);
        }
        if encoded_len * WARN_THRESHOLD_DENOMINATOR > HARD_LIMIT_BYTES * WARN_THRESHOLD_NUMERATOR {
            warn!(encoded_len, HARD_LIMIT_BYTES, "extract: pdf payload approaching the hard size limit");
        }

        let messages = [criteriagate_core::LlmMessage {
            role: "user".to_owned(),
            text: EXTRACTION_PROMPT.to_owned(),
            attachment: Some(pdf_bytes),
        }];
        let schema = extraction_result_schema();
        let retry = RetryPolicy::default();
        let llm = std::sync::Arc::clone(&deps.llm.extraction);
        let called = call_resilient(&deps.llm_breaker, &retry, deps.config.llm_timeout, || {
            let llm = std::sync::Arc::clone(&llm);
            let schema = schema.clone();
            let messages = messages.clone();
            async move { llm.call(&schema, &messages).await }
        })
        .await;

        match called {
            Ok(value) => {
                state.extraction_json = Some(serde_json::to_string(&value)?);
                state.status = "extracting".to_owned();
            }
            Err(err) => fail_extraction(&mut state, deps, format!("extract: extraction call failed: {err}")).await?,
        }

        Ok(state)
    }
    .instrument(span)
    .await
}
