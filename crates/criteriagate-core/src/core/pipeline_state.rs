// crates/criteriagate-core/src/core/pipeline_state.rs
// ============================================================================
// Module: CriteriaGate Pipeline State
// Description: Flat, checkpointable state threaded through the seven-node
//              pipeline graph.
// Purpose: Keep checkpoint payloads small and serializable while letting
//          each node read/write only the fields it owns.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! `PipelineState` fields are JSON strings rather than nested structs so a
//! checkpoint write is a single flat row. Node functions own write access to
//! specific fields; the runtime never inspects field contents, only
//! `status` and `error` for routing.

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::BatchId;
use crate::core::identifiers::ProtocolId;

/// State threaded through `ingest -> extract -> parse -> ground -> persist
/// -> structure -> ordinal_resolve -> END`.
///
/// # Invariants
/// - `pdf_bytes` is cleared by the extract node and never repopulated.
/// - A non-empty `error` routes unconditionally to `END`, regardless of
///   which node set it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Protocol this run concerns.
    pub protocol_id: ProtocolId,
    /// Source document location.
    pub file_uri: String,
    /// Protocol title, set at trigger time or overwritten from extraction.
    pub title: String,
    /// Batch written by the parse node, once it has run.
    pub batch_id: Option<BatchId>,
    /// Raw PDF bytes, present only between ingest and extract.
    pub pdf_bytes: Option<Vec<u8>>,
    /// Serialized `ExtractionResult` produced by the extract node.
    pub extraction_json: Option<String>,
    /// Serialized entity-lite records produced by the parse node.
    pub entities_json: Option<String>,
    /// Serialized grounding results produced by the ground node.
    pub grounded_entities_json: Option<String>,
    /// Criteria inherited from an archived batch, present only on re-extraction.
    pub archived_reviewed_criteria: Option<String>,
    /// Serialized ordinal-resolve proposals.
    pub ordinal_proposals_json: Option<String>,
    /// Current node's reported status label.
    pub status: String,
    /// Fatal error, if any; non-empty routes the run to `END`.
    pub error: Option<String>,
    /// Non-fatal errors accumulated across nodes.
    pub errors: Vec<String>,
}

impl PipelineState {
    /// Creates the initial state for a newly triggered run.
    #[must_use]
    pub fn new(protocol_id: ProtocolId, file_uri: String, title: String) -> Self {
        Self {
            protocol_id,
            file_uri,
            title,
            batch_id: None,
            pdf_bytes: None,
            extraction_json: None,
            entities_json: None,
            grounded_entities_json: None,
            archived_reviewed_criteria: None,
            ordinal_proposals_json: None,
            status: "uploaded".to_owned(),
            error: None,
            errors: Vec::new(),
        }
    }

    /// Reports whether the run should route to `END` rather than its next node.
    #[must_use]
    pub fn should_halt(&self) -> bool {
        self.error.is_some()
    }

    /// Records a fatal error, halting the run at the next edge evaluation.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
    }

    /// Records a non-fatal error without halting the run.
    pub fn record_error(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
    }

    /// Returns a copy of `self` with `pdf_bytes` cleared, suitable for
    /// checkpoint persistence.
    #[must_use]
    pub fn for_checkpoint(&self) -> Self {
        let mut copy = self.clone();
        copy.pdf_bytes = None;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineState;
    use crate::core::identifiers::ProtocolId;

    fn sample() -> PipelineState {
        PipelineState::new(
            ProtocolId::from_raw(1).expect("non-zero"),
            "local://protocols/1.pdf".to_owned(),
            "Sample Protocol".to_owned(),
        )
    }

    #[test]
    fn new_state_does_not_halt() {
        assert!(!sample().should_halt());
    }

    #[test]
    fn fail_marks_state_as_halted() {
        let mut state = sample();
        state.fail("pdf_too_large");
        assert!(state.should_halt());
        assert_eq!(state.error.as_deref(), Some("pdf_too_large"));
    }

    #[test]
    fn checkpoint_strips_pdf_bytes() {
        let mut state = sample();
        state.pdf_bytes = Some(vec![1, 2, 3]);
        let checkpoint = state.for_checkpoint();
        assert!(checkpoint.pdf_bytes.is_none());
        assert!(state.pdf_bytes.is_some());
    }
}
