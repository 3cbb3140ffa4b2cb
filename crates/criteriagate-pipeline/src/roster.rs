// crates/criteriagate-pipeline/src/roster.rs
// ============================================================================
// Module: CriteriaGate Pipeline LLM Roster
// Description: The four structured-LLM roles the pipeline calls.
// Purpose: Let each node ask for the model tuned to its task without the
//          runtime hard-coding a single `StructuredLlm` for every call site.
// Dependencies: criteriagate-core
// ============================================================================

//! ## Overview
//! Extraction is multimodal (it reads the protocol PDF); grounding decision,
//! logic structuring, and ordinal-scale detection are text-only reasoning
//! calls over JSON candidates. A deployment may point all four at the same
//! model or split them across providers tuned for cost versus accuracy; the
//! roster exists so that choice is made once, at startup, not per node.

use std::sync::Arc;

use criteriagate_core::StructuredLlm;

/// The four structured-LLM endpoints the pipeline's nodes call.
#[derive(Clone)]
pub struct LlmRoster {
    /// Multimodal PDF-to-`ExtractionResult` call used by the extract node.
    pub extraction: Arc<dyn StructuredLlm>,
    /// Candidate-selection reasoning call used by the ground node.
    pub grounding_decision: Arc<dyn StructuredLlm>,
    /// Criterion-to-AND/OR/NOT-tree call used by the structure node.
    pub structuring: Arc<dyn StructuredLlm>,
    /// Missing-unit ordinal-scale detection call used by the
    /// ordinal_resolve node.
    pub ordinal_detection: Arc<dyn StructuredLlm>,
}

impl LlmRoster {
    /// Builds a roster from four endpoints, one per role.
    #[must_use]
    pub fn new(
        extraction: Arc<dyn StructuredLlm>,
        grounding_decision: Arc<dyn StructuredLlm>,
        structuring: Arc<dyn StructuredLlm>,
        ordinal_detection: Arc<dyn StructuredLlm>,
    ) -> Self {
        Self { extraction, grounding_decision, structuring, ordinal_detection }
    }

    /// Builds a roster pointing every role at the same endpoint.
    #[must_use]
    pub fn uniform(llm: Arc<dyn StructuredLlm>) -> Self {
        Self {
            extraction: llm.clone(),
            grounding_decision: llm.clone(),
            structuring: llm.clone(),
            ordinal_detection: llm,
        }
    }
}
