// crates/criteriagate-contract/src/lib.rs
// ============================================================================
// Module: CriteriaGate Contract Library
// Description: Canonical JSON Schema definitions for the pipeline's
//              structured LLM and terminology outputs.
// Purpose: Give every node that issues a structured-output call one shared,
//          versioned source of truth for the shape it demands back.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! The pipeline's extract, ground, structure, and ordinal-resolve nodes each
//! call a [`criteriagate_core::StructuredLlm`] with a JSON Schema describing
//! the shape the model must answer in. This crate is the single place those
//! schemas are built, so a change to one of the shared structured-output
//! contracts cannot drift between the node that requests it and the tests
//! that assert against it.
//!
//! [`criteriagate_core::StructuredLlm`]: https://docs.rs/criteriagate-core

pub mod schemas;

pub use schemas::extraction_result_schema;
pub use schemas::grounding_decision_schema;
pub use schemas::ordinal_resolution_schema;
pub use schemas::structure_proposal_schema;
