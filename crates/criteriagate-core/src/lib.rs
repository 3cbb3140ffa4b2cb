// crates/criteriagate-core/src/lib.rs
// ============================================================================
// Module: CriteriaGate Core Library
// Description: Public API surface for the CriteriaGate core.
// Purpose: Expose the domain model, capability interfaces, and pure
//          evaluation helpers shared by every other crate in the workspace.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! CriteriaGate core provides the protocol/criteria/entity domain model,
//! the `PipelineState` checkpoint shape, and the backend-agnostic
//! capability interfaces (`BlobStore`, `StructuredLlm`, `TerminologyProvider`,
//! `EventHandler`) the pipeline runtime depends on. It is backend-agnostic
//! and integrates through explicit traits rather than embedding into a
//! particular storage engine or LLM provider.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::BlobStore;
pub use interfaces::Candidate;
pub use interfaces::ClassifiedError;
pub use interfaces::EventHandler;
pub use interfaces::LlmMessage;
pub use interfaces::PermanentError;
pub use interfaces::StructuredLlm;
pub use interfaces::TerminologyProvider;
pub use interfaces::TransientError;
