// crates/criteriagate-providers/src/lib.rs
// ============================================================================
// Module: CriteriaGate Providers
// Description: Capability implementations for blob storage, structured LLM
//              calls, and terminology lookup, plus the terminology router.
// Purpose: Give the pipeline concrete adapters for every external system it
//          talks to, behind the traits declared in `criteriagate-core`.
// Dependencies: criteriagate-core, reqwest, jsonschema, serde_yaml, tokio
// ============================================================================

//! ## Overview
//! This crate ships the HTTP-backed [`BlobStore`], [`StructuredLlm`], and
//! [`TerminologyProvider`] implementations the pipeline wires together at
//! startup, plus the YAML-configured [`TerminologyRouter`] that fans a
//! single entity lookup out across a vocabulary's ordered provider list.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod blob;
pub mod llm;
pub mod router;
pub mod vocabulary;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use blob::GcsBlobStore;
pub use blob::LocalBlobStore;
pub use blob::ObjectStoreConfig;
pub use criteriagate_core::BlobStore;
pub use criteriagate_core::StructuredLlm;
pub use criteriagate_core::TerminologyProvider;
pub use llm::HttpStructuredLlm;
pub use llm::LlmClientConfig;
pub use router::RouteEntry;
pub use router::RoutedCandidate;
pub use router::RoutingTable;
pub use router::TerminologyRouter;
pub use vocabulary::HttpVocabularyProvider;
pub use vocabulary::VocabularyConfig;
