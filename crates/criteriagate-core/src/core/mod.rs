// crates/criteriagate-core/src/core/mod.rs
// ============================================================================
// Module: CriteriaGate Core Types
// Description: Wires together identifiers, time, hashing, the domain model,
//              and pipeline state.
// Purpose: Single module root for every backend-agnostic core type.
// Dependencies: crate::core::{domain, hashing, identifiers, pipeline_state, time}
// ============================================================================

//! ## Overview
//! Everything under `core` is pure data and pure functions: no I/O, no
//! async, no knowledge of SQLite, HTTP, or any particular LLM provider.

pub mod domain;
pub mod hashing;
pub mod identifiers;
pub mod pipeline_state;
pub mod time;

pub use domain::AssertionStatus;
pub use domain::AtomicCriterion;
pub use domain::AuditLog;
pub use domain::BatchStatus;
pub use domain::CodeBindings;
pub use domain::CompositeCriterion;
pub use domain::CriteriaBatch;
pub use domain::CriteriaType;
pub use domain::Criteria;
pub use domain::CriterionRelationship;
pub use domain::Entity;
pub use domain::EntityType;
pub use domain::GroundingMethod;
pub use domain::LogicOperator;
pub use domain::Protocol;
pub use domain::ProtocolStatus;
pub use domain::RelationOperator;
pub use domain::Review;
pub use domain::ReviewStatus;
pub use hashing::HashDigest;
pub use hashing::HashingError;
pub use hashing::canonical_json_bytes;
pub use hashing::canonical_text_key;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use identifiers::AtomId;
pub use identifiers::AuditLogId;
pub use identifiers::BatchId;
pub use identifiers::CompositeId;
pub use identifiers::CriterionId;
pub use identifiers::EntityId;
pub use identifiers::NodeId;
pub use identifiers::ProtocolId;
pub use identifiers::ReviewId;
pub use identifiers::TriggerId;
pub use pipeline_state::PipelineState;
pub use time::Timestamp;
