// crates/criteriagate-pipeline/src/nodes/mod.rs
// ============================================================================
// Module: CriteriaGate Pipeline Nodes
// Description: The seven node functions the runtime sequences in order.
// Purpose: Give each pipeline stage its own file while sharing one signature
//          shape (`PipelineState -> Result<PipelineState, PipelineError>`)
//          so the runtime can call every node the same way.
// Dependencies: criteriagate-core, criteriagate-config, criteriagate-contract,
//               criteriagate-logic, criteriagate-store-sqlite
// ============================================================================

//! ## Overview
//! Every node takes the current [`criteriagate_core::PipelineState`] by
//! value and the shared [`crate::PipelineDeps`] by reference, and returns the
//! next state. A node only returns `Err` for an infrastructure failure (see
//! [`crate::error::PipelineError`]); every business-logic outcome — a fatal
//! extraction failure, a batch with zero grounded entities, a malformed
//! structure proposal — is recorded on the returned state instead, and the
//! runtime decides whether to keep going by calling `should_halt`.

pub mod extract;
pub mod ground;
pub mod ingest;
pub mod ordinal_resolve;
pub mod parse;
pub mod persist;
pub mod structure;

use criteriagate_core::Timestamp;

/// Reads the wall clock. The only place in the pipeline crate that does;
/// every node and the runtime thread a [`Timestamp`] through from here
/// rather than reading the clock themselves, so a future test harness only
/// has one call site to intercept.
pub(crate) fn now() -> Timestamp {
    Timestamp::new(time::OffsetDateTime::now_utc())
}
