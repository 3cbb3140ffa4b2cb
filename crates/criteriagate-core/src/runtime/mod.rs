// crates/criteriagate-core/src/runtime/mod.rs
// ============================================================================
// Module: CriteriaGate Runtime Helpers
// Description: Pure evaluation helpers shared by the structure node and any
//              downstream consumer of a criterion's expression tree.
// Purpose: Keep comparator evaluation out of the pipeline crate so it can be
//          unit tested without pulling in async/storage dependencies.
// Dependencies: crate::runtime::comparator
// ============================================================================

pub mod comparator;

pub use comparator::ObservedValue;
pub use comparator::evaluate;
