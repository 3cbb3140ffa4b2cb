// criteriagate-logic/tests/support/mocks.rs
// ============================================================================
// Module: Mock Predicates
// Description: Shared predicate leaf type for requirement tree tests.
// ============================================================================
//! ## Overview
//! A domain-agnostic leaf predicate used to build and inspect requirement
//! trees in integration tests. It carries no evaluation behavior; tests
//! assert tree shape, not runtime truth.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use serde::Deserialize;
use serde::Serialize;

/// Domain-agnostic leaf predicate for exercising the requirement tree shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MockPredicate {
    /// Placeholder for a predicate that would always pass.
    AlwaysTrue,

    /// Placeholder for a predicate that would always fail.
    AlwaysFalse,

    /// Placeholder for a greater-than-or-equal comparison.
    ValueGte(i32),

    /// Placeholder for a less-than-or-equal comparison.
    ValueLte(i32),

    /// Placeholder for an equality comparison.
    ValueEq(i32),

    /// Placeholder for an all-of-flags comparison.
    HasAllFlags(u64),

    /// Placeholder for any-of-flags comparison.
    HasAnyFlags(u64),

    /// Placeholder for none-of-flags comparison.
    HasNoneFlags(u64),
}

/// Returns every [`MockPredicate`] variant, for coverage checks.
#[must_use]
pub fn all_variants() -> Vec<MockPredicate> {
    vec![
        MockPredicate::AlwaysTrue,
        MockPredicate::AlwaysFalse,
        MockPredicate::ValueGte(100),
        MockPredicate::ValueLte(-50),
        MockPredicate::ValueEq(0),
        MockPredicate::HasAllFlags(0xDEAD_BEEF),
        MockPredicate::HasAnyFlags(0b10101),
        MockPredicate::HasNoneFlags(0xFF00),
    ]
}
