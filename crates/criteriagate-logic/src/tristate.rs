// crates/criteriagate-logic/src/tristate.rs
// ============================================================================
// Module: Tri-State Logic
// Description: Tri-state truth value for evidence-aware comparisons.
// Purpose: Give comparators a fail-closed result for missing or ambiguous evidence.
// Dependencies: serde::{Deserialize, Serialize}
// ============================================================================

//! ## Overview
//! Defines the tri-state truth value (`true/false/unknown`) that relation
//! comparators return when evidence is absent or cannot be compared.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Tri-State Value
// ============================================================================

/// Tri-state truth value for evidence-aware evaluation
///
/// # Invariants
/// - Represents a closed set of truth values: true, false, or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriState {
    /// Definitively true
    True,
    /// Definitively false
    False,
    /// Indeterminate due to missing or insufficient evidence
    Unknown,
}

impl TriState {
    /// Returns true if the value is `True`
    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    /// Returns true if the value is `False`
    #[must_use]
    pub const fn is_false(self) -> bool {
        matches!(self, Self::False)
    }

    /// Returns true if the value is `Unknown`
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}
