// crates/criteriagate-core/src/runtime/comparator.rs
// ============================================================================
// Module: CriteriaGate Comparator
// Description: Evaluates an `AtomicCriterion`'s `relation_operator` against
//              an observed value, using tri-state logic.
// Purpose: Give the structure and downstream consumers a single, precise
//          numeric/text/temporal comparator instead of ad-hoc float math.
// Dependencies: bigdecimal, time, criteriagate_logic::TriState
// ============================================================================

//! ## Overview
//! Comparison is fail-closed: a missing observed value, a type mismatch
//! between the atom's expected kind and the observed value, or an
//! unparseable operand all yield [`TriState::Unknown`] rather than `False`.
//! Numeric comparisons use [`BigDecimal`] so lab-value thresholds never lose
//! precision to binary floating point.

use bigdecimal::BigDecimal;
use criteriagate_logic::TriState;
use time::Duration;

use crate::core::domain::RelationOperator;

/// A single observed value to compare against an atom, supplied by the
/// caller (the structure/ground node never inspects raw patient data
/// itself; this module is exercised only by system tests and future
/// cohort-matching callers).
#[derive(Debug, Clone)]
pub enum ObservedValue {
    /// A numeric measurement, optionally unit-tagged.
    Numeric(BigDecimal),
    /// A free-text value.
    Text(String),
    /// An elapsed duration since an event.
    Elapsed(Duration),
}

/// Evaluates `operator` with bound operand `bound` against `observed`.
///
/// # Invariants
/// - Returns [`TriState::Unknown`] whenever `observed`'s variant does not
///   match what `operator` requires, rather than guessing a coercion.
#[must_use]
pub fn evaluate(
    operator: RelationOperator,
    bound_numeric: Option<&BigDecimal>,
    bound_text: Option<&str>,
    bound_duration: Option<Duration>,
    observed: &ObservedValue,
) -> TriState {
    match operator {
        RelationOperator::Eq
        | RelationOperator::Ne
        | RelationOperator::Gt
        | RelationOperator::Ge
        | RelationOperator::Lt
        | RelationOperator::Le
        | RelationOperator::Within => evaluate_numeric(operator, bound_numeric, observed),
        RelationOperator::Contains | RelationOperator::NotContains => {
            evaluate_text(operator, bound_text, observed)
        }
        RelationOperator::NotInLastDuration => evaluate_duration(bound_duration, observed),
    }
}

/// Numeric comparators. `Within` is handled by the caller pairing two atoms
/// under an `AND`; here it degenerates to a single-bound `Ge` check, which
/// is only correct when combined with its sibling atom's `Le` check.
fn evaluate_numeric(
    operator: RelationOperator,
    bound: Option<&BigDecimal>,
    observed: &ObservedValue,
) -> TriState {
    let (Some(bound), ObservedValue::Numeric(value)) = (bound, observed) else {
        return TriState::Unknown;
    };
    let result = match operator {
        RelationOperator::Eq => value == bound,
        RelationOperator::Ne => value != bound,
        RelationOperator::Gt => value > bound,
        RelationOperator::Ge | RelationOperator::Within => value >= bound,
        RelationOperator::Lt => value < bound,
        RelationOperator::Le => value <= bound,
        RelationOperator::Contains
        | RelationOperator::NotContains
        | RelationOperator::NotInLastDuration => return TriState::Unknown,
    };
    TriState::from(result)
}

/// Text comparators.
fn evaluate_text(
    operator: RelationOperator,
    bound: Option<&str>,
    observed: &ObservedValue,
) -> TriState {
    let (Some(bound), ObservedValue::Text(value)) = (bound, observed) else {
        return TriState::Unknown;
    };
    let contains = value.to_lowercase().contains(&bound.to_lowercase());
    match operator {
        RelationOperator::Contains => TriState::from(contains),
        RelationOperator::NotContains => TriState::from(!contains),
        _ => TriState::Unknown,
    }
}

/// Temporal comparator: "has not occurred within the last `bound`".
fn evaluate_duration(bound: Option<Duration>, observed: &ObservedValue) -> TriState {
    let (Some(bound), ObservedValue::Elapsed(elapsed)) = (bound, observed) else {
        return TriState::Unknown;
    };
    TriState::from(*elapsed > bound)
}
