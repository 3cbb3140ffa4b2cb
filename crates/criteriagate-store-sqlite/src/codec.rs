// crates/criteriagate-store-sqlite/src/codec.rs
// ============================================================================
// Module: CriteriaGate SQLite Row Codecs
// Description: Explicit TEXT <-> enum mappings for every domain enum stored
//              as a column, plus BigDecimal <-> TEXT helpers.
// Purpose: Keep column encodings stable and reviewable independent of serde's
//          derive output, and fail closed on an unrecognized stored value.
// Dependencies: criteriagate_core, bigdecimal, rusqlite
// ============================================================================

use bigdecimal::BigDecimal;
use criteriagate_core::AssertionStatus;
use criteriagate_core::BatchStatus;
use criteriagate_core::CriteriaType;
use criteriagate_core::EntityType;
use criteriagate_core::GroundingMethod;
use criteriagate_core::LogicOperator;
use criteriagate_core::ProtocolStatus;
use criteriagate_core::RelationOperator;
use criteriagate_core::ReviewStatus;

use crate::error::StoreError;

/// Converts a stored column value back to a typed enum, or raises
/// [`StoreError::Invalid`] for a value this build does not recognize.
fn unrecognized(column: &'static str, value: &str) -> StoreError {
    StoreError::Invalid(format!("unrecognized {column} value '{value}'"))
}

/// Encodes [`ProtocolStatus`] as its stored text.
#[must_use]
pub const fn protocol_status_to_text(status: ProtocolStatus) -> &'static str {
    match status {
        ProtocolStatus::Uploaded => "uploaded",
        ProtocolStatus::Extracting => "extracting",
        ProtocolStatus::ExtractionFailed => "extraction_failed",
        ProtocolStatus::Grounding => "grounding",
        ProtocolStatus::GroundingFailed => "grounding_failed",
        ProtocolStatus::PendingReview => "pending_review",
        ProtocolStatus::Complete => "complete",
        ProtocolStatus::Archived => "archived",
    }
}

/// Decodes a stored [`ProtocolStatus`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_protocol_status(value: &str) -> Result<ProtocolStatus, StoreError> {
    match value {
        "uploaded" => Ok(ProtocolStatus::Uploaded),
        "extracting" => Ok(ProtocolStatus::Extracting),
        "extraction_failed" => Ok(ProtocolStatus::ExtractionFailed),
        "grounding" => Ok(ProtocolStatus::Grounding),
        "grounding_failed" => Ok(ProtocolStatus::GroundingFailed),
        "pending_review" => Ok(ProtocolStatus::PendingReview),
        "complete" => Ok(ProtocolStatus::Complete),
        "archived" => Ok(ProtocolStatus::Archived),
        other => Err(unrecognized("protocol.status", other)),
    }
}

/// Encodes [`BatchStatus`] as its stored text.
#[must_use]
pub const fn batch_status_to_text(status: BatchStatus) -> &'static str {
    match status {
        BatchStatus::PendingReview => "pending_review",
        BatchStatus::Approved => "approved",
        BatchStatus::Rejected => "rejected",
    }
}

/// Decodes a stored [`BatchStatus`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_batch_status(value: &str) -> Result<BatchStatus, StoreError> {
    match value {
        "pending_review" => Ok(BatchStatus::PendingReview),
        "approved" => Ok(BatchStatus::Approved),
        "rejected" => Ok(BatchStatus::Rejected),
        other => Err(unrecognized("criteria_batches.status", other)),
    }
}

/// Encodes [`CriteriaType`] as its stored text.
#[must_use]
pub const fn criteria_type_to_text(value: CriteriaType) -> &'static str {
    match value {
        CriteriaType::Inclusion => "inclusion",
        CriteriaType::Exclusion => "exclusion",
    }
}

/// Decodes a stored [`CriteriaType`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_criteria_type(value: &str) -> Result<CriteriaType, StoreError> {
    match value {
        "inclusion" => Ok(CriteriaType::Inclusion),
        "exclusion" => Ok(CriteriaType::Exclusion),
        other => Err(unrecognized("criteria.criteria_type", other)),
    }
}

/// Encodes [`AssertionStatus`] as its stored text.
#[must_use]
pub const fn assertion_status_to_text(value: AssertionStatus) -> &'static str {
    match value {
        AssertionStatus::Present => "PRESENT",
        AssertionStatus::Absent => "ABSENT",
        AssertionStatus::Hypothetical => "HYPOTHETICAL",
        AssertionStatus::Historical => "HISTORICAL",
        AssertionStatus::Conditional => "CONDITIONAL",
    }
}

/// Decodes a stored [`AssertionStatus`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_assertion_status(value: &str) -> Result<AssertionStatus, StoreError> {
    match value {
        "PRESENT" => Ok(AssertionStatus::Present),
        "ABSENT" => Ok(AssertionStatus::Absent),
        "HYPOTHETICAL" => Ok(AssertionStatus::Hypothetical),
        "HISTORICAL" => Ok(AssertionStatus::Historical),
        "CONDITIONAL" => Ok(AssertionStatus::Conditional),
        other => Err(unrecognized("criteria.assertion_status", other)),
    }
}

/// Encodes [`ReviewStatus`] as its stored text.
#[must_use]
pub const fn review_status_to_text(value: ReviewStatus) -> &'static str {
    match value {
        ReviewStatus::Pending => "pending",
        ReviewStatus::Confirmed => "confirmed",
        ReviewStatus::Flagged => "flagged",
    }
}

/// Decodes a stored [`ReviewStatus`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_review_status(value: &str) -> Result<ReviewStatus, StoreError> {
    match value {
        "pending" => Ok(ReviewStatus::Pending),
        "confirmed" => Ok(ReviewStatus::Confirmed),
        "flagged" => Ok(ReviewStatus::Flagged),
        other => Err(unrecognized("criteria.review_status", other)),
    }
}

/// Encodes [`EntityType`] as its stored text.
#[must_use]
pub const fn entity_type_to_text(value: EntityType) -> &'static str {
    match value {
        EntityType::Condition => "condition",
        EntityType::Medication => "medication",
        EntityType::Procedure => "procedure",
        EntityType::LabValue => "lab_value",
        EntityType::Demographic => "demographic",
        EntityType::Biomarker => "biomarker",
        EntityType::Phenotype => "phenotype",
    }
}

/// Decodes a stored [`EntityType`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_entity_type(value: &str) -> Result<EntityType, StoreError> {
    match value {
        "condition" => Ok(EntityType::Condition),
        "medication" => Ok(EntityType::Medication),
        "procedure" => Ok(EntityType::Procedure),
        "lab_value" => Ok(EntityType::LabValue),
        "demographic" => Ok(EntityType::Demographic),
        "biomarker" => Ok(EntityType::Biomarker),
        "phenotype" => Ok(EntityType::Phenotype),
        other => Err(unrecognized("entities.entity_type", other)),
    }
}

/// Encodes [`GroundingMethod`] as its stored text.
#[must_use]
pub const fn grounding_method_to_text(value: GroundingMethod) -> &'static str {
    match value {
        GroundingMethod::Exact => "exact",
        GroundingMethod::WordSynonym => "word_synonym",
        GroundingMethod::Agentic => "agentic",
        GroundingMethod::ExpertReview => "expert_review",
    }
}

/// Decodes a stored [`GroundingMethod`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_grounding_method(value: &str) -> Result<GroundingMethod, StoreError> {
    match value {
        "exact" => Ok(GroundingMethod::Exact),
        "word_synonym" => Ok(GroundingMethod::WordSynonym),
        "agentic" => Ok(GroundingMethod::Agentic),
        "expert_review" => Ok(GroundingMethod::ExpertReview),
        other => Err(unrecognized("entities.grounding_method", other)),
    }
}

/// Encodes [`RelationOperator`] as its stored text.
#[must_use]
pub const fn relation_operator_to_text(value: RelationOperator) -> &'static str {
    match value {
        RelationOperator::Eq => "eq",
        RelationOperator::Ne => "ne",
        RelationOperator::Gt => "gt",
        RelationOperator::Ge => "ge",
        RelationOperator::Lt => "lt",
        RelationOperator::Le => "le",
        RelationOperator::Within => "within",
        RelationOperator::NotInLastDuration => "not_in_last_duration",
        RelationOperator::Contains => "contains",
        RelationOperator::NotContains => "not_contains",
    }
}

/// Decodes a stored [`RelationOperator`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_relation_operator(value: &str) -> Result<RelationOperator, StoreError> {
    match value {
        "eq" => Ok(RelationOperator::Eq),
        "ne" => Ok(RelationOperator::Ne),
        "gt" => Ok(RelationOperator::Gt),
        "ge" => Ok(RelationOperator::Ge),
        "lt" => Ok(RelationOperator::Lt),
        "le" => Ok(RelationOperator::Le),
        "within" => Ok(RelationOperator::Within),
        "not_in_last_duration" => Ok(RelationOperator::NotInLastDuration),
        "contains" => Ok(RelationOperator::Contains),
        "not_contains" => Ok(RelationOperator::NotContains),
        other => Err(unrecognized("atomic_criteria.relation_operator", other)),
    }
}

/// Encodes [`LogicOperator`] as its stored text.
#[must_use]
pub const fn logic_operator_to_text(value: LogicOperator) -> &'static str {
    match value {
        LogicOperator::And => "and",
        LogicOperator::Or => "or",
        LogicOperator::Not => "not",
    }
}

/// Decodes a stored [`LogicOperator`] text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for an unrecognized value.
pub fn text_to_logic_operator(value: &str) -> Result<LogicOperator, StoreError> {
    match value {
        "and" => Ok(LogicOperator::And),
        "or" => Ok(LogicOperator::Or),
        "not" => Ok(LogicOperator::Not),
        other => Err(unrecognized("composite_criteria.logic_operator", other)),
    }
}

/// Encodes a [`BigDecimal`] as its stored text, preserving precision exactly.
#[must_use]
pub fn decimal_to_text(value: &BigDecimal) -> String {
    value.to_string()
}

/// Decodes a stored `BigDecimal` text value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] when the text is not a valid decimal.
pub fn text_to_decimal(value: &str) -> Result<BigDecimal, StoreError> {
    value
        .parse::<BigDecimal>()
        .map_err(|err| StoreError::Invalid(format!("invalid decimal '{value}': {err}")))
}
