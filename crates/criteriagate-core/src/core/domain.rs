// crates/criteriagate-core/src/core/domain.rs
// ============================================================================
// Module: CriteriaGate Domain Model
// Description: Aggregate types for the protocol ingestion and criteria
//              extraction pipeline: Protocol, CriteriaBatch, Criteria,
//              Entity, AtomicCriterion, CompositeCriterion, and the
//              append-only Review/AuditLog history.
// Purpose: Give every crate a single, shared vocabulary for the domain so
//          storage, pipeline, and contract layers never invent parallel types.
// Dependencies: serde, bigdecimal, criteriagate_logic
// ============================================================================

//! ## Overview
//! Ownership runs `Protocol ⊃ CriteriaBatch ⊃ Criteria ⊃ {Entity,
//! AtomicCriterion, CompositeCriterion}`. `CriterionRelationship` edges are
//! scoped to a single `Criteria` row; cross-criterion edges are rejected at
//! the store boundary, not here — this module only carries the shapes.

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AtomId;
use crate::core::identifiers::BatchId;
use crate::core::identifiers::CompositeId;
use crate::core::identifiers::CriterionId;
use crate::core::identifiers::EntityId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::ProtocolId;
use crate::core::time::Timestamp;

/// Lifecycle status of a `Protocol`, transitioned exclusively by the persist
/// node and the retry/archive commands described in [`ProtocolStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolStatus {
    /// File has been uploaded and confirmed but extraction has not started.
    Uploaded,
    /// Extract node is running.
    Extracting,
    /// Extract node failed fatally (zero criteria or unrecoverable LLM error).
    ExtractionFailed,
    /// Ground node is running.
    Grounding,
    /// Every entity failed grounding.
    GroundingFailed,
    /// At least one entity grounded; awaiting reviewer action.
    PendingReview,
    /// Reviewer approved the batch.
    Complete,
    /// Archived after dead-letter or failure TTL expiry.
    Archived,
}

impl ProtocolStatus {
    /// Reports whether a transition from `self` to `target` is part of the
    /// protocol status state machine.
    ///
    /// # Invariants
    /// - Mirrors the state diagram: `uploaded -> extracting -> {extraction_failed,
    ///   grounding} -> {grounding_failed, pending_review} -> complete`, with
    ///   `extraction_failed`/`grounding_failed` retryable back to `extracting`,
    ///   and `extraction_failed`/`grounding_failed`/dead-letter archivable.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Uploaded, Self::Extracting)
                | (Self::Extracting, Self::ExtractionFailed)
                | (Self::Extracting, Self::Grounding)
                | (Self::Grounding, Self::GroundingFailed)
                | (Self::Grounding, Self::PendingReview)
                | (Self::PendingReview, Self::Complete)
                | (Self::ExtractionFailed, Self::Extracting)
                | (Self::GroundingFailed, Self::Extracting)
                | (Self::ExtractionFailed, Self::Archived)
                | (Self::GroundingFailed, Self::Archived)
        )
    }
}

impl std::fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Uploaded => "uploaded",
            Self::Extracting => "extracting",
            Self::ExtractionFailed => "extraction_failed",
            Self::Grounding => "grounding",
            Self::GroundingFailed => "grounding_failed",
            Self::PendingReview => "pending_review",
            Self::Complete => "complete",
            Self::Archived => "archived",
        })
    }
}

/// A clinical trial protocol document, the aggregate root of the pipeline.
///
/// # Invariants
/// - Never deleted; mutated only through the persist node or a retry command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protocol {
    /// Opaque identifier.
    pub id: ProtocolId,
    /// Human-readable title, set at upload time or from extraction.
    pub title: String,
    /// Source document location (`gs://` or `local://`).
    pub file_uri: String,
    /// Current lifecycle status.
    pub status: ProtocolStatus,
    /// Page count, populated once the PDF has been parsed.
    pub page_count: Option<u32>,
    /// Heuristic extraction quality score in `[0, 1]`.
    pub quality_score: Option<f64>,
    /// Human-readable reason the protocol entered a failed status.
    pub error_reason: Option<String>,
    /// Open JSON bag for node-specific bookkeeping (e.g. accumulated errors).
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Timestamp of the most recent status transition.
    pub updated_at: Timestamp,
}

/// Reviewer disposition of a `CriteriaBatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Awaiting reviewer action.
    PendingReview,
    /// Reviewer approved the batch.
    Approved,
    /// Reviewer rejected the batch.
    Rejected,
}

/// One extraction attempt's worth of criteria for a protocol.
///
/// # Invariants
/// - Re-extraction inserts a new batch and archives every prior
///   non-archived batch of the same protocol in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaBatch {
    /// Opaque identifier.
    pub id: BatchId,
    /// Owning protocol.
    pub protocol_id: ProtocolId,
    /// Reviewer disposition.
    pub status: BatchStatus,
    /// Identifier of the extraction model that produced this batch.
    pub extraction_model: String,
    /// Whether a later re-extraction has superseded this batch.
    pub is_archived: bool,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

/// Whether a criterion admits or excludes a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaType {
    /// Subject must satisfy this criterion to be eligible.
    Inclusion,
    /// Subject satisfying this criterion is ineligible.
    Exclusion,
}

/// Clinical assertion polarity for a criterion, following standard NLP
/// assertion-classification categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssertionStatus {
    /// Asserted as currently true.
    Present,
    /// Asserted as currently false or explicitly excluded.
    Absent,
    /// Conditional on an unconfirmed premise ("if diagnosed with...").
    Hypothetical,
    /// Refers to the subject's past, not current, state.
    Historical,
    /// Contingent on another criterion or external event.
    Conditional,
}

/// Reviewer disposition of an individual criterion row, independent of the
/// batch-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Not yet reviewed.
    Pending,
    /// Reviewer confirmed the extracted/grounded content.
    Confirmed,
    /// Reviewer flagged the content as incorrect.
    Flagged,
}

/// One eligibility criterion extracted from a protocol, belonging to exactly
/// one `CriteriaBatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criteria {
    /// Opaque identifier.
    pub id: CriterionId,
    /// Owning batch.
    pub batch_id: BatchId,
    /// Inclusion or exclusion.
    pub criteria_type: CriteriaType,
    /// Free-text category (e.g. "Laboratory", "Prior Therapy").
    pub category: Option<String>,
    /// Verbatim or near-verbatim criterion text.
    pub text: String,
    /// Structured expression tree snapshot, written by the structure node.
    pub structured_criterion: Option<serde_json::Value>,
    /// Field mappings produced by grounding, read back onto this row by the
    /// persist node.
    pub conditions: Option<serde_json::Value>,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    /// Clinical assertion polarity.
    pub assertion_status: AssertionStatus,
    /// Section of the source document this criterion was extracted from.
    pub source_section: Option<String>,
    /// Page number in the source document.
    pub page_number: Option<u32>,
    /// Reviewer disposition, if reviewed.
    pub review_status: Option<ReviewStatus>,
}

/// Kind of clinical concept an `Entity` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A diagnosis or condition.
    Condition,
    /// A drug or therapeutic agent.
    Medication,
    /// A clinical or surgical procedure.
    Procedure,
    /// A laboratory measurement.
    LabValue,
    /// A demographic attribute (age, sex, ...). Never carries terminology codes.
    Demographic,
    /// A biomarker measurement.
    Biomarker,
    /// A phenotypic trait.
    Phenotype,
}

/// How an entity's terminology binding was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingMethod {
    /// Exact string match against a terminology provider.
    Exact,
    /// Synonym or word-level fuzzy match.
    WordSynonym,
    /// Resolved through the agentic retry loop.
    Agentic,
    /// No automatic match reached confidence threshold; flagged for a human.
    ExpertReview,
}

/// Terminology code bindings resolved for an `Entity`. Any subset may be
/// populated; `Demographic` entities never carry a code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeBindings {
    /// UMLS Concept Unique Identifier.
    pub umls_cui: Option<String>,
    /// SNOMED CT code.
    pub snomed_code: Option<String>,
    /// RxNorm code.
    pub rxnorm_code: Option<String>,
    /// LOINC code.
    pub loinc_code: Option<String>,
    /// ICD-10 code.
    pub icd10_code: Option<String>,
    /// HPO code.
    pub hpo_code: Option<String>,
}

impl CodeBindings {
    /// Reports whether any code field is populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.umls_cui.is_none()
            && self.snomed_code.is_none()
            && self.rxnorm_code.is_none()
            && self.loinc_code.is_none()
            && self.icd10_code.is_none()
            && self.hpo_code.is_none()
    }
}

/// A clinical concept mention extracted from a criterion's text.
///
/// # Invariants
/// - At least one of `text` or a populated [`CodeBindings`] field must be present.
/// - `Demographic` entities never carry terminology codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque identifier.
    pub id: EntityId,
    /// Owning criterion.
    pub criteria_id: CriterionId,
    /// Concept kind.
    pub entity_type: EntityType,
    /// Mention text as it appears in the criterion.
    pub text: String,
    /// Start offset of the mention within `Criteria::text`.
    pub span_start: Option<u32>,
    /// End offset (exclusive) of the mention within `Criteria::text`.
    pub span_end: Option<u32>,
    /// Resolved terminology codes.
    pub codes: CodeBindings,
    /// Grounding confidence in `[0, 1]`.
    pub grounding_confidence: f64,
    /// How the grounding was obtained.
    pub grounding_method: GroundingMethod,
    /// Surrounding text used as grounding context.
    pub context_window: Option<String>,
}

impl Entity {
    /// Reports whether this entity type is exempt from terminology grounding.
    #[must_use]
    pub const fn skip_grounding(&self) -> bool {
        matches!(self.entity_type, EntityType::Demographic)
    }
}

/// Comparator applied by an `AtomicCriterion` to its bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationOperator {
    /// Equal to.
    Eq,
    /// Not equal to.
    Ne,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal to.
    Ge,
    /// Strictly less than.
    Lt,
    /// Less than or equal to.
    Le,
    /// Value falls within an inclusive range (paired with a second bound atom).
    Within,
    /// Event did not occur within a trailing duration.
    NotInLastDuration,
    /// Text contains a substring or token.
    Contains,
    /// Text does not contain a substring or token.
    NotContains,
}

/// A leaf node in a criterion's expression tree: a single comparison against
/// a grounded entity concept.
///
/// # Invariants
/// - Range comparisons are modeled as two atoms (lower and upper bound)
///   joined by an `AND` composite, never as a single atom.
/// - Temporal atoms carry both `duration` and `unit_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicCriterion {
    /// Opaque identifier.
    pub id: AtomId,
    /// Owning criterion.
    pub criterion_id: CriterionId,
    /// Owning protocol, denormalized for fast cross-criterion queries.
    pub protocol_id: ProtocolId,
    /// Inclusion or exclusion, inherited from the owning criterion.
    pub inclusion_exclusion: CriteriaType,
    /// Domain of the bound entity concept (e.g. "Condition").
    pub entity_domain: Option<String>,
    /// Terminology concept id the atom is bound to.
    pub entity_concept_id: Option<String>,
    /// Terminology system the concept id belongs to.
    pub entity_concept_system: Option<String>,
    /// Comparator applied to the bound value.
    pub relation_operator: RelationOperator,
    /// Numeric comparand, when the comparator is numeric.
    pub value_numeric: Option<BigDecimal>,
    /// Textual comparand, when the comparator is textual.
    pub value_text: Option<String>,
    /// Unit of `value_numeric`, free text.
    pub unit_text: Option<String>,
    /// Canonical unit concept id, set directly or by the ordinal-resolve node.
    pub unit_concept_id: Option<String>,
    /// Whether the comparison is negated.
    pub negation: bool,
}

/// Boolean combinator applied to child nodes of a criterion's expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOperator {
    /// All children must hold.
    And,
    /// At least one child must hold.
    Or,
    /// Exactly one child, negated.
    Not,
}

/// An interior node in a criterion's expression tree, combining child atoms
/// or composites under a boolean operator.
///
/// # Invariants
/// - `Not` has exactly one child; `And`/`Or` have at least two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeCriterion {
    /// Opaque identifier.
    pub id: CompositeId,
    /// Owning criterion.
    pub criterion_id: CriterionId,
    /// Owning protocol, denormalized for fast cross-criterion queries.
    pub protocol_id: ProtocolId,
    /// Combinator applied to children.
    pub logic_operator: LogicOperator,
}

/// A parent-to-child edge within a single criterion's expression tree.
///
/// # Invariants
/// - `parent` and `child` must reference nodes belonging to the same
///   `CriterionId`; cross-criterion edges are rejected at the store boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CriterionRelationship {
    /// Owning criterion, shared by both endpoints.
    pub criterion_id: CriterionId,
    /// Parent node (always a composite, since atoms are leaves).
    pub parent: CompositeId,
    /// Child node.
    pub child: NodeId,
    /// Position of `child` among its siblings under `parent`.
    pub child_sequence: u32,
}

/// An append-only record of a human reviewer action on a criterion or batch.
///
/// # Invariants
/// - Immutable once written; corrections are new rows, not updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Opaque identifier.
    pub id: crate::core::identifiers::ReviewId,
    /// Criterion this review applies to.
    pub criteria_id: CriterionId,
    /// State of the row before the action, as a JSON snapshot.
    pub before: serde_json::Value,
    /// State of the row after the action, as a JSON snapshot.
    pub after: serde_json::Value,
    /// Reviewer identity, opaque to the pipeline.
    pub reviewer: String,
    /// When the review was recorded.
    pub created_at: Timestamp,
}

/// An append-only record of a system-driven state change, used for
/// reviewer-facing audit trails (e.g. ordinal-resolve proposals).
///
/// # Invariants
/// - Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    /// Opaque identifier.
    pub id: crate::core::identifiers::AuditLogId,
    /// Protocol this entry concerns.
    pub protocol_id: ProtocolId,
    /// Short machine-readable action label (e.g. "ordinal_resolve_proposal").
    pub action: String,
    /// Arbitrary JSON detail describing the change.
    pub detail: serde_json::Value,
    /// When the entry was recorded.
    pub created_at: Timestamp,
}
