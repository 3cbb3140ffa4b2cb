// crates/criteriagate-pipeline/src/nodes/parse.rs
// ============================================================================
// Module: CriteriaGate Pipeline Parse Node
// Description: Turns the extraction LLM's raw result into durable
//              `CriteriaBatch`/`Criteria` rows and an entity-lite worklist.
// Purpose: Bridge between the unstructured `ExtractionResult` JSON and the
//          store's typed domain rows; the ground node consumes only
//          `entities_json`, never the raw extraction output.
// Dependencies: criteriagate-core, criteriagate-store-sqlite
// ============================================================================

//! ## Overview
//! Criteria rows are written in one transaction alongside the batch header
//! and the announcing outbox event, archiving every prior non-archived
//! batch of the protocol (`persist_batch_with_outbox`). `Entity` rows do
//! not exist yet at this point in the run — they are inserted by the
//! persist node once grounding has produced a confidence and code binding
//! for each one. This node's job is only to decide, per criterion, what
//! needs grounding and hand the ground node a worklist.
//!
//! The extraction contract has no notion of entity spans, so entities are
//! derived by a simple rule-based pass over each criterion's text (and its
//! free-text sub-conditions, when present) rather than read back from the
//! LLM. Demographic mentions are marked `skip_grounding` so the ground node
//! never dispatches them to a terminology provider.

use criteriagate_core::AssertionStatus;
use criteriagate_core::BatchId;
use criteriagate_core::Criteria;
use criteriagate_core::CriteriaType;
use criteriagate_core::EntityType;
use criteriagate_core::PipelineState;
use criteriagate_core::ProtocolStatus;
use criteriagate_outbox::idempotency_key;
use criteriagate_store_sqlite::BatchWrite;
use serde::Deserialize;
use serde::Serialize;
use tracing::Instrument;
use tracing::info_span;

use crate::deps::PipelineDeps;
use crate::error::PipelineError;

/// Records a fatal `state.error` and transitions the protocol to
/// `extraction_failed`, the edge spec.md documents for every fatal failure
/// while a protocol is `extracting`.
async fn fail_extraction(
    state: &mut PipelineState,
    deps: &PipelineDeps,
    message: impl Into<String>,
) -> Result<(), PipelineError> {
    state.fail(message);
    let store = deps.store.clone();
    let protocol_id = state.protocol_id;
    let error_reason = state.error.clone();
    crate::blocking::store_call(move || {
        store.transition_protocol_status(protocol_id, ProtocolStatus::ExtractionFailed, error_reason.as_deref(), super::now())
    })
    .await?;
    Ok(())
}

/// Raw shape of one `ExtractionResult.criteria[]` entry, mirroring
/// [`criteriagate_contract::schemas::extraction_result_schema`]'s
/// `ExtractedCriterion` definition.
#[derive(Debug, Deserialize)]
struct ExtractedCriterion {
    text: String,
    criteria_type: CriteriaType,
    category: Option<String>,
    #[serde(default)]
    numeric_thresholds: Vec<serde_json::Value>,
    #[serde(default)]
    conditions: Vec<String>,
    assertion_status: ExtractedAssertionStatus,
    confidence: f64,
    source_section: Option<String>,
}

/// Assertion polarity as the extraction contract spells it; distinct from
/// [`AssertionStatus`]'s richer, clinically named variants.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExtractedAssertionStatus {
    Asserted,
    Negated,
    Uncertain,
}

impl From<ExtractedAssertionStatus> for AssertionStatus {
    /// Maps the extraction contract's three-way polarity onto the domain's
    /// five-way assertion status. `Uncertain` becomes `Hypothetical` rather
    /// than `Conditional`: the extraction prompt reserves "uncertain" for a
    /// premise the model itself could not confirm from the text, which is
    /// the defining trait of a hypothetical, not a criterion that is
    /// explicitly contingent on another one. See the Open Question
    /// resolution in `DESIGN.md`.
    fn from(value: ExtractedAssertionStatus) -> Self {
        match value {
            ExtractedAssertionStatus::Asserted => Self::Present,
            ExtractedAssertionStatus::Negated => Self::Absent,
            ExtractedAssertionStatus::Uncertain => Self::Hypothetical,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionResult {
    #[serde(default)]
    criteria: Vec<ExtractedCriterion>,
}

/// One worklist item for the ground node: a mention that may need a
/// terminology binding, plus enough context to write it back to the right
/// criterion once grounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntityLite {
    /// Correlates this entity across `entities_json` and
    /// `grounded_entities_json`; not a store-assigned id, since the `Entity`
    /// row does not exist until the persist node writes it.
    pub entity_id_stub: String,
    /// Criterion this mention belongs to.
    pub criterion_id: u64,
    /// Mention text to ground.
    pub text: String,
    /// Inclusion or exclusion, inherited from the owning criterion.
    pub criteria_type: CriteriaType,
    /// Free-text category, inherited from the owning criterion.
    pub category: Option<String>,
    /// Guessed concept kind, used to pick the terminology router's provider
    /// list.
    pub entity_type: EntityType,
    /// Demographic mentions never carry terminology codes.
    pub skip_grounding: bool,
}

/// Decodes `state.extraction_json`, writes the new `CriteriaBatch` and its
/// `Criteria` rows, and builds the ground node's entity worklist.
///
/// # Errors
///
/// Returns [`PipelineError`] only for a store/serialization failure; a
/// missing or undecodable `extraction_json` is recorded as a fatal
/// `state.error` instead.
pub async fn run(mut state: PipelineState, deps: &PipelineDeps) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_node", node = "parse", protocol_id = state.protocol_id.get());
    async move {
        let Some(extraction_json) = state.extraction_json.as_deref() else {
            fail_extraction(&mut state, deps, "parse: no extraction_json available, extract must run first").await?;
            return Ok(state);
        };
        let extraction: ExtractionResult = match serde_json::from_str(extraction_json) {
            Ok(value) => value,
            Err(err) => {
                fail_extraction(&mut state, deps, format!("parse: extraction_json failed to decode: {err}")).await?;
                return Ok(state);
            }
        };

        if extraction.criteria.is_empty() {
            fail_extraction(&mut state, deps, "parse: extraction produced zero criteria").await?;
            return Ok(state);
        }

        let mut extracted = extraction.criteria;
        let max_criteria = deps.config.pipeline_max_criteria as usize;
        if max_criteria > 0 && extracted.len() > max_criteria {
            let truncated = extracted.len() - max_criteria;
            extracted.truncate(max_criteria);
            state.record_error(format!("parse: truncated {truncated} criteria (max {max_criteria})"));
        }

        let store = deps.store.clone();
        let protocol_id = state.protocol_id;
        let inherited_review_status =
            crate::blocking::store_call(move || store.reviewed_text_inheritance_map(protocol_id)).await?;

        // `persist_batch_with_outbox` assigns the real batch id on insert and
        // ignores `Criteria::batch_id` entirely; this placeholder is never read.
        let placeholder_batch_id = BatchId::from_raw(1).unwrap_or(BatchId::new(std::num::NonZeroU64::MIN));
        let mut criteria = Vec::with_capacity(extracted.len());
        let mut entities = Vec::new();
        for extracted_criterion in extracted {
            let criterion_id = deps.ids.next_criterion_id();
            let review_status = inherited_review_status
                .get(&criteriagate_store_sqlite::canonical_text(&extracted_criterion.text))
                .copied();

            for (index, mention) in mentions_for(&extracted_criterion).into_iter().enumerate() {
                let entity_type = guess_entity_type(
                    extracted_criterion.category.as_deref(),
                    &mention,
                    !extracted_criterion.numeric_thresholds.is_empty(),
                );
                entities.push(EntityLite {
                    entity_id_stub: format!("{}:{index}", criterion_id.get()),
                    criterion_id: criterion_id.get(),
                    text: mention,
                    criteria_type: extracted_criterion.criteria_type,
                    category: extracted_criterion.category.clone(),
                    entity_type,
                    skip_grounding: entity_type == EntityType::Demographic,
                });
            }

            criteria.push(Criteria {
                id: criterion_id,
                batch_id: placeholder_batch_id,
                criteria_type: extracted_criterion.criteria_type,
                category: extracted_criterion.category,
                text: extracted_criterion.text,
                structured_criterion: None,
                conditions: None,
                confidence: extracted_criterion.confidence,
                assertion_status: AssertionStatus::from(extracted_criterion.assertion_status),
                source_section: extracted_criterion.source_section,
                page_number: None,
                review_status,
            });
        }

        let now = super::now();
        let key = idempotency_key(&state.protocol_id.get().to_string(), "criteria_batch_ready", now_version(&now));
        let write = BatchWrite {
            protocol_id: state.protocol_id,
            extraction_model: "criteriagate-extraction-llm".to_owned(),
            criteria,
            entities: Vec::new(),
            atoms: Vec::new(),
            composites: Vec::new(),
            relationships: Vec::new(),
            event_type: "criteria_batch_ready".to_owned(),
            idempotency_key: key,
            event_payload: serde_json::json!({ "protocol_id": state.protocol_id.get() }),
        };

        let store = deps.store.clone();
        let batch_id = crate::blocking::store_call(move || store.persist_batch_with_outbox(&write, now)).await?;

        state.batch_id = Some(batch_id);
        state.entities_json = Some(serde_json::to_string(&entities)?);
        state.status = "grounding".to_owned();
        Ok(state)
    }
    .instrument(span)
    .await
}

/// Returns the text spans this criterion should dispatch for grounding: one
/// per free-text sub-condition when the extraction split any out, otherwise
/// the criterion's own text.
fn mentions_for(criterion: &ExtractedCriterion) -> Vec<String> {
    if criterion.conditions.is_empty() { vec![criterion.text.clone()] } else { criterion.conditions.clone() }
}

/// Truncates a timestamp to the `u32` the outbox's idempotency-key version
/// slot expects; re-extractions of the same protocol happen seconds to
/// years apart, so second-granularity is enough to keep keys distinct.
#[allow(clippy::cast_possible_truncation, reason = "idempotency versioning only needs rough monotonicity")]
fn now_version(now: &criteriagate_core::Timestamp) -> u32 {
    now.as_offset_date_time().unix_timestamp().max(0) as u32
}

/// Classifies a mention into an [`EntityType`] using simple keyword rules
/// over its own text and the owning criterion's category.
fn guess_entity_type(category: Option<&str>, text: &str, has_numeric_threshold: bool) -> EntityType {
    let haystack = format!("{} {}", category.unwrap_or_default(), text).to_lowercase();
    const DEMOGRAPHIC_WORDS: &[&str] = &["age", "years old", "sex", "gender", "race", "ethnicity", "pregnan"];
    const MEDICATION_WORDS: &[&str] =
        &["mg", "dose", "dosing", "therapy with", "treated with", "medication", "drug", "administered"];
    const PROCEDURE_WORDS: &[&str] = &["surgery", "surgical", "procedure", "biopsy", "transplant", "resection"];
    const LAB_WORDS: &[&str] =
        &["level", "count", "laboratory", "creatinine", "hemoglobin", "glucose", "bilirubin", "platelet"];
    const BIOMARKER_WORDS: &[&str] = &["mutation", "biomarker", "expression", "genotype", "positive for"];

    if DEMOGRAPHIC_WORDS.iter().any(|word| haystack.contains(word)) {
        EntityType::Demographic
    } else if MEDICATION_WORDS.iter().any(|word| haystack.contains(word)) {
        EntityType::Medication
    } else if PROCEDURE_WORDS.iter().any(|word| haystack.contains(word)) {
        EntityType::Procedure
    } else if BIOMARKER_WORDS.iter().any(|word| haystack.contains(word)) {
        EntityType::Biomarker
    } else if has_numeric_threshold || LAB_WORDS.iter().any(|word| haystack.contains(word)) {
        EntityType::LabValue
    } else {
        EntityType::Condition
    }
}
