// crates/criteriagate-pipeline/src/nodes/persist.rs
// ============================================================================
// Module: CriteriaGate Pipeline Persist Node
// Description: Writes grounded entities back onto their criteria and
//              transitions the protocol out of `grounding`.
// Purpose: The join point between the ground node's per-mention worklist and
//          the durable `Entity` rows the structure node later reads.
// Dependencies: criteriagate-core, criteriagate-store-sqlite
// ============================================================================

//! ## Overview
//! `state.entities_json` (every mention parse identified, including
//! `skip_grounding` ones) and `state.grounded_entities_json` (the ground
//! node's outcome for every non-skip mention) are joined on
//! `entity_id_stub`. Each joined pair becomes an `Entity` row with a
//! freshly allocated id; a `skip_grounding` mention with no grounded
//! counterpart still gets a row, carrying empty codes and a placeholder
//! confidence of `1.0`, since [`GroundingMethod`] has no "not applicable"
//! variant and demographic mentions never carry codes by design (see
//! `DESIGN.md`).
//!
//! Every criterion's new entities are also recorded as `field_mappings` on
//! `Criteria.conditions`, keyed by the same per-criterion ref the structure
//! node's prompt will use (`e0`, `e1`, ...), so that node can resolve an
//! `entity_ref` back to a real `EntityId` without re-deriving the mention
//! list itself.

use std::collections::BTreeMap;

use criteriagate_core::CodeBindings;
use criteriagate_core::CriterionId;
use criteriagate_core::Entity;
use criteriagate_core::GroundingMethod;
use criteriagate_core::PipelineState;
use criteriagate_core::ProtocolStatus;
use tracing::Instrument;
use tracing::info_span;
use tracing::warn;

use crate::deps::PipelineDeps;
use crate::error::PipelineError;
use crate::nodes::ground::GroundedEntity;
use crate::nodes::parse::EntityLite;

/// One criterion's worth of newly allocated entities, ready to write back
/// onto `Criteria.conditions` as `field_mappings`.
struct CriterionEntities {
    criterion_id: CriterionId,
    rows: Vec<Entity>,
}

/// Joins `entities_json`/`grounded_entities_json`, inserts the resulting
/// `Entity` rows and `field_mappings`, and transitions the protocol per the
/// attempted/grounded count table.
///
/// # Errors
///
/// Returns [`PipelineError`] only for infrastructure failures; parse/ground
/// must both have run for this node to have anything to join, and their
/// absence is recorded as a fatal `state.error` instead.
pub async fn run(mut state: PipelineState, deps: &PipelineDeps) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_node", node = "persist", protocol_id = state.protocol_id.get());
    async move {
        let Some(entities_json) = state.entities_json.as_deref() else {
            state.fail("persist: no entities_json available, parse must run first");
            return Ok(state);
        };
        let Some(grounded_json) = state.grounded_entities_json.as_deref() else {
            state.fail("persist: no grounded_entities_json available, ground must run first");
            return Ok(state);
        };
        let mentions: Vec<EntityLite> = serde_json::from_str(entities_json)?;
        let grounded: Vec<GroundedEntity> = serde_json::from_str(grounded_json)?;
        let grounded_by_stub: BTreeMap<&str, &GroundedEntity> =
            grounded.iter().map(|entity| (entity.entity_id_stub.as_str(), entity)).collect();

        let attempted = grounded.len();
        let grounded_count = grounded.iter().filter(|entity| is_effectively_grounded(entity)).count();

        let mut by_criterion: BTreeMap<u64, CriterionEntities> = BTreeMap::new();
        for mention in &mentions {
            let Some(criterion_id) = CriterionId::from_raw(mention.criterion_id) else {
                state.record_error(format!("persist: mention for criterion 0 discarded: {}", mention.entity_id_stub));
                continue;
            };
            let row = build_entity_row(
                mention,
                criterion_id,
                grounded_by_stub.get(mention.entity_id_stub.as_str()).copied(),
                deps,
            );
            by_criterion
                .entry(mention.criterion_id)
                .or_insert_with(|| CriterionEntities { criterion_id, rows: Vec::new() })
                .rows
                .push(row);
        }

        let mut all_entities = Vec::new();
        let mut condition_updates = Vec::new();
        for entities in by_criterion.into_values() {
            let field_mappings = field_mappings_json(&entities.rows);
            condition_updates.push((entities.criterion_id, serde_json::json!({ "field_mappings": field_mappings })));
            all_entities.extend(entities.rows);
        }

        let target =
            if attempted > 0 && grounded_count > 0 { ProtocolStatus::PendingReview } else { ProtocolStatus::GroundingFailed };
        let error_reason = state.error.clone().or_else(|| {
            (!state.errors.is_empty()).then(|| state.errors.join("; "))
        });

        let store = deps.store.clone();
        let protocol_id = state.protocol_id;
        let now = super::now();
        let errors = state.errors.clone();
        crate::blocking::store_call(move || {
            store.persist_grounding_results(
                protocol_id,
                &all_entities,
                &condition_updates,
                target,
                error_reason.as_deref(),
                &errors,
                now,
            )
        })
        .await?;

        state.status = match target {
            ProtocolStatus::PendingReview => "pending_review",
            ProtocolStatus::GroundingFailed => "grounding_failed",
            _ => "persisted",
        }
        .to_owned();
        if matches!(target, ProtocolStatus::GroundingFailed) {
            state.fail("persist: no entity reached a usable grounding outcome");
        }
        Ok(state)
    }
    .instrument(span)
    .await
}

/// Mirrors the ground node's own notion of "grounded": either a non-expert
/// method, or an expert-review outcome that still retained a best candidate.
fn is_effectively_grounded(entity: &GroundedEntity) -> bool {
    !matches!(entity.method, GroundingMethod::ExpertReview) || entity.best_code.is_some()
}

/// Builds the `Entity` row for one mention, applying its grounding outcome
/// when one exists.
fn build_entity_row(
    mention: &EntityLite,
    criterion_id: CriterionId,
    grounded: Option<&GroundedEntity>,
    deps: &PipelineDeps,
) -> Entity {
    let id = deps.ids.next_entity_id();
    match grounded {
        Some(grounded) => Entity {
            id,
            criteria_id: criterion_id,
            entity_type: mention.entity_type,
            text: mention.text.clone(),
            span_start: None,
            span_end: None,
            codes: grounded
                .system
                .as_deref()
                .zip(grounded.best_code.as_deref())
                .map_or_else(CodeBindings::default, |(system, code)| code_bindings_for(system, code)),
            grounding_confidence: grounded.confidence,
            grounding_method: grounded.method,
            context_window: None,
        },
        None => Entity {
            id,
            criteria_id: criterion_id,
            entity_type: mention.entity_type,
            text: mention.text.clone(),
            span_start: None,
            span_end: None,
            codes: CodeBindings::default(),
            grounding_confidence: 1.0,
            grounding_method: GroundingMethod::Exact,
            context_window: None,
        },
    }
}

/// Maps a terminology provider tag to the one [`CodeBindings`] field it
/// owns. `cpt` (the Procedure route's second provider) has no corresponding
/// column; a binding from it is logged and otherwise dropped.
fn code_bindings_for(system: &str, code: &str) -> CodeBindings {
    let mut codes = CodeBindings::default();
    match system {
        "umls" => codes.umls_cui = Some(code.to_owned()),
        "snomed" => codes.snomed_code = Some(code.to_owned()),
        "rxnorm" => codes.rxnorm_code = Some(code.to_owned()),
        "loinc" => codes.loinc_code = Some(code.to_owned()),
        "icd10" => codes.icd10_code = Some(code.to_owned()),
        "hpo" => codes.hpo_code = Some(code.to_owned()),
        other => warn!(provider = other, "persist: no CodeBindings column for this provider, dropping code"),
    }
    codes
}

/// Builds the `field_mappings` array written onto `Criteria.conditions`:
/// one entry per entity, keyed by the same `e{n}` ref the structure node's
/// prompt assigns.
fn field_mappings_json(rows: &[Entity]) -> Vec<serde_json::Value> {
    rows.iter()
        .enumerate()
        .map(|(index, entity)| {
            serde_json::json!({
                "ref": format!("e{index}"),
                "entity_id": entity.id.get(),
                "text": entity.text,
                "entity_type": entity.entity_type,
                "codes": entity.codes,
                "confidence": entity.grounding_confidence,
                "method": entity.grounding_method,
            })
        })
        .collect()
}
