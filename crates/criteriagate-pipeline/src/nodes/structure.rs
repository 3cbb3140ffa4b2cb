// crates/criteriagate-pipeline/src/nodes/structure.rs
// ============================================================================
// Module: CriteriaGate Pipeline Structure Node
// Description: Decomposes each grounded criterion into an AND/OR/NOT
//              expression tree of atomic comparisons.
// Purpose: Turn a criterion's free text, now backed by grounded entities,
//          into the atomic/composite/relationship rows the comparator
//          evaluates at cohort-matching time.
// Dependencies: criteriagate-contract, criteriagate-core, criteriagate-logic,
//               criteriagate-resilience
// ============================================================================

//! ## Overview
//! Every criterion the persist node left a non-empty `field_mappings` list
//! on runs independently, bounded by
//! [`crate::deps::PipelineDeps::structure_semaphore`]: the structuring LLM
//! proposes an AND/OR/NOT tree over the criterion's entity refs, this node
//! validates the tree against [`criteriagate_logic::Requirement`]'s own
//! constructor invariants (an `and`/`or` needs at least two children, a
//! `not` needs exactly one), resolves each leaf's `entity_ref` back to the
//! real grounded entity it names, and flattens the result with
//! [`crate::tree::flatten_tree`].
//!
//! A malformed or invalid proposal is never fatal to the run: it is logged
//! and that one criterion is left unstructured, same as a decode failure or
//! a failed LLM call.

use std::collections::BTreeMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use criteriagate_contract::schemas::structure_proposal_schema;
use criteriagate_core::CodeBindings;
use criteriagate_core::Criteria;
use criteriagate_core::LlmMessage;
use criteriagate_core::PipelineState;
use criteriagate_core::ProtocolId;
use criteriagate_core::RelationOperator;
use criteriagate_logic::Requirement;
use criteriagate_resilience::RetryPolicy;
use serde::Deserialize;
use tracing::Instrument;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::calls::call_resilient;
use crate::deps::PipelineDeps;
use crate::error::PipelineError;
use crate::tree::StructureLeaf;
use crate::tree::flatten_tree;

/// One entry of the `field_mappings` array the persist node writes onto
/// `Criteria.conditions`, keyed by the `e{n}` ref the structuring LLM's
/// prompt assigns.
#[derive(Debug, Deserialize)]
struct FieldMapping {
    #[serde(rename = "ref")]
    entity_ref: String,
    text: String,
    entity_type: String,
    codes: CodeBindings,
}

/// The structuring LLM's decoded response, tagged by `kind`.
#[derive(Debug, Deserialize)]
struct ProposalRoot {
    root: NodeProposal,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum NodeProposal {
    Atom {
        entity_ref: String,
        operator: RelationOperator,
        bound_numeric: Option<f64>,
        bound_text: Option<String>,
        unit_text: Option<String>,
    },
    Composite {
        operator: CompositeOperator,
        children: Vec<NodeProposal>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum CompositeOperator {
    And,
    Or,
    Not,
}

/// Decomposes every criterion with grounded field mappings into a
/// structured expression tree, persisting the result per criterion.
///
/// # Errors
///
/// Returns [`PipelineError`] only for infrastructure failures (the batch
/// lookup or a per-criterion store write); a malformed LLM proposal or a
/// tree that fails constructor validation is recorded and that criterion
/// is skipped instead.
pub async fn run(mut state: PipelineState, deps: &PipelineDeps) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_node", node = "structure", protocol_id = state.protocol_id.get());
    async move {
        let Some(batch_id) = state.batch_id else {
            state.fail("structure: no batch_id available, parse must run first");
            return Ok(state);
        };

        let store = deps.store.clone();
        let criteria = crate::blocking::store_call(move || store.list_criteria_for_batch(batch_id)).await?;

        let candidates: Vec<Criteria> = criteria.into_iter().filter(has_field_mappings).collect();
        let total = candidates.len();

        let mut handles = Vec::with_capacity(candidates.len());
        for criterion in candidates {
            let deps = deps.clone();
            let protocol_id = state.protocol_id;
            handles.push(tokio::spawn(async move { structure_one(criterion, protocol_id, &deps).await }));
        }

        let mut structured = 0u32;
        let mut skipped = 0u32;
        for handle in handles {
            match handle.await {
                Ok(Ok(true)) => structured += 1,
                Ok(Ok(false)) => skipped += 1,
                Ok(Err(err)) => return Err(err),
                Err(join_err) => {
                    skipped += 1;
                    state.record_error(format!("structure: criterion task panicked or was cancelled: {join_err}"));
                }
            }
        }

        info!(total, structured, skipped, "structure: batch complete");
        state.status = "structuring".to_owned();
        Ok(state)
    }
    .instrument(span)
    .await
}

/// A criterion is eligible once the persist node has written it at least
/// one entity.
fn has_field_mappings(criterion: &Criteria) -> bool {
    criterion
        .conditions
        .as_ref()
        .and_then(|conditions| conditions.get("field_mappings"))
        .and_then(|mappings| mappings.as_array())
        .is_some_and(|mappings| !mappings.is_empty())
}

/// Structures one criterion: proposes, validates, flattens, persists.
/// Returns `Ok(false)` for any non-infrastructure reason the criterion was
/// left unstructured.
async fn structure_one(criterion: Criteria, protocol_id: ProtocolId, deps: &PipelineDeps) -> Result<bool, PipelineError> {
    let permit = deps.structure_semaphore.acquire().await.ok();

    let Some(mappings) = field_mappings(&criterion) else {
        drop(permit);
        return Ok(false);
    };
    let entities: BTreeMap<String, FieldMapping> =
        mappings.into_iter().map(|mapping| (mapping.entity_ref.clone(), mapping)).collect();

    let schema = structure_proposal_schema();
    let messages = [LlmMessage { role: "user".to_owned(), text: prompt_for(&criterion, &entities), attachment: None }];
    let retry = RetryPolicy::default();
    let llm = Arc::clone(&deps.llm.structuring);
    let called = call_resilient(&deps.llm_breaker, &retry, deps.config.llm_timeout, || {
        let llm = Arc::clone(&llm);
        let schema = schema.clone();
        let messages = messages.clone();
        async move { llm.call(&schema, &messages).await }
    })
    .await;
    drop(permit);

    let response = match called {
        Ok(response) => response,
        Err(err) => {
            warn!(criterion_id = criterion.id.get(), %err, "structure: structuring call failed");
            return Ok(false);
        }
    };
    let proposal: ProposalRoot = match serde_json::from_value(response.clone()) {
        Ok(proposal) => proposal,
        Err(err) => {
            warn!(criterion_id = criterion.id.get(), %err, "structure: malformed structure proposal");
            return Ok(false);
        }
    };
    let tree = match build_requirement(&proposal.root, &entities) {
        Ok(tree) => tree,
        Err(reason) => {
            warn!(criterion_id = criterion.id.get(), reason, "structure: tree failed constructor validation");
            return Ok(false);
        }
    };

    let flattened = flatten_tree(&tree, criterion.id, protocol_id, criterion.criteria_type, &deps.ids);
    let store = deps.store.clone();
    let criterion_id = criterion.id;
    crate::blocking::store_call(move || {
        store.persist_structure_for_criterion(criterion_id, &response, &flattened.atoms, &flattened.composites, &flattened.relationships)
    })
    .await?;
    Ok(true)
}

/// Decodes `Criteria.conditions.field_mappings`, or `None` if it is absent
/// or fails to decode (logged by the caller's `has_field_mappings` filter
/// having already checked presence; a decode failure here is a corrupt row).
fn field_mappings(criterion: &Criteria) -> Option<Vec<FieldMapping>> {
    let mappings = criterion.conditions.as_ref()?.get("field_mappings")?.clone();
    match serde_json::from_value(mappings) {
        Ok(mappings) => Some(mappings),
        Err(err) => {
            warn!(criterion_id = criterion.id.get(), %err, "structure: field_mappings failed to decode");
            None
        }
    }
}

/// Builds the structuring prompt: the criterion text plus every entity ref
/// the LLM may bind an atom to.
fn prompt_for(criterion: &Criteria, entities: &BTreeMap<String, FieldMapping>) -> String {
    let refs: Vec<String> = entities
        .iter()
        .map(|(entity_ref, mapping)| format!("{entity_ref}: \"{}\" ({})", mapping.text, mapping.entity_type))
        .collect();
    format!(
        "Criterion text: \"{}\". Decompose this into an AND/OR/NOT tree of comparisons, one atom per \
         entity it actually bounds. Available entity refs: [{}]. Every atom's entity_ref must be one \
         of these.",
        criterion.text,
        refs.join(", ")
    )
}

/// Recursively builds a `Requirement<StructureLeaf>` from a decoded
/// proposal, rejecting an `and`/`or` with fewer than two children, a `not`
/// with more or less than one, or an `entity_ref` absent from `entities`.
fn build_requirement(
    node: &NodeProposal,
    entities: &BTreeMap<String, FieldMapping>,
) -> Result<Requirement<StructureLeaf>, String> {
    match node {
        NodeProposal::Atom { entity_ref, operator, bound_numeric, bound_text, unit_text } => {
            let mapping = entities.get(entity_ref).ok_or_else(|| format!("unknown entity_ref '{entity_ref}'"))?;
            let value_numeric = match bound_numeric {
                Some(value) => {
                    Some(value.to_string().parse::<BigDecimal>().map_err(|err| format!("invalid bound_numeric: {err}"))?)
                }
                None => None,
            };
            let (entity_concept_system, entity_concept_id) = first_code(&mapping.codes);
            Ok(Requirement::predicate(StructureLeaf {
                entity_domain: Some(mapping.entity_type.clone()),
                entity_concept_id,
                entity_concept_system,
                relation_operator: *operator,
                value_numeric,
                value_text: bound_text.clone(),
                unit_text: unit_text.clone(),
                negation: false,
            }))
        }
        NodeProposal::Composite { operator, children } => {
            let built =
                children.iter().map(|child| build_requirement(child, entities)).collect::<Result<Vec<_>, _>>()?;
            match operator {
                CompositeOperator::And => {
                    if built.len() < 2 {
                        return Err(format!("'and' requires at least two children, got {}", built.len()));
                    }
                    Ok(Requirement::and(built))
                }
                CompositeOperator::Or => {
                    if built.len() < 2 {
                        return Err(format!("'or' requires at least two children, got {}", built.len()));
                    }
                    Ok(Requirement::or(built))
                }
                CompositeOperator::Not => {
                    let mut built = built;
                    if built.len() != 1 {
                        return Err(format!("'not' requires exactly one child, got {}", built.len()));
                    }
                    Ok(Requirement::negate(built.remove(0)))
                }
            }
        }
    }
}

/// Picks the one terminology binding `codes` actually carries, in the
/// order persist.rs's `code_bindings_for` assigns them.
fn first_code(codes: &CodeBindings) -> (Option<String>, Option<String>) {
    let found = codes
        .umls_cui
        .as_deref()
        .map(|code| ("umls", code))
        .or_else(|| codes.snomed_code.as_deref().map(|code| ("snomed", code)))
        .or_else(|| codes.rxnorm_code.as_deref().map(|code| ("rxnorm", code)))
        .or_else(|| codes.loinc_code.as_deref().map(|code| ("loinc", code)))
        .or_else(|| codes.icd10_code.as_deref().map(|code| ("icd10", code)))
        .or_else(|| codes.hpo_code.as_deref().map(|code| ("hpo", code)));
    match found {
        Some((system, code)) => (Some(system.to_owned()), Some(code.to_owned())),
        None => (None, None),
    }
}
