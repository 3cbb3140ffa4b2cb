// crates/criteriagate-pipeline/src/nodes/ordinal_resolve.rs
// ============================================================================
// Module: CriteriaGate Pipeline Ordinal-Resolve Node
// Description: Detects ordinal scales among atoms with no bound unit and
//              proposes a canonical unit-concept binding for each.
// Purpose: The pipeline's final node; atoms the structure node left with no
//          unit (e.g. an NYHA class or ECOG performance status) are sent to
//          a detection LLM as a batch, and recognized scales get their
//          `unit_concept_id` set so a reviewer does not have to bind one by
//          hand.
// Dependencies: criteriagate-contract, criteriagate-core, criteriagate-logic
// ============================================================================

//! ## Overview
//! This node never fails the run: a missing batch, an empty candidate set,
//! a failed LLM call, or a malformed response all just leave the node with
//! nothing to propose. Every recognized proposal is both applied to its
//! atom and written to `AuditLog` so a reviewer can see why a unit changed
//! without diffing the atom table themselves.

use criteriagate_contract::schemas::ordinal_resolution_schema;
use criteriagate_core::AtomicCriterion;
use criteriagate_core::LlmMessage;
use criteriagate_core::PipelineState;
use serde::Deserialize;
use tracing::Instrument;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::calls::call_resilient;
use crate::deps::PipelineDeps;
use crate::error::PipelineError;

/// One entry of the detection LLM's `resolutions` array.
#[derive(Debug, Deserialize)]
struct OrdinalResolution {
    atom_ref: String,
    is_ordinal_scale: bool,
    scale_name: Option<String>,
    unit_concept_id: Option<String>,
    rationale: String,
}

/// The detection LLM's decoded batch response.
#[derive(Debug, Deserialize)]
struct OrdinalResponse {
    resolutions: Vec<OrdinalResolution>,
}

/// Proposes and applies ordinal-scale unit bindings for every atom of
/// `state.protocol_id` still missing a unit.
///
/// # Errors
///
/// Returns [`PipelineError`] only for infrastructure failures (the atom
/// lookup, the audit-log write, or the per-atom unit update); a failed or
/// malformed detection call simply leaves the candidate atoms unresolved.
pub async fn run(mut state: PipelineState, deps: &PipelineDeps) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_node", node = "ordinal_resolve", protocol_id = state.protocol_id.get());
    async move {
        let store = deps.store.clone();
        let protocol_id = state.protocol_id;
        let atoms = crate::blocking::store_call(move || store.list_atoms_missing_unit(protocol_id)).await?;

        if atoms.is_empty() {
            state.status = "complete".to_owned();
            state.ordinal_proposals_json = Some("[]".to_owned());
            return Ok(state);
        }

        let refs: Vec<String> = atoms.iter().map(|atom| format!("a{}", atom.id.get())).collect();
        let messages = [LlmMessage { role: "user".to_owned(), text: prompt_for(&atoms, &refs), attachment: None }];
        let schema = ordinal_resolution_schema();
        let retry = criteriagate_resilience::RetryPolicy::default();
        let llm = std::sync::Arc::clone(&deps.llm.ordinal_detection);
        let called = call_resilient(&deps.llm_breaker, &retry, deps.config.llm_timeout, || {
            let llm = std::sync::Arc::clone(&llm);
            let schema = schema.clone();
            let messages = messages.clone();
            async move { llm.call(&schema, &messages).await }
        })
        .await;

        let response = match called {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "ordinal_resolve: detection call failed, leaving atoms unresolved");
                state.record_error(format!("ordinal_resolve: detection call failed: {err}"));
                state.status = "complete".to_owned();
                return Ok(state);
            }
        };
        let parsed: OrdinalResponse = match serde_json::from_value(response) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "ordinal_resolve: malformed detection response");
                state.record_error(format!("ordinal_resolve: malformed detection response: {err}"));
                state.status = "complete".to_owned();
                return Ok(state);
            }
        };

        let mut applied = 0u32;
        for resolution in &parsed.resolutions {
            if !resolution.is_ordinal_scale {
                continue;
            }
            let Some(unit_concept_id) = resolution.unit_concept_id.as_deref() else {
                continue;
            };
            let Some(atom_id) = atoms
                .iter()
                .find(|atom| format!("a{}", atom.id.get()) == resolution.atom_ref)
                .map(|atom| atom.id)
            else {
                warn!(atom_ref = %resolution.atom_ref, "ordinal_resolve: proposal names an unknown atom_ref");
                continue;
            };

            let store = deps.store.clone();
            let unit = unit_concept_id.to_owned();
            crate::blocking::store_call(move || store.update_atom_unit_concept(atom_id, &unit)).await?;

            let store = deps.store.clone();
            let detail = serde_json::json!({
                "atom_id": atom_id.get(),
                "scale_name": resolution.scale_name,
                "unit_concept_id": unit_concept_id,
                "rationale": resolution.rationale,
            });
            let now = super::now();
            crate::blocking::store_call(move || store.append_audit_log(protocol_id, "ordinal_resolve_proposal", &detail, now))
                .await?;
            applied += 1;
        }

        info!(candidates = atoms.len(), applied, "ordinal_resolve: batch complete");
        state.status = "complete".to_owned();
        state.ordinal_proposals_json = Some(serde_json::to_string(&parsed.resolutions.iter().map(|r| r.atom_ref.clone()).collect::<Vec<_>>())?);
        Ok(state)
    }
    .instrument(span)
    .await
}

/// Renders a [`criteriagate_core::RelationOperator`] as a short prompt
/// token, mirroring the store's own stored-text encoding without depending
/// on its private `codec` module.
const fn operator_label(operator: criteriagate_core::RelationOperator) -> &'static str {
    use criteriagate_core::RelationOperator;
    match operator {
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

/// Builds the batch detection prompt: one line per candidate atom naming
/// its entity domain, comparison value, and stable `atom_ref`.
fn prompt_for(atoms: &[AtomicCriterion], refs: &[String]) -> String {
    let lines: Vec<String> = atoms
        .iter()
        .zip(refs)
        .map(|(atom, atom_ref)| {
            let value = atom
                .value_numeric
                .as_ref()
                .map(ToString::to_string)
                .or_else(|| atom.value_text.clone())
                .unwrap_or_else(|| "?".to_owned());
            format!(
                "{atom_ref}: entity={} operator={} value={value}",
                atom.entity_domain.as_deref().unwrap_or("unknown"),
                operator_label(atom.relation_operator),
            )
        })
        .collect();
    format!(
        "The following atomic criteria have no bound unit. Identify any that are a recognized ordinal \
         scale (e.g. NYHA, ECOG, WOMAC) and propose a canonical unit_concept_id for it. Leave \
         is_ordinal_scale false for anything else.\n{}",
        lines.join("\n")
    )
}
