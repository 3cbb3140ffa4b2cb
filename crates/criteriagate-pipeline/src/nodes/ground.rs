// crates/criteriagate-pipeline/src/nodes/ground.rs
// ============================================================================
// Module: CriteriaGate Pipeline Ground Node
// Description: Resolves each non-skip entity mention to a terminology binding.
// Purpose: The core of the pipeline — turns free-text entity mentions into
//          coded concepts the persist and structure nodes can reason about.
// Dependencies: criteriagate-contract, criteriagate-core, criteriagate-providers,
//               criteriagate-resilience
// ============================================================================

//! ## Overview
//! Every non-skip entity from `state.entities_json` runs an independent,
//! seven-step pipeline bounded by [`crate::deps::PipelineDeps::ground_semaphore`]:
//! route to a provider list, tier-match each provider's candidates, reconcile
//! across providers, ask the grounding-decision LLM to choose, and —
//! whenever its confidence falls short — retry with a fixed agentic
//! question sequence up to three times. A single entity's failure is caught
//! and recorded; it never aborts its siblings.
//!
//! The whole fan-out is bounded by `ground_node_timeout`; any entity still
//! running when that elapses is recorded as `expert_review` at whatever
//! confidence it last reached, same as an entity that exhausted its retries.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use criteriagate_contract::schemas::grounding_decision_schema;
use criteriagate_core::EntityType;
use criteriagate_core::GroundingMethod;
use criteriagate_core::LlmMessage;
use criteriagate_core::PipelineState;
use criteriagate_core::ProtocolStatus;
use criteriagate_providers::RoutedCandidate;
use criteriagate_resilience::CacheKey;
use serde::Deserialize;
use serde::Serialize;
use tracing::Instrument;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::calls::call_guarded;
use crate::calls::call_resilient;
use crate::deps::PipelineDeps;
use crate::error::PipelineError;
use crate::nodes::parse::EntityLite;

/// Confidence below which the agentic retry loop engages.
const CONFIDENCE_FLOOR: f64 = 0.5;

/// Maximum agentic retry iterations beyond the first decision.
const MAX_AGENTIC_ITERATIONS: u32 = 3;

/// Fixed question sequence the agentic retry loop works through, in order.
const AGENTIC_QUESTIONS: [&str; MAX_AGENTIC_ITERATIONS as usize] = [
    "Re-examine whether any candidate is actually valid for this mention; discard invalid ones.",
    "If no candidate fits well, consider broader parent concepts for this mention.",
    "Rephrase the mention in clinical shorthand and reconsider the candidate list.",
];

/// A terminology candidate surfaced to the grounding-decision LLM and
/// retained on the entity's output record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GroundedCandidate {
    pub provider: String,
    pub code: String,
    pub display: String,
    pub confidence: f64,
}

/// One entity's grounding outcome, keyed back to its parse-time stub id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GroundedEntity {
    pub entity_id_stub: String,
    pub criterion_id: u64,
    pub best_code: Option<String>,
    pub system: Option<String>,
    pub confidence: f64,
    pub method: GroundingMethod,
    pub candidates: Vec<GroundedCandidate>,
}

#[derive(Debug, Deserialize)]
struct Decision {
    best_candidate: DecisionCandidate,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct DecisionCandidate {
    provider: String,
    code: String,
    display: String,
}

/// Aggregated per-run telemetry, logged once at the end of the node.
#[derive(Debug, Default)]
struct Telemetry {
    grounded_count: u32,
    error_count: u32,
    total_ms: u64,
    max_ms: u64,
    retry_count: u32,
}

impl Telemetry {
    fn record(&mut self, elapsed: Duration, retries: u32, grounded: bool) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.total_ms += elapsed_ms;
        self.max_ms = self.max_ms.max(elapsed_ms);
        self.retry_count += retries;
        if grounded {
            self.grounded_count += 1;
        } else {
            self.error_count += 1;
        }
    }

    fn avg_ms(&self) -> u64 {
        let total = self.grounded_count + self.error_count;
        if total == 0 { 0 } else { self.total_ms / u64::from(total) }
    }
}

/// Records a fatal `state.error` and transitions the protocol to
/// `extraction_failed`, the edge spec.md documents for every fatal failure
/// while a protocol is `extracting` — the status ground's own entry finds
/// the protocol in, since ground is the one that transitions it to
/// `grounding`.
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
        store.transition_protocol_status(protocol_id, ProtocolStatus::ExtractionFailed, error_reason.as_deref(), crate::nodes::now())
    })
    .await?;
    Ok(())
}

/// Resolves every non-skip entity in `state.entities_json`, recording
/// `state.grounded_entities_json`. Fatal only when the run has zero entities
/// to ground in the first place.
///
/// # Errors
///
/// Returns [`PipelineError`] only for infrastructure failures (malformed
/// checkpoint JSON is treated as an infrastructure bug, since parse always
/// writes well-formed entity records); per-entity provider and LLM failures
/// are caught and recorded as `expert_review` results instead.
pub async fn run(mut state: PipelineState, deps: &PipelineDeps) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_node", node = "ground", protocol_id = state.protocol_id.get());
    async move {
        let Some(entities_json) = state.entities_json.as_deref() else {
            fail_extraction(&mut state, deps, "ground: no entities_json available, parse must run first").await?;
            return Ok(state);
        };
        let mut entities: Vec<EntityLite> = serde_json::from_str(entities_json)?;

        if entities.is_empty() {
            fail_extraction(&mut state, deps, "ground: zero entities to ground").await?;
            return Ok(state);
        }

        let max_entities = deps.config.pipeline_max_entities as usize;
        if max_entities > 0 && entities.len() > max_entities {
            let truncated = entities.len() - max_entities;
            entities.truncate(max_entities);
            state.record_error(format!("ground: truncated {truncated} entities (max {max_entities})"));
        }

        let store = deps.store.clone();
        let protocol_id = state.protocol_id;
        crate::blocking::store_call(move || {
            store.transition_protocol_status(protocol_id, ProtocolStatus::Grounding, None, crate::nodes::now())
        })
        .await?;

        warmup(deps).await;

        let deadline = Instant::now() + deps.config.ground_node_timeout;
        let mut handles = Vec::with_capacity(entities.len());
        for entity in entities.into_iter().filter(|entity| !entity.skip_grounding) {
            let deps = deps.clone();
            handles.push(tokio::spawn(async move { ground_one(&entity, &deps, deadline).await }));
        }

        let mut telemetry = Telemetry::default();
        let mut grounded = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((entity, elapsed, retries, ok)) => {
                    telemetry.record(elapsed, retries, ok);
                    if !ok {
                        state.record_error(format!(
                            "ground: entity {} failed to reach a grounding decision",
                            entity.entity_id_stub
                        ));
                    }
                    grounded.push(entity);
                }
                Err(join_err) => {
                    telemetry.record(Duration::ZERO, 0, false);
                    state.record_error(format!("ground: entity task panicked or was cancelled: {join_err}"));
                }
            }
        }
        grounded.sort_by(|a, b| a.entity_id_stub.cmp(&b.entity_id_stub));

        info!(
            grounded_count = telemetry.grounded_count,
            error_count = telemetry.error_count,
            avg_entity_ms = telemetry.avg_ms(),
            max_entity_ms = telemetry.max_ms,
            retry_count = telemetry.retry_count,
            "ground: batch complete"
        );

        state.grounded_entities_json = Some(serde_json::to_string(&grounded)?);
        state.status = "grounding".to_owned();
        Ok(state)
    }
    .instrument(span)
    .await
}

/// Issues one no-op grounding-decision call before the real fan-out, purely
/// to warm the LLM endpoint's connection/model cache. Failure here is never
/// fatal and is not retried.
async fn warmup(deps: &PipelineDeps) {
    let schema = grounding_decision_schema();
    let messages = [LlmMessage {
        role: "user".to_owned(),
        text: "Warmup call, no entity to ground. Respond with any schema-valid placeholder.".to_owned(),
        attachment: None,
    }];
    let llm = Arc::clone(&deps.llm.grounding_decision);
    if let Err(err) = call_guarded(&deps.llm_breaker, deps.config.llm_timeout, || async move {
        llm.call(&schema, &messages).await
    })
    .await
    {
        warn!(%err, "ground: warmup call failed, proceeding anyway");
    }
}

/// Runs the full per-entity pipeline for one entity, bounded by the ground
/// semaphore and the overall node deadline. Never returns an error: any
/// failure downgrades the entity to an `expert_review` record instead.
async fn ground_one(
    entity: &EntityLite,
    deps: &PipelineDeps,
    node_deadline: Instant,
) -> (GroundedEntity, Duration, u32, bool) {
    let started = Instant::now();
    let permit = deps.ground_semaphore.acquire().await.ok();
    let remaining = node_deadline.saturating_duration_since(Instant::now());
    let entity_deadline = remaining.min(deps.config.ground_entity_timeout);

    let outcome = tokio::time::timeout(entity_deadline.max(Duration::from_millis(1)), async {
        resolve_entity(entity, deps).await
    })
    .await;
    drop(permit);

    let elapsed = started.elapsed();
    match outcome {
        Ok((best, candidates, method, retries)) => {
            let grounded = !matches!(method, GroundingMethod::ExpertReview) || best.is_some();
            let result = GroundedEntity {
                entity_id_stub: entity.entity_id_stub.clone(),
                criterion_id: entity.criterion_id,
                best_code: best.as_ref().map(|c| c.code.clone()),
                system: best.as_ref().map(|c| c.provider.clone()),
                confidence: best.as_ref().map_or(0.0, |c| c.confidence),
                method,
                candidates,
            };
            (result, elapsed, retries, grounded)
        }
        Err(_elapsed) => {
            warn!(entity_id_stub = %entity.entity_id_stub, "ground: per-entity deadline exceeded");
            let result = GroundedEntity {
                entity_id_stub: entity.entity_id_stub.clone(),
                criterion_id: entity.criterion_id,
                best_code: None,
                system: None,
                confidence: 0.0,
                method: GroundingMethod::ExpertReview,
                candidates: Vec::new(),
            };
            (result, elapsed, 0, false)
        }
    }
}

/// Routes, matches, reconciles, and decides a binding for one entity,
/// running the agentic retry loop when the first decision falls short of
/// [`CONFIDENCE_FLOOR`].
async fn resolve_entity(
    entity: &EntityLite,
    deps: &PipelineDeps,
) -> (Option<GroundedCandidate>, Vec<GroundedCandidate>, GroundingMethod, u32) {
    let mut query_text = entity.text.clone();
    let mut best: Option<(GroundedCandidate, f64)> = None;
    let mut last_candidates = Vec::new();
    let mut retries = 0;

    for iteration in 0..=MAX_AGENTIC_ITERATIONS {
        let routed = match routed_candidates(&query_text, entity.entity_type, deps).await {
            Ok(routed) => routed,
            Err(err) => {
                warn!(entity_id_stub = %entity.entity_id_stub, %err, "ground: provider routing failed");
                Vec::new()
            }
        };
        let reconciled = reconcile(routed);
        last_candidates = reconciled.iter().map(to_grounded_candidate).collect();

        if reconciled.is_empty() {
            retries = iteration.min(MAX_AGENTIC_ITERATIONS);
            break;
        }

        let decision = decide(entity, &reconciled, iteration, deps).await;
        match decision {
            Some(decision) if decision.confidence >= CONFIDENCE_FLOOR => {
                let method = if iteration == 0 { tier_method(&reconciled) } else { GroundingMethod::Agentic };
                return (
                    Some(GroundedCandidate {
                        provider: decision.best_candidate.provider,
                        code: decision.best_candidate.code,
                        display: decision.best_candidate.display,
                        confidence: decision.confidence,
                    }),
                    last_candidates,
                    method,
                    iteration,
                );
            }
            Some(decision) => {
                let candidate = GroundedCandidate {
                    provider: decision.best_candidate.provider,
                    code: decision.best_candidate.code,
                    display: decision.best_candidate.display,
                    confidence: decision.confidence,
                };
                if best.as_ref().is_none_or(|(_, conf)| decision.confidence > *conf) {
                    best = Some((candidate, decision.confidence));
                }
            }
            None => {}
        }

        retries = iteration;
        if iteration < MAX_AGENTIC_ITERATIONS {
            query_text = refine_query(&entity.text, iteration);
        }
    }

    let best_candidate = best.map(|(candidate, _confidence)| candidate);
    (best_candidate, last_candidates, GroundingMethod::ExpertReview, retries)
}

/// Applies one step of the fixed agentic question sequence to the query
/// text. Step 0 (validity) keeps the text unchanged and relies on the
/// prompt alone to re-examine the existing candidates; steps 1 and 2
/// narrow or rephrase the mention itself.
fn refine_query(original_text: &str, completed_iterations: u32) -> String {
    match completed_iterations {
        0 => original_text.to_owned(),
        1 => original_text.split_whitespace().next().unwrap_or(original_text).to_owned(),
        _ => format!("{original_text} (clinical shorthand)"),
    }
}

/// Searches the terminology router for `entity_text`, serving from the
/// process-local cache when available.
async fn routed_candidates(
    entity_text: &str,
    entity_type: EntityType,
    deps: &PipelineDeps,
) -> Result<Vec<RoutedCandidate>, criteriagate_core::ClassifiedError> {
    let key = CacheKey::new("router", entity_type, entity_text);
    if let Some(cached) = deps.terminology_cache.get(&key).await {
        return Ok(cached);
    }

    let retry = criteriagate_resilience::RetryPolicy::default();
    let router = Arc::clone(&deps.router);
    let text = entity_text.to_owned();
    let candidates = call_resilient(&deps.provider_breaker, &retry, deps.config.provider_timeout, || {
        let router = Arc::clone(&router);
        let text = text.clone();
        async move { router.search(&text, entity_type).await }
    })
    .await?;

    deps.terminology_cache.put(key, candidates.clone()).await;
    Ok(candidates)
}

/// Picks each provider's single best (highest-confidence) candidate, then
/// orders the survivors by routing preference and descending confidence so
/// the domain-preferred provider leads and a confidence tie favors it too.
fn reconcile(routed: Vec<RoutedCandidate>) -> Vec<RoutedCandidate> {
    use std::collections::BTreeMap;

    let mut best_per_provider: BTreeMap<String, RoutedCandidate> = BTreeMap::new();
    for routed_candidate in routed {
        best_per_provider
            .entry(routed_candidate.candidate.provider.clone())
            .and_modify(|existing| {
                if routed_candidate.candidate.confidence > existing.candidate.confidence {
                    *existing = routed_candidate.clone();
                }
            })
            .or_insert(routed_candidate);
    }

    let mut merged: Vec<RoutedCandidate> = best_per_provider.into_values().collect();
    merged.sort_by(|a, b| {
        a.route_rank
            .cmp(&b.route_rank)
            .then_with(|| b.candidate.confidence.total_cmp(&a.candidate.confidence))
    });
    merged
}

fn to_grounded_candidate(routed: &RoutedCandidate) -> GroundedCandidate {
    GroundedCandidate {
        provider: routed.candidate.provider.clone(),
        code: routed.candidate.code.clone(),
        display: routed.candidate.display.clone(),
        confidence: routed.candidate.confidence,
    }
}

/// Classifies the leading reconciled candidate's confidence into the
/// tiered-match method it presumably came from, for the first (non-agentic)
/// decision only.
fn tier_method(reconciled: &[RoutedCandidate]) -> GroundingMethod {
    match reconciled.first().map(|candidate| candidate.candidate.confidence) {
        Some(confidence) if confidence >= 0.9 => GroundingMethod::Exact,
        Some(_) => GroundingMethod::WordSynonym,
        None => GroundingMethod::ExpertReview,
    }
}

/// Sends the reconciled candidates to the grounding-decision LLM, asking it
/// to choose among them. `iteration` is 0 for the initial decision and 1..=3
/// for each agentic retry, each carrying that step's fixed question.
async fn decide(
    entity: &EntityLite,
    reconciled: &[RoutedCandidate],
    iteration: u32,
    deps: &PipelineDeps,
) -> Option<Decision> {
    let schema = grounding_decision_schema();
    let candidates_json = serde_json::to_string(&reconciled.iter().map(to_grounded_candidate).collect::<Vec<_>>())
        .unwrap_or_default();
    let mut text = format!(
        "Entity mention: \"{}\" (type: {:?}). Candidate terminology bindings: {candidates_json}. \
         Choose the best candidate, or report low confidence if none fit.",
        entity.text, entity.entity_type
    );
    if iteration > 0 {
        if let Some(question) = AGENTIC_QUESTIONS.get(iteration as usize - 1) {
            text = format!("{text} {question}");
        }
    }
    let messages = [LlmMessage { role: "user".to_owned(), text, attachment: None }];
    let retry = criteriagate_resilience::RetryPolicy::default();
    let llm = Arc::clone(&deps.llm.grounding_decision);
    let called = call_resilient(&deps.llm_breaker, &retry, deps.config.llm_timeout, || {
        let llm = Arc::clone(&llm);
        let schema = schema.clone();
        let messages = messages.clone();
        async move { llm.call(&schema, &messages).await }
    })
    .await;

    match called {
        Ok(value) => match serde_json::from_value(value) {
            Ok(decision) => Some(decision),
            Err(err) => {
                warn!(%err, "ground: grounding decision response failed to decode");
                None
            }
        },
        Err(err) => {
            warn!(%err, "ground: grounding decision call failed");
            None
        }
    }
}
