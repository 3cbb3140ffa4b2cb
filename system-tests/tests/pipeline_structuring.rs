// system-tests/tests/pipeline_structuring.rs
// ============================================================================
// Scenario: a single lab-value range criterion ("HbA1c between 7.0% and
// 10.0%") is decomposed by the structuring LLM into an AND of two bound
// atoms, and the persisted `structured_criterion` reflects that tree.
// ============================================================================

#![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted to unwrap.")]

mod helpers;

use std::collections::BTreeMap;
use std::sync::Arc;

use criteriagate_core::PipelineState;
use criteriagate_pipeline::LlmRoster;
use criteriagate_pipeline::run_pipeline;
use criteriagate_pipeline::runtime::DEFAULT_THREAD_ID;
use serde_json::json;

fn sample_extraction() -> serde_json::Value {
    json!({
        "protocol_summary": "A phase II study.",
        "criteria": [
            {
                "text": "HbA1c between 7.0% and 10.0%",
                "criteria_type": "inclusion",
                "category": "Laboratory",
                "temporal_constraint": null,
                "numeric_thresholds": [7.0, 10.0],
                "conditions": [],
                "assertion_status": "asserted",
                "confidence": 0.88,
                "source_section": null
            }
        ]
    })
}

fn structuring_response() -> serde_json::Value {
    json!({
        "root": {
            "kind": "composite",
            "operator": "and",
            "children": [
                {
                    "kind": "atom",
                    "entity_ref": "e0",
                    "operator": "ge",
                    "bound_numeric": 7.0,
                    "bound_text": null,
                    "unit_text": "%"
                },
                {
                    "kind": "atom",
                    "entity_ref": "e0",
                    "operator": "le",
                    "bound_numeric": 10.0,
                    "bound_text": null,
                    "unit_text": "%"
                }
            ]
        }
    })
}

#[tokio::test]
async fn range_criterion_structures_into_an_and_of_two_bound_atoms() {
    let store = helpers::fresh_store();
    let protocol_id = store.insert_protocol("Sample Protocol", "local://protocol.pdf", helpers::now()).unwrap();

    // `lab_value` routes to loinc then umls; umls must be registered too or
    // the router treats the missing entry as a permanent configuration
    // error for the whole route.
    let mut providers: BTreeMap<String, Arc<dyn criteriagate_core::TerminologyProvider>> = BTreeMap::new();
    providers.insert(
        "loinc".to_owned(),
        Arc::new(helpers::SelectiveProvider { name: "loinc", grounds: vec!["HbA1c between 7.0% and 10.0%"], confidence: 0.95 }),
    );
    providers.insert("umls".to_owned(), Arc::new(helpers::EmptyProvider));

    let roster = LlmRoster::new(
        Arc::new(helpers::FixedResponseLlm(sample_extraction())),
        Arc::new(helpers::ConfidentDecisionLlm::new("loinc", "4548-4", "Hemoglobin A1c", 0.95)),
        Arc::new(helpers::FixedResponseLlm(structuring_response())),
        Arc::new(helpers::FixedResponseLlm(helpers::no_ordinal_scales())),
    );

    let deps = helpers::deps_with(store, Arc::new(helpers::FixedBlobStore::new(*b"%PDF-1.4")), roster, providers);

    let state = PipelineState::new(protocol_id, "local://protocol.pdf".to_owned(), "Sample Protocol".to_owned());
    let result = run_pipeline(state, DEFAULT_THREAD_ID, &deps).await.unwrap();

    assert!(!result.should_halt(), "run halted: {:?}", result.error);

    let batch_id = result.batch_id.unwrap();
    let criteria = deps.store.list_criteria_for_batch(batch_id).unwrap();
    assert_eq!(criteria.len(), 1);

    let structured = criteria[0].structured_criterion.as_ref().expect("criterion was structured");
    let root = &structured["root"];
    assert_eq!(root["kind"], "composite");
    assert_eq!(root["operator"], "and");
    let children = root["children"].as_array().expect("and has children");
    assert_eq!(children.len(), 2);
}
