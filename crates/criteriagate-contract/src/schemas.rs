// crates/criteriagate-contract/src/schemas.rs
// ============================================================================
// Module: Contract Schemas
// Description: JSON schema builders for the pipeline's structured-output
//              contracts.
// Purpose: Give the extract, ground, structure, and ordinal-resolve nodes a
//          single canonical schema to constrain each structured LLM call.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Four structured-output shapes cross the pipeline/LLM boundary: the
//! extraction node's [`extraction_result_schema`], the ground node's
//! [`grounding_decision_schema`], the structure node's
//! [`structure_proposal_schema`], and the ordinal-resolve node's
//! [`ordinal_resolution_schema`]. Each schema is draft 2020-12 JSON Schema,
//! built from shared sub-schema helpers so a field's shape (an identifier, a
//! confidence score, a bounded number) is defined once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Public Schema Entrypoints
// ============================================================================

/// Returns the JSON schema for the extract node's `ExtractionResult`.
#[must_use]
pub fn extraction_result_schema() -> Value {
    let defs = extraction_defs();
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "criteriagate://contract/schemas/extraction_result.schema.json",
        "title": "CriteriaGate ExtractionResult",
        "description": "Structured output of the extraction-LLM call over a protocol PDF.",
        "type": "object",
        "required": ["protocol_summary", "criteria"],
        "properties": {
            "protocol_summary": schema_for_string("Free-text summary of the protocol."),
            "criteria": {
                "type": "array",
                "items": { "$ref": "#/$defs/ExtractedCriterion" }
            }
        },
        "additionalProperties": false,
        "$defs": defs
    })
}

/// Returns the JSON schema for the ground node's reasoning `Decision`.
#[must_use]
pub fn grounding_decision_schema() -> Value {
    let defs = grounding_defs();
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "criteriagate://contract/schemas/grounding_decision.schema.json",
        "title": "CriteriaGate Grounding Decision",
        "description": "Structured output of the reasoning LLM's candidate-selection call.",
        "type": "object",
        "required": ["best_candidate", "confidence", "rationale"],
        "properties": {
            "best_candidate": { "$ref": "#/$defs/CandidateRef" },
            "confidence": schema_for_unit_interval("Confidence the chosen candidate is correct."),
            "rationale": schema_for_string("Short explanation of why this candidate was chosen.")
        },
        "additionalProperties": false,
        "$defs": defs
    })
}

/// Returns the JSON schema for the structure node's tree proposal.
#[must_use]
pub fn structure_proposal_schema() -> Value {
    let defs = structure_defs();
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "criteriagate://contract/schemas/structure_proposal.schema.json",
        "title": "CriteriaGate Structure Proposal",
        "description": "Typed AND/OR/NOT tree proposed by the logic-structuring LLM for one criterion.",
        "type": "object",
        "required": ["root"],
        "properties": {
            "root": { "$ref": "#/$defs/Node" }
        },
        "additionalProperties": false,
        "$defs": defs
    })
}

/// Returns the JSON schema for the ordinal-resolve node's proposal batch.
#[must_use]
pub fn ordinal_resolution_schema() -> Value {
    let defs = ordinal_defs();
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "criteriagate://contract/schemas/ordinal_resolution.schema.json",
        "title": "CriteriaGate Ordinal Resolution",
        "description": "Batch proposal from the ordinal-scale detection LLM for atoms missing a unit.",
        "type": "object",
        "required": ["resolutions"],
        "properties": {
            "resolutions": {
                "type": "array",
                "items": { "$ref": "#/$defs/OrdinalResolution" }
            }
        },
        "additionalProperties": false,
        "$defs": defs
    })
}

// ============================================================================
// SECTION: Extraction Defs
// ============================================================================

/// Builds the shared schema definitions for [`extraction_result_schema`].
fn extraction_defs() -> Map<String, Value> {
    let mut defs = Map::new();
    defs.insert(
        String::from("ExtractedCriterion"),
        json!({
            "type": "object",
            "required": [
                "text",
                "criteria_type",
                "numeric_thresholds",
                "conditions",
                "assertion_status",
                "confidence"
            ],
            "properties": {
                "text": schema_for_string("Verbatim or lightly normalized criterion text."),
                "criteria_type": {
                    "type": "string",
                    "enum": ["inclusion", "exclusion"]
                },
                "category": {
                    "oneOf": [
                        { "type": "null" },
                        schema_for_string("Free-text clinical category, e.g. laboratory or medication.")
                    ]
                },
                "temporal_constraint": {
                    "oneOf": [
                        { "type": "null" },
                        { "$ref": "#/$defs/TemporalConstraint" }
                    ]
                },
                "numeric_thresholds": {
                    "type": "array",
                    "items": { "$ref": "#/$defs/NumericThreshold" }
                },
                "conditions": schema_for_string_array("Free-text sub-conditions for downstream decomposition."),
                "assertion_status": {
                    "type": "string",
                    "enum": ["asserted", "negated", "uncertain"]
                },
                "confidence": schema_for_unit_interval("Extraction confidence for this criterion."),
                "source_section": {
                    "oneOf": [
                        { "type": "null" },
                        schema_for_string("Protocol section the criterion was extracted from.")
                    ]
                }
            },
            "additionalProperties": false
        }),
    );
    defs.insert(
        String::from("TemporalConstraint"),
        json!({
            "type": "object",
            "required": [],
            "properties": {
                "duration": {
                    "oneOf": [
                        { "type": "null" },
                        schema_for_string("ISO 8601 duration, e.g. P30D.")
                    ]
                },
                "relation": {
                    "oneOf": [
                        { "type": "null" },
                        {
                            "type": "string",
                            "enum": ["within", "at_least", "before", "after"]
                        }
                    ]
                },
                "reference_point": {
                    "oneOf": [
                        { "type": "null" },
                        schema_for_string("Anchor event, e.g. enrollment or first_dose.")
                    ]
                }
            },
            "additionalProperties": false
        }),
    );
    defs.insert(
        String::from("NumericThreshold"),
        json!({
            "type": "object",
            "required": ["value", "unit", "comparator"],
            "properties": {
                "value": { "type": "number" },
                "unit": schema_for_string("Unit of measure as written in the protocol."),
                "comparator": { "$ref": "#/$defs/Comparator" },
                "upper_value": {
                    "oneOf": [
                        { "type": "null" },
                        { "type": "number" }
                    ]
                }
            },
            "additionalProperties": false
        }),
    );
    defs.insert(String::from("Comparator"), comparator_schema());
    defs
}

/// Returns the JSON schema for a numeric-threshold comparator.
#[must_use]
fn comparator_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["eq", "ne", "gt", "ge", "lt", "le", "within"]
    })
}

// ============================================================================
// SECTION: Grounding Defs
// ============================================================================

/// Builds the shared schema definitions for [`grounding_decision_schema`].
fn grounding_defs() -> Map<String, Value> {
    let mut defs = Map::new();
    defs.insert(
        String::from("CandidateRef"),
        json!({
            "type": "object",
            "required": ["provider", "code", "display", "confidence"],
            "properties": {
                "provider": schema_for_string("Terminology provider that returned this candidate, e.g. snomed."),
                "code": schema_for_string("Provider-native code."),
                "display": schema_for_string("Human-readable display name for the code."),
                "confidence": schema_for_unit_interval("Match confidence reported by the provider tier.")
            },
            "additionalProperties": false
        }),
    );
    defs
}

// ============================================================================
// SECTION: Structure Defs
// ============================================================================

/// Builds the shared schema definitions for [`structure_proposal_schema`].
fn structure_defs() -> Map<String, Value> {
    let mut defs = Map::new();
    defs.insert(String::from("Node"), node_schema());
    defs.insert(
        String::from("AtomNode"),
        json!({
            "type": "object",
            "required": ["kind", "entity_ref", "operator"],
            "properties": {
                "kind": { "const": "atom" },
                "entity_ref": schema_for_string("Stable reference to the entity this atom binds to."),
                "operator": relation_operator_schema(),
                "bound_numeric": {
                    "oneOf": [
                        { "type": "null" },
                        { "type": "number" }
                    ]
                },
                "bound_text": {
                    "oneOf": [
                        { "type": "null" },
                        { "type": "string" }
                    ]
                },
                "unit_text": {
                    "oneOf": [
                        { "type": "null" },
                        { "type": "string" }
                    ]
                }
            },
            "additionalProperties": false
        }),
    );
    defs.insert(
        String::from("CompositeNode"),
        json!({
            "type": "object",
            "required": ["kind", "operator", "children"],
            "properties": {
                "kind": { "const": "composite" },
                "operator": {
                    "type": "string",
                    "enum": ["and", "or", "not"]
                },
                "children": {
                    "type": "array",
                    "items": { "$ref": "#/$defs/Node" },
                    "minItems": 1
                }
            },
            "additionalProperties": false
        }),
    );
    defs
}

/// Returns the JSON schema for one node of a structure proposal's tree,
/// discriminated by its `kind` tag.
fn node_schema() -> Value {
    json!({
        "oneOf": [
            { "$ref": "#/$defs/AtomNode" },
            { "$ref": "#/$defs/CompositeNode" }
        ]
    })
}

/// Returns the JSON schema for an atom's relation operator.
#[must_use]
fn relation_operator_schema() -> Value {
    json!({
        "type": "string",
        "enum": [
            "eq", "ne", "gt", "ge", "lt", "le", "within",
            "contains", "not_contains", "not_in_last_duration"
        ]
    })
}

// ============================================================================
// SECTION: Ordinal-Resolution Defs
// ============================================================================

/// Builds the shared schema definitions for [`ordinal_resolution_schema`].
fn ordinal_defs() -> Map<String, Value> {
    let mut defs = Map::new();
    defs.insert(
        String::from("OrdinalResolution"),
        json!({
            "type": "object",
            "required": ["atom_ref", "is_ordinal_scale"],
            "properties": {
                "atom_ref": schema_for_string("Stable reference to the atom under review."),
                "is_ordinal_scale": { "type": "boolean" },
                "scale_name": {
                    "oneOf": [
                        { "type": "null" },
                        schema_for_string("Recognized ordinal scale name, e.g. NYHA, ECOG, WOMAC.")
                    ]
                },
                "unit_concept_id": {
                    "oneOf": [
                        { "type": "null" },
                        schema_for_string("Canonical ordinal marker to set on the atom's unit_concept_id.")
                    ]
                },
                "rationale": schema_for_string("Short explanation of the detection decision.")
            },
            "additionalProperties": false
        }),
    );
    defs
}

// ============================================================================
// SECTION: Shared Schema Helpers
// ============================================================================

/// Returns a JSON schema for a plain string.
#[must_use]
fn schema_for_string(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

/// Returns a JSON schema for an array of strings.
#[must_use]
fn schema_for_string_array(description: &str) -> Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description
    })
}

/// Returns a JSON schema for a number constrained to the closed `[0, 1]`
/// interval, used throughout for confidence scores.
#[must_use]
fn schema_for_unit_interval(description: &str) -> Value {
    json!({
        "type": "number",
        "minimum": 0.0,
        "maximum": 1.0,
        "description": description
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
