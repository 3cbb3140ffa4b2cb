// crates/criteriagate-store-sqlite/src/schema.rs
// ============================================================================
// Module: CriteriaGate SQLite Schema
// Description: DDL for the protocol/criteria/entity domain model, outbox
//              table, and pipeline checkpoint table.
// Purpose: Keep every table definition in one place so schema evolution is
//          reviewable as a single diff.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! Schema version is tracked via `PRAGMA user_version`; `initialize_schema`
//! is idempotent (`CREATE TABLE IF NOT EXISTS`) and safe to call on every
//! process start.

use rusqlite::Connection;

/// Schema version for this store. Bump when adding a migration.
pub const SCHEMA_VERSION: i64 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS protocols (
    id              INTEGER PRIMARY KEY,
    title           TEXT NOT NULL,
    file_uri        TEXT NOT NULL,
    status          TEXT NOT NULL,
    page_count      INTEGER,
    quality_score   REAL,
    error_reason    TEXT,
    metadata_json   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS criteria_batches (
    id                  INTEGER PRIMARY KEY,
    protocol_id         INTEGER NOT NULL REFERENCES protocols(id),
    status              TEXT NOT NULL,
    extraction_model    TEXT NOT NULL,
    is_archived         INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batches_protocol ON criteria_batches(protocol_id);

CREATE TABLE IF NOT EXISTS criteria (
    id                      INTEGER PRIMARY KEY,
    batch_id                INTEGER NOT NULL REFERENCES criteria_batches(id),
    criteria_type           TEXT NOT NULL,
    category                TEXT,
    text                    TEXT NOT NULL,
    structured_criterion    TEXT,
    conditions              TEXT,
    confidence              REAL NOT NULL,
    assertion_status        TEXT NOT NULL,
    source_section          TEXT,
    page_number             INTEGER,
    review_status           TEXT
);
CREATE INDEX IF NOT EXISTS idx_criteria_batch ON criteria(batch_id);

CREATE TABLE IF NOT EXISTS entities (
    id                      INTEGER PRIMARY KEY,
    criteria_id             INTEGER NOT NULL REFERENCES criteria(id),
    entity_type             TEXT NOT NULL,
    text                    TEXT NOT NULL,
    span_start              INTEGER,
    span_end                INTEGER,
    umls_cui                TEXT,
    snomed_code             TEXT,
    rxnorm_code             TEXT,
    loinc_code              TEXT,
    icd10_code              TEXT,
    hpo_code                TEXT,
    grounding_confidence    REAL NOT NULL,
    grounding_method        TEXT NOT NULL,
    context_window          TEXT
);
CREATE INDEX IF NOT EXISTS idx_entities_criteria ON entities(criteria_id);

CREATE TABLE IF NOT EXISTS atomic_criteria (
    id                      INTEGER PRIMARY KEY,
    criterion_id            INTEGER NOT NULL REFERENCES criteria(id),
    protocol_id             INTEGER NOT NULL REFERENCES protocols(id),
    inclusion_exclusion     TEXT NOT NULL,
    entity_domain           TEXT,
    entity_concept_id       TEXT,
    entity_concept_system   TEXT,
    relation_operator       TEXT NOT NULL,
    value_numeric           TEXT,
    value_text              TEXT,
    unit_text               TEXT,
    unit_concept_id         TEXT,
    negation                INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_atoms_criterion ON atomic_criteria(criterion_id);

CREATE TABLE IF NOT EXISTS composite_criteria (
    id              INTEGER PRIMARY KEY,
    criterion_id    INTEGER NOT NULL REFERENCES criteria(id),
    protocol_id     INTEGER NOT NULL REFERENCES protocols(id),
    logic_operator  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_composites_criterion ON composite_criteria(criterion_id);

CREATE TABLE IF NOT EXISTS criterion_relationships (
    criterion_id    INTEGER NOT NULL REFERENCES criteria(id),
    parent_id       INTEGER NOT NULL,
    child_kind      TEXT NOT NULL,
    child_id        INTEGER NOT NULL,
    child_sequence  INTEGER NOT NULL,
    PRIMARY KEY (criterion_id, parent_id, child_sequence)
);

CREATE TABLE IF NOT EXISTS reviews (
    id              INTEGER PRIMARY KEY,
    criteria_id     INTEGER NOT NULL REFERENCES criteria(id),
    before_json     TEXT NOT NULL,
    after_json      TEXT NOT NULL,
    reviewer        TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reviews_criteria ON reviews(criteria_id);

CREATE TABLE IF NOT EXISTS audit_log (
    id              INTEGER PRIMARY KEY,
    protocol_id     INTEGER NOT NULL REFERENCES protocols(id),
    action          TEXT NOT NULL,
    detail_json     TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_protocol ON audit_log(protocol_id);

CREATE TABLE IF NOT EXISTS outbox_events (
    id                  INTEGER PRIMARY KEY,
    event_type          TEXT NOT NULL,
    aggregate_type      TEXT NOT NULL,
    aggregate_id        TEXT NOT NULL,
    payload_json        TEXT NOT NULL,
    idempotency_key     TEXT NOT NULL UNIQUE,
    status              TEXT NOT NULL,
    retry_count         INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    next_attempt_at     TEXT NOT NULL,
    published_at        TEXT
);
CREATE INDEX IF NOT EXISTS idx_outbox_status_due ON outbox_events(status, next_attempt_at);

CREATE TABLE IF NOT EXISTS pipeline_checkpoints (
    protocol_id         INTEGER NOT NULL,
    pipeline_thread_id  TEXT NOT NULL,
    state_json          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    PRIMARY KEY (protocol_id, pipeline_thread_id)
);
";

/// Creates every table if it does not already exist and records the schema
/// version in `PRAGMA user_version`.
///
/// # Errors
///
/// Returns [`rusqlite::Error`] if any statement fails.
pub fn initialize_schema(connection: &mut Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(DDL)?;
    connection.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
