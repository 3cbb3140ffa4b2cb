// crates/criteriagate-store-sqlite/src/store.rs
// ============================================================================
// Module: CriteriaGate SQLite Store
// Description: Connection-managed, transactional persistence for the
//              protocol/criteria domain model, pipeline checkpoints, and the
//              outbox table that announces domain writes.
// Purpose: Give the pipeline runtime a single storage boundary: every
//          multi-row domain write commits in the same transaction as the
//          outbox event that announces it.
// Dependencies: rusqlite, criteriagate_core, criteriagate_outbox, serde_json
// ============================================================================

//! ## Overview
//! [`SqliteStore`] wraps a single [`rusqlite::Connection`] behind a
//! [`std::sync::Mutex`]. `SQLite` serializes writers regardless of how many
//! connections are open, so one connection guarded by a mutex is simpler
//! than a pool and gives every caller the same consistency guarantees.
//! Opaque identifiers are `NonZeroU64`; `SQLite` integer columns are signed
//! 64-bit, so every id crosses the boundary through [`id_to_sql`]/
//! [`sql_to_id`] rather than a direct cast.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use criteriagate_core::AtomId;
use criteriagate_core::AtomicCriterion;
use criteriagate_core::AuditLogId;
use criteriagate_core::BatchId;
use criteriagate_core::BatchStatus;
use criteriagate_core::CodeBindings;
use criteriagate_core::CompositeCriterion;
use criteriagate_core::Criteria;
use criteriagate_core::CriteriaBatch;
use criteriagate_core::CriterionId;
use criteriagate_core::CriterionRelationship;
use criteriagate_core::Entity;
use criteriagate_core::EntityId;
use criteriagate_core::GroundingMethod;
use criteriagate_core::NodeId;
use criteriagate_core::PipelineState;
use criteriagate_core::Protocol;
use criteriagate_core::ProtocolId;
use criteriagate_core::ProtocolStatus;
use criteriagate_core::ReviewId;
use criteriagate_core::ReviewStatus;
use criteriagate_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::codec;
use crate::config::SqliteStoreConfig;
use crate::error::StoreError;
use crate::schema;

/// Everything required to durably commit one extraction/re-extraction batch:
/// the batch row, its criteria, their entities and expression-tree nodes, and
/// the outbox event that announces the write to downstream consumers.
///
/// # Invariants
/// - Every `CriterionRelationship` edge references a node owned by a
///   criterion in `criteria`; the store rejects the whole batch otherwise.
#[derive(Debug, Clone)]
pub struct BatchWrite {
    /// Target protocol.
    pub protocol_id: ProtocolId,
    /// Identifier of the model that produced this batch.
    pub extraction_model: String,
    /// Criteria rows belonging to the new batch.
    pub criteria: Vec<Criteria>,
    /// Entities belonging to criteria in this batch.
    pub entities: Vec<Entity>,
    /// Atomic expression-tree leaves belonging to criteria in this batch.
    pub atoms: Vec<AtomicCriterion>,
    /// Composite expression-tree nodes belonging to criteria in this batch.
    pub composites: Vec<CompositeCriterion>,
    /// Expression-tree edges belonging to criteria in this batch.
    pub relationships: Vec<CriterionRelationship>,
    /// Outbox event type to announce (e.g. `"criteria_batch_ready"`).
    pub event_type: String,
    /// Idempotency key for the announcing event.
    pub idempotency_key: String,
    /// Event payload, typically the new `batch_id` and protocol id.
    pub event_payload: serde_json::Value,
}

/// Converts an opaque id's raw value to the signed integer `SQLite` stores.
/// Saturates to `i64::MAX` rather than panicking; ids are assigned from an
/// `AUTOINCREMENT` rowid and never approach that range in practice.
pub(crate) fn id_to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Converts a stored signed integer back to an opaque id's raw value.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] if the stored value is not positive.
pub(crate) fn sql_to_id(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Invalid(format!("stored id {value} is not positive")))
}

/// `SQLite`-backed store for the protocol ingestion and criteria extraction
/// domain model.
///
/// # Invariants
/// - A single connection, guarded by a mutex, backs every instance; callers
///   never see partial transactions.
#[derive(Clone)]
pub struct SqliteStore {
    /// Shared, mutex-guarded connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Returns the shared, mutex-guarded connection backing this store, for
    /// use by sibling modules implementing storage traits against the same
    /// database (e.g. the outbox store adapter).
    pub(crate) fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.connection)
    }

    /// Opens (creating if necessary) a store at `config.path`, applies the
    /// configured pragmas, and ensures the schema is initialized.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] if the connection cannot be opened or any
    /// pragma/DDL statement fails.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, StoreError> {
        let mut connection = Connection::open(&config.path)?;
        connection.pragma_update(None, "journal_mode", config.journal_mode.pragma_value())?;
        connection.pragma_update(None, "synchronous", config.sync_mode.pragma_value())?;
        connection.busy_timeout(config.busy_timeout)?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        schema::initialize_schema(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Opens a store backed by the file at `path` with otherwise-default
    /// pragma settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] under the same conditions as [`Self::open`].
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open(&SqliteStoreConfig { path: path.as_ref().to_path_buf(), ..SqliteStoreConfig::default() })
    }

    /// Inserts a newly uploaded protocol in `uploaded` status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on failure.
    pub fn insert_protocol(
        &self,
        title: &str,
        file_uri: &str,
        now: Timestamp,
    ) -> Result<ProtocolId, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "INSERT INTO protocols (title, file_uri, status, metadata_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                title,
                file_uri,
                codec::protocol_status_to_text(ProtocolStatus::Uploaded),
                serde_json::Value::Object(serde_json::Map::new()).to_string(),
                timestamp_to_text(now),
            ],
        )?;
        let id = connection.last_insert_rowid();
        ProtocolId::from_raw(sql_to_id(id)?)
            .ok_or_else(|| StoreError::Invalid("protocol id must be non-zero".to_owned()))
    }

    /// Loads a protocol by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such protocol exists, or
    /// [`StoreError::Db`]/[`StoreError::Serde`] on a malformed row.
    pub fn load_protocol(&self, id: ProtocolId) -> Result<Protocol, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let row = connection
            .query_row(
                "SELECT title, file_uri, status, page_count, quality_score, error_reason,
                        metadata_json, created_at, updated_at
                 FROM protocols WHERE id = ?1",
                params![id_to_sql(id.get())],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<u32>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound { what: "protocol", id: id.to_string() })?;
        let (title, file_uri, status, page_count, quality_score, error_reason, metadata_json, created_at, updated_at) =
            row;
        Ok(Protocol {
            id,
            title,
            file_uri,
            status: codec::text_to_protocol_status(&status)?,
            page_count,
            quality_score,
            error_reason,
            metadata: serde_json::from_str(&metadata_json)?,
            created_at: text_to_timestamp(&created_at)?,
            updated_at: text_to_timestamp(&updated_at)?,
        })
    }

    /// Loads a protocol, first applying lazy archival if it has sat in
    /// `extraction_failed`/`grounding_failed` past `archive_ttl`, or if the
    /// `protocol_uploaded` event announcing it was dead-lettered and has
    /// aged past `archive_ttl`. This is the read path a CRUD surface over
    /// the read model is expected to call instead of [`Self::load_protocol`]
    /// directly, per SPEC_FULL §7's "accessing the protocol after the TTL
    /// transitions it to archived".
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such protocol exists, or
    /// [`StoreError::Db`]/[`StoreError::Serde`] on a malformed row.
    pub fn access_protocol(
        &self,
        id: ProtocolId,
        now: Timestamp,
        archive_ttl: time::Duration,
    ) -> Result<Protocol, StoreError> {
        let protocol = self.load_protocol(id)?;
        if !matches!(protocol.status, ProtocolStatus::ExtractionFailed | ProtocolStatus::GroundingFailed) {
            return Ok(protocol);
        }
        let stale_by_failure = now.is_at_or_after(&protocol.updated_at.plus(archive_ttl));
        let stale_by_dead_letter = self.has_aged_dead_letter(id, now, archive_ttl)?;
        if stale_by_failure || stale_by_dead_letter {
            self.transition_protocol_status(id, ProtocolStatus::Archived, protocol.error_reason.as_deref(), now)?;
            return self.load_protocol(id);
        }
        Ok(protocol)
    }

    /// Reports whether a dead-lettered outbox event targeting protocol `id`
    /// was created at least `archive_ttl` before `now`.
    fn has_aged_dead_letter(
        &self,
        id: ProtocolId,
        now: Timestamp,
        archive_ttl: time::Duration,
    ) -> Result<bool, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let created_at: Option<String> = connection
            .query_row(
                "SELECT created_at FROM outbox_events
                 WHERE aggregate_type = 'protocol' AND aggregate_id = ?1 AND status = 'dead_letter'
                 ORDER BY created_at ASC LIMIT 1",
                params![id.get().to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(created_at) = created_at else {
            return Ok(false);
        };
        let created_at = text_to_timestamp(&created_at)?;
        Ok(now.is_at_or_after(&created_at.plus(archive_ttl)))
    }

    /// Transitions a protocol's status, rejecting transitions that are not
    /// part of the documented state machine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for an undocumented transition, or
    /// [`StoreError::NotFound`]/[`StoreError::Db`] otherwise.
    pub fn transition_protocol_status(
        &self,
        id: ProtocolId,
        target: ProtocolStatus,
        error_reason: Option<&str>,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let current = self.load_protocol(id)?;
        if !current.status.can_transition_to(target) {
            return Err(StoreError::Invalid(format!(
                "protocol {id} cannot transition from {:?} to {target:?}",
                current.status
            )));
        }
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "UPDATE protocols SET status = ?1, error_reason = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                codec::protocol_status_to_text(target),
                error_reason,
                timestamp_to_text(now),
                id_to_sql(id.get()),
            ],
        )?;
        Ok(())
    }

    /// Commits an extraction/re-extraction batch and its announcing outbox
    /// event in a single transaction, archiving every prior non-archived
    /// batch of the same protocol.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] if a relationship edge references a
    /// node outside the batch, or [`StoreError::Db`]/[`StoreError::Serde`]
    /// on any statement failure; the transaction rolls back on any error.
    pub fn persist_batch_with_outbox(&self, write: &BatchWrite, now: Timestamp) -> Result<BatchId, StoreError> {
        validate_relationships(write)?;
        let mut connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tx = connection.transaction()?;

        tx.execute(
            "UPDATE criteria_batches SET is_archived = 1 WHERE protocol_id = ?1 AND is_archived = 0",
            params![id_to_sql(write.protocol_id.get())],
        )?;

        tx.execute(
            "INSERT INTO criteria_batches (protocol_id, status, extraction_model, is_archived, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                id_to_sql(write.protocol_id.get()),
                codec::batch_status_to_text(BatchStatus::PendingReview),
                write.extraction_model,
                timestamp_to_text(now),
            ],
        )?;
        let batch_id = BatchId::from_raw(sql_to_id(tx.last_insert_rowid())?)
            .ok_or_else(|| StoreError::Invalid("batch id must be non-zero".to_owned()))?;

        for criterion in &write.criteria {
            tx.execute(
                "INSERT INTO criteria (id, batch_id, criteria_type, category, text,
                    structured_criterion, conditions, confidence, assertion_status,
                    source_section, page_number, review_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    id_to_sql(criterion.id.get()),
                    id_to_sql(batch_id.get()),
                    codec::criteria_type_to_text(criterion.criteria_type),
                    criterion.category,
                    criterion.text,
                    criterion.structured_criterion.as_ref().map(ToString::to_string),
                    criterion.conditions.as_ref().map(ToString::to_string),
                    criterion.confidence,
                    codec::assertion_status_to_text(criterion.assertion_status),
                    criterion.source_section,
                    criterion.page_number,
                    criterion.review_status.map(codec::review_status_to_text),
                ],
            )?;
        }

        for entity in &write.entities {
            tx.execute(
                "INSERT INTO entities (id, criteria_id, entity_type, text, span_start, span_end,
                    umls_cui, snomed_code, rxnorm_code, loinc_code, icd10_code, hpo_code,
                    grounding_confidence, grounding_method, context_window)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    id_to_sql(entity.id.get()),
                    id_to_sql(entity.criteria_id.get()),
                    codec::entity_type_to_text(entity.entity_type),
                    entity.text,
                    entity.span_start,
                    entity.span_end,
                    entity.codes.umls_cui,
                    entity.codes.snomed_code,
                    entity.codes.rxnorm_code,
                    entity.codes.loinc_code,
                    entity.codes.icd10_code,
                    entity.codes.hpo_code,
                    entity.grounding_confidence,
                    codec::grounding_method_to_text(entity.grounding_method),
                    entity.context_window,
                ],
            )?;
        }

        for atom in &write.atoms {
            tx.execute(
                "INSERT INTO atomic_criteria (id, criterion_id, protocol_id, inclusion_exclusion,
                    entity_domain, entity_concept_id, entity_concept_system, relation_operator,
                    value_numeric, value_text, unit_text, unit_concept_id, negation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id_to_sql(atom.id.get()),
                    id_to_sql(atom.criterion_id.get()),
                    id_to_sql(atom.protocol_id.get()),
                    codec::criteria_type_to_text(atom.inclusion_exclusion),
                    atom.entity_domain,
                    atom.entity_concept_id,
                    atom.entity_concept_system,
                    codec::relation_operator_to_text(atom.relation_operator),
                    atom.value_numeric.as_ref().map(codec::decimal_to_text),
                    atom.value_text,
                    atom.unit_text,
                    atom.unit_concept_id,
                    atom.negation,
                ],
            )?;
        }

        for composite in &write.composites {
            tx.execute(
                "INSERT INTO composite_criteria (id, criterion_id, protocol_id, logic_operator)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id_to_sql(composite.id.get()),
                    id_to_sql(composite.criterion_id.get()),
                    id_to_sql(composite.protocol_id.get()),
                    codec::logic_operator_to_text(composite.logic_operator),
                ],
            )?;
        }

        for edge in &write.relationships {
            let (child_kind, child_id) = match edge.child {
                NodeId::Atom(atom_id) => ("atom", id_to_sql(atom_id.get())),
                NodeId::Composite(composite_id) => ("composite", id_to_sql(composite_id.get())),
            };
            tx.execute(
                "INSERT INTO criterion_relationships
                    (criterion_id, parent_id, child_kind, child_id, child_sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id_to_sql(edge.criterion_id.get()),
                    id_to_sql(edge.parent.get()),
                    child_kind,
                    child_id,
                    edge.child_sequence,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO outbox_events (event_type, aggregate_type, aggregate_id, payload_json,
                idempotency_key, status, retry_count, created_at, next_attempt_at)
             VALUES (?1, 'protocol', ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
            params![
                write.event_type,
                write.protocol_id.get().to_string(),
                write.event_payload.to_string(),
                write.idempotency_key,
                timestamp_to_text(now),
            ],
        )?;

        tx.commit()?;
        Ok(batch_id)
    }

    /// Writes (or overwrites) the pipeline checkpoint for `protocol_id` under
    /// `thread_id`, clearing any PDF bytes the state still carries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on failure.
    pub fn save_checkpoint(
        &self,
        thread_id: &str,
        state: &PipelineState,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let checkpoint = state.for_checkpoint();
        let state_json = serde_json::to_string(&checkpoint)?;
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "INSERT INTO pipeline_checkpoints (protocol_id, pipeline_thread_id, state_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(protocol_id, pipeline_thread_id)
             DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
            params![id_to_sql(state.protocol_id.get()), thread_id, state_json, timestamp_to_text(now)],
        )?;
        Ok(())
    }

    /// Loads the most recent checkpoint for `protocol_id` under `thread_id`,
    /// if one has been written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on failure.
    pub fn load_checkpoint(
        &self,
        protocol_id: ProtocolId,
        thread_id: &str,
    ) -> Result<Option<PipelineState>, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let state_json = connection
            .query_row(
                "SELECT state_json FROM pipeline_checkpoints WHERE protocol_id = ?1 AND pipeline_thread_id = ?2",
                params![id_to_sql(protocol_id.get()), thread_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        state_json.map(|json| serde_json::from_str(&json).map_err(StoreError::from)).transpose()
    }

    /// Appends an immutable review record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on failure.
    pub fn append_review(
        &self,
        criteria_id: CriterionId,
        before: &serde_json::Value,
        after: &serde_json::Value,
        reviewer: &str,
        now: Timestamp,
    ) -> Result<ReviewId, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "INSERT INTO reviews (criteria_id, before_json, after_json, reviewer, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id_to_sql(criteria_id.get()),
                before.to_string(),
                after.to_string(),
                reviewer,
                timestamp_to_text(now),
            ],
        )?;
        ReviewId::from_raw(sql_to_id(connection.last_insert_rowid())?)
            .ok_or_else(|| StoreError::Invalid("review id must be non-zero".to_owned()))
    }

    /// Appends an immutable audit-log entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on failure.
    pub fn append_audit_log(
        &self,
        protocol_id: ProtocolId,
        action: &str,
        detail: &serde_json::Value,
        now: Timestamp,
    ) -> Result<AuditLogId, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "INSERT INTO audit_log (protocol_id, action, detail_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id_to_sql(protocol_id.get()), action, detail.to_string(), timestamp_to_text(now)],
        )?;
        AuditLogId::from_raw(sql_to_id(connection.last_insert_rowid())?)
            .ok_or_else(|| StoreError::Invalid("audit log id must be non-zero".to_owned()))
    }

    /// Loads the current (non-archived) batch row for `batch_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such batch exists, or
    /// [`StoreError::Db`]/[`StoreError::Serde`] on a malformed row.
    pub fn load_batch(&self, batch_id: BatchId) -> Result<CriteriaBatch, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let row = connection
            .query_row(
                "SELECT protocol_id, status, extraction_model, is_archived, created_at
                 FROM criteria_batches WHERE id = ?1",
                params![id_to_sql(batch_id.get())],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound { what: "criteria_batch", id: batch_id.to_string() })?;
        let (protocol_id, status, extraction_model, is_archived, created_at) = row;
        Ok(CriteriaBatch {
            id: batch_id,
            protocol_id: ProtocolId::from_raw(sql_to_id(protocol_id)?)
                .ok_or_else(|| StoreError::Invalid("stored protocol_id is zero".to_owned()))?,
            status: codec::text_to_batch_status(&status)?,
            extraction_model,
            is_archived,
            created_at: text_to_timestamp(&created_at)?,
        })
    }

    /// Lists every criterion belonging to `batch_id`, ordered by insertion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on a malformed row.
    pub fn list_criteria_for_batch(&self, batch_id: BatchId) -> Result<Vec<Criteria>, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut statement = connection.prepare(
            "SELECT id, criteria_type, category, text, structured_criterion, conditions,
                    confidence, assertion_status, source_section, page_number, review_status
             FROM criteria WHERE batch_id = ?1 ORDER BY id",
        )?;
        let rows = statement.query_map(params![id_to_sql(batch_id.get())], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<u32>>(9)?,
                row.get::<_, Option<String>>(10)?,
            ))
        })?;
        let mut criteria = Vec::new();
        for row in rows {
            let (
                id,
                criteria_type,
                category,
                text,
                structured_criterion,
                conditions,
                confidence,
                assertion_status,
                source_section,
                page_number,
                review_status,
            ) = row?;
            criteria.push(Criteria {
                id: CriterionId::from_raw(sql_to_id(id)?)
                    .ok_or_else(|| StoreError::Invalid("stored criterion id is zero".to_owned()))?,
                batch_id,
                criteria_type: codec::text_to_criteria_type(&criteria_type)?,
                category,
                text,
                structured_criterion: structured_criterion
                    .map(|value| serde_json::from_str(&value))
                    .transpose()?,
                conditions: conditions.map(|value| serde_json::from_str(&value)).transpose()?,
                confidence,
                assertion_status: codec::text_to_assertion_status(&assertion_status)?,
                source_section,
                page_number,
                review_status: review_status
                    .map(|value| codec::text_to_review_status(&value))
                    .transpose()?,
            });
        }
        Ok(criteria)
    }

    /// Lists every entity belonging to `criterion_id`, ordered by insertion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on a malformed row.
    pub fn list_entities_for_criterion(&self, criterion_id: CriterionId) -> Result<Vec<Entity>, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut statement = connection.prepare(
            "SELECT id, entity_type, text, span_start, span_end,
                    umls_cui, snomed_code, rxnorm_code, loinc_code, icd10_code, hpo_code,
                    grounding_confidence, grounding_method, context_window
             FROM entities WHERE criteria_id = ?1 ORDER BY id",
        )?;
        let rows = statement.query_map(params![id_to_sql(criterion_id.get())], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<u32>>(3)?,
                row.get::<_, Option<u32>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, f64>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, Option<String>>(13)?,
            ))
        })?;
        let mut entities = Vec::new();
        for row in rows {
            let (
                id,
                entity_type,
                text,
                span_start,
                span_end,
                umls_cui,
                snomed_code,
                rxnorm_code,
                loinc_code,
                icd10_code,
                hpo_code,
                grounding_confidence,
                grounding_method,
                context_window,
            ) = row?;
            entities.push(Entity {
                id: EntityId::from_raw(sql_to_id(id)?)
                    .ok_or_else(|| StoreError::Invalid("stored entity id is zero".to_owned()))?,
                criteria_id: criterion_id,
                entity_type: codec::text_to_entity_type(&entity_type)?,
                text,
                span_start,
                span_end,
                codes: CodeBindings { umls_cui, snomed_code, rxnorm_code, loinc_code, icd10_code, hpo_code },
                grounding_confidence,
                grounding_method: codec::text_to_grounding_method(&grounding_method)?,
                context_window,
            });
        }
        Ok(entities)
    }

    /// Writes back a grounding outcome onto a previously inserted entity row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on failure.
    pub fn update_entity_grounding(
        &self,
        entity_id: EntityId,
        codes: &CodeBindings,
        confidence: f64,
        method: GroundingMethod,
    ) -> Result<(), StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "UPDATE entities SET umls_cui = ?1, snomed_code = ?2, rxnorm_code = ?3, loinc_code = ?4,
                icd10_code = ?5, hpo_code = ?6, grounding_confidence = ?7, grounding_method = ?8
             WHERE id = ?9",
            params![
                codes.umls_cui,
                codes.snomed_code,
                codes.rxnorm_code,
                codes.loinc_code,
                codes.icd10_code,
                codes.hpo_code,
                confidence,
                codec::grounding_method_to_text(method),
                id_to_sql(entity_id.get()),
            ],
        )?;
        Ok(())
    }

    /// Writes grounding field mappings back onto `Criteria.conditions`, read
    /// by the structure node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on failure.
    pub fn update_criteria_conditions(
        &self,
        criterion_id: CriterionId,
        conditions: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "UPDATE criteria SET conditions = ?1 WHERE id = ?2",
            params![conditions.to_string(), id_to_sql(criterion_id.get())],
        )?;
        Ok(())
    }

    /// Commits the ground node's output for a protocol in one transaction:
    /// inserts the now-grounded `Entity` rows, writes back each touched
    /// criterion's field mappings, and transitions the protocol to
    /// `pending_review` or `grounding_failed`.
    ///
    /// `errors` is written onto `Protocol.metadata.errors[]` alongside the
    /// flattened `error_reason` string, per SPEC_FULL §7's "`error_reason` /
    /// `metadata.errors`" destinations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] if the protocol's current status
    /// cannot transition to `target`, or [`StoreError::Db`]/
    /// [`StoreError::Serde`] on any statement failure; the transaction rolls
    /// back on any error.
    pub fn persist_grounding_results(
        &self,
        protocol_id: ProtocolId,
        entities: &[Entity],
        condition_updates: &[(CriterionId, serde_json::Value)],
        target: ProtocolStatus,
        error_reason: Option<&str>,
        errors: &[String],
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tx = connection.transaction()?;

        let (current_status, metadata_json): (String, String) = tx.query_row(
            "SELECT status, metadata_json FROM protocols WHERE id = ?1",
            params![id_to_sql(protocol_id.get())],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let current = codec::text_to_protocol_status(&current_status)?;
        if !current.can_transition_to(target) {
            return Err(StoreError::Invalid(format!(
                "protocol {protocol_id} cannot transition from {current:?} to {target:?}"
            )));
        }
        let mut metadata: serde_json::Value = serde_json::from_str(&metadata_json)?;
        if let Some(object) = metadata.as_object_mut() {
            object.insert("errors".to_owned(), serde_json::json!(errors));
        }

        for entity in entities {
            tx.execute(
                "INSERT INTO entities (id, criteria_id, entity_type, text, span_start, span_end,
                    umls_cui, snomed_code, rxnorm_code, loinc_code, icd10_code, hpo_code,
                    grounding_confidence, grounding_method, context_window)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    id_to_sql(entity.id.get()),
                    id_to_sql(entity.criteria_id.get()),
                    codec::entity_type_to_text(entity.entity_type),
                    entity.text,
                    entity.span_start,
                    entity.span_end,
                    entity.codes.umls_cui,
                    entity.codes.snomed_code,
                    entity.codes.rxnorm_code,
                    entity.codes.loinc_code,
                    entity.codes.icd10_code,
                    entity.codes.hpo_code,
                    entity.grounding_confidence,
                    codec::grounding_method_to_text(entity.grounding_method),
                    entity.context_window,
                ],
            )?;
        }

        for (criterion_id, conditions) in condition_updates {
            tx.execute(
                "UPDATE criteria SET conditions = ?1 WHERE id = ?2",
                params![conditions.to_string(), id_to_sql(criterion_id.get())],
            )?;
        }

        tx.execute(
            "UPDATE protocols SET status = ?1, error_reason = ?2, metadata_json = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                codec::protocol_status_to_text(target),
                error_reason,
                metadata.to_string(),
                timestamp_to_text(now),
                id_to_sql(protocol_id.get()),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Sets a criterion's inherited reviewer disposition, carried over from
    /// an archived batch by canonical text match.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on failure.
    pub fn update_criteria_review_status(
        &self,
        criterion_id: CriterionId,
        status: ReviewStatus,
    ) -> Result<(), StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "UPDATE criteria SET review_status = ?1 WHERE id = ?2",
            params![codec::review_status_to_text(status), id_to_sql(criterion_id.get())],
        )?;
        Ok(())
    }

    /// Builds a `canonical_text -> review_status` map from every archived,
    /// reviewed criterion of `protocol_id`, built once per re-extraction so
    /// the structure/parse nodes never traverse batch history per criterion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on failure.
    pub fn reviewed_text_inheritance_map(
        &self,
        protocol_id: ProtocolId,
    ) -> Result<std::collections::HashMap<String, ReviewStatus>, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut statement = connection.prepare(
            "SELECT c.text, c.review_status FROM criteria c
             JOIN criteria_batches b ON b.id = c.batch_id
             WHERE b.protocol_id = ?1 AND b.is_archived = 1 AND c.review_status IS NOT NULL",
        )?;
        let rows = statement.query_map(params![id_to_sql(protocol_id.get())], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = std::collections::HashMap::new();
        for row in rows {
            let (text, status) = row?;
            map.insert(canonical_text(&text), codec::text_to_review_status(&status)?);
        }
        Ok(map)
    }

    /// Commits a criterion's full expression tree (atoms, composites, and
    /// parent-child edges) plus its `structured_criterion` snapshot in one
    /// transaction, replacing any tree previously written for the criterion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on failure.
    pub fn persist_structure_for_criterion(
        &self,
        criterion_id: CriterionId,
        snapshot: &serde_json::Value,
        atoms: &[AtomicCriterion],
        composites: &[CompositeCriterion],
        relationships: &[CriterionRelationship],
    ) -> Result<(), StoreError> {
        let mut connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tx = connection.transaction()?;

        tx.execute(
            "DELETE FROM criterion_relationships WHERE criterion_id = ?1",
            params![id_to_sql(criterion_id.get())],
        )?;
        tx.execute(
            "DELETE FROM atomic_criteria WHERE criterion_id = ?1",
            params![id_to_sql(criterion_id.get())],
        )?;
        tx.execute(
            "DELETE FROM composite_criteria WHERE criterion_id = ?1",
            params![id_to_sql(criterion_id.get())],
        )?;

        for atom in atoms {
            tx.execute(
                "INSERT INTO atomic_criteria (id, criterion_id, protocol_id, inclusion_exclusion,
                    entity_domain, entity_concept_id, entity_concept_system, relation_operator,
                    value_numeric, value_text, unit_text, unit_concept_id, negation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id_to_sql(atom.id.get()),
                    id_to_sql(atom.criterion_id.get()),
                    id_to_sql(atom.protocol_id.get()),
                    codec::criteria_type_to_text(atom.inclusion_exclusion),
                    atom.entity_domain,
                    atom.entity_concept_id,
                    atom.entity_concept_system,
                    codec::relation_operator_to_text(atom.relation_operator),
                    atom.value_numeric.as_ref().map(codec::decimal_to_text),
                    atom.value_text,
                    atom.unit_text,
                    atom.unit_concept_id,
                    atom.negation,
                ],
            )?;
        }
        for composite in composites {
            tx.execute(
                "INSERT INTO composite_criteria (id, criterion_id, protocol_id, logic_operator)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id_to_sql(composite.id.get()),
                    id_to_sql(composite.criterion_id.get()),
                    id_to_sql(composite.protocol_id.get()),
                    codec::logic_operator_to_text(composite.logic_operator),
                ],
            )?;
        }
        for edge in relationships {
            let (child_kind, child_id) = match edge.child {
                NodeId::Atom(atom_id) => ("atom", id_to_sql(atom_id.get())),
                NodeId::Composite(composite_id) => ("composite", id_to_sql(composite_id.get())),
            };
            tx.execute(
                "INSERT INTO criterion_relationships
                    (criterion_id, parent_id, child_kind, child_id, child_sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id_to_sql(edge.criterion_id.get()),
                    id_to_sql(edge.parent.get()),
                    child_kind,
                    child_id,
                    edge.child_sequence,
                ],
            )?;
        }
        tx.execute(
            "UPDATE criteria SET structured_criterion = ?1 WHERE id = ?2",
            params![snapshot.to_string(), id_to_sql(criterion_id.get())],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Lists every atomic criterion of `protocol_id` with no unit bound yet,
    /// the candidate set for the ordinal-resolve node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`]/[`StoreError::Serde`] on a malformed row.
    pub fn list_atoms_missing_unit(&self, protocol_id: ProtocolId) -> Result<Vec<AtomicCriterion>, StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut statement = connection.prepare(
            "SELECT id, criterion_id, inclusion_exclusion, entity_domain, entity_concept_id,
                    entity_concept_system, relation_operator, value_numeric, value_text,
                    unit_text, unit_concept_id, negation
             FROM atomic_criteria
             WHERE protocol_id = ?1 AND unit_text IS NULL AND unit_concept_id IS NULL
             ORDER BY id",
        )?;
        let rows = statement.query_map(params![id_to_sql(protocol_id.get())], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, bool>(11)?,
            ))
        })?;
        let mut atoms = Vec::new();
        for row in rows {
            let (
                id,
                criterion_id,
                inclusion_exclusion,
                entity_domain,
                entity_concept_id,
                entity_concept_system,
                relation_operator,
                value_numeric,
                value_text,
                unit_text,
                unit_concept_id,
                negation,
            ) = row?;
            atoms.push(AtomicCriterion {
                id: AtomId::from_raw(sql_to_id(id)?)
                    .ok_or_else(|| StoreError::Invalid("stored atom id is zero".to_owned()))?,
                criterion_id: CriterionId::from_raw(sql_to_id(criterion_id)?)
                    .ok_or_else(|| StoreError::Invalid("stored criterion id is zero".to_owned()))?,
                protocol_id,
                inclusion_exclusion: codec::text_to_criteria_type(&inclusion_exclusion)?,
                entity_domain,
                entity_concept_id,
                entity_concept_system,
                relation_operator: codec::text_to_relation_operator(&relation_operator)?,
                value_numeric: value_numeric.map(|value| codec::text_to_decimal(&value)).transpose()?,
                value_text,
                unit_text,
                unit_concept_id,
                negation,
            });
        }
        Ok(atoms)
    }

    /// Sets the canonical unit concept id an ordinal-resolve proposal
    /// recognized for `atom_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on failure.
    pub fn update_atom_unit_concept(&self, atom_id: AtomId, unit_concept_id: &str) -> Result<(), StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        connection.execute(
            "UPDATE atomic_criteria SET unit_concept_id = ?1 WHERE id = ?2",
            params![unit_concept_id, id_to_sql(atom_id.get())],
        )?;
        Ok(())
    }

    /// Enqueues a standalone trigger event (e.g. `protocol_uploaded`), outside
    /// the batch-centric [`Self::persist_batch_with_outbox`] path.
    ///
    /// # Invariants
    /// - `idempotency_key` is globally unique; a repeated key is a no-op that
    ///   returns `Ok(())` rather than an error, so a retried upload-confirm
    ///   call never enqueues a duplicate run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on any failure other than the unique-key
    /// conflict this method treats as a no-op.
    pub fn insert_trigger_event(
        &self,
        event_type: &str,
        aggregate_id: ProtocolId,
        idempotency_key: &str,
        payload: &serde_json::Value,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let connection = self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let result = connection.execute(
            "INSERT INTO outbox_events (event_type, aggregate_type, aggregate_id, payload_json,
                idempotency_key, status, retry_count, created_at, next_attempt_at)
             VALUES (?1, 'protocol', ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
            params![
                event_type,
                aggregate_id.get().to_string(),
                payload.to_string(),
                idempotency_key,
                timestamp_to_text(now),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(error, _))
                if error.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Normalizes criterion text for cross-batch review inheritance matching:
/// trims whitespace and lowercases, so trivial formatting differences
/// between extractions do not defeat the match.
#[must_use]
pub fn canonical_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Confirms every relationship edge in `write` references a node owned by a
/// criterion present in the same batch.
fn validate_relationships(write: &BatchWrite) -> Result<(), StoreError> {
    let criterion_ids: std::collections::HashSet<CriterionId> =
        write.criteria.iter().map(|criterion| criterion.id).collect();
    for edge in &write.relationships {
        if !criterion_ids.contains(&edge.criterion_id) {
            return Err(StoreError::Invalid(format!(
                "relationship edge references criterion {} outside this batch",
                edge.criterion_id
            )));
        }
    }
    Ok(())
}

/// Formats a [`Timestamp`] as RFC 3339 for storage.
pub(crate) fn timestamp_to_text(timestamp: Timestamp) -> String {
    timestamp
        .as_offset_date_time()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| timestamp.as_offset_date_time().to_string())
}

/// Parses a stored RFC 3339 timestamp.
pub(crate) fn text_to_timestamp(value: &str) -> Result<Timestamp, StoreError> {
    time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map(Timestamp::new)
        .map_err(|err| StoreError::Invalid(format!("invalid timestamp '{value}': {err}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions on constructed fixtures")]
mod tests {
    use criteriagate_core::AssertionStatus;
    use criteriagate_core::CriteriaType;
    use criteriagate_core::CriterionId;
    use rusqlite::params;
    use time::macros::datetime;

    use super::BatchWrite;
    use super::SqliteStore;
    use super::Timestamp;
    use super::timestamp_to_text;
    use crate::config::SqliteStoreConfig;

    fn store() -> SqliteStore {
        SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open in-memory store")
    }

    fn now() -> Timestamp {
        Timestamp::new(datetime!(2026 - 01 - 15 09:00:00 UTC))
    }

    #[test]
    fn insert_and_load_protocol_round_trips() {
        let store = store();
        let id = store.insert_protocol("Sample Protocol", "local://p/1.pdf", now()).unwrap();
        let loaded = store.load_protocol(id).unwrap();
        assert_eq!(loaded.title, "Sample Protocol");
        assert_eq!(loaded.status, criteriagate_core::ProtocolStatus::Uploaded);
    }

    #[test]
    fn transition_rejects_undocumented_jump() {
        let store = store();
        let id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        let result = store.transition_protocol_status(id, criteriagate_core::ProtocolStatus::Complete, None, now());
        assert!(result.is_err());
    }

    #[test]
    fn transition_allows_documented_edge() {
        let store = store();
        let id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        store
            .transition_protocol_status(id, criteriagate_core::ProtocolStatus::Extracting, None, now())
            .unwrap();
        let loaded = store.load_protocol(id).unwrap();
        assert_eq!(loaded.status, criteriagate_core::ProtocolStatus::Extracting);
    }

    #[test]
    fn persist_grounding_results_writes_metadata_errors() {
        let store = store();
        let protocol_id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        store.transition_protocol_status(protocol_id, criteriagate_core::ProtocolStatus::Extracting, None, now()).unwrap();
        store.transition_protocol_status(protocol_id, criteriagate_core::ProtocolStatus::Grounding, None, now()).unwrap();

        let errors = vec!["ground: entity 1:1 failed to reach a grounding decision".to_owned()];
        store
            .persist_grounding_results(
                protocol_id,
                &[],
                &[],
                criteriagate_core::ProtocolStatus::PendingReview,
                Some(errors.join("; ").as_str()),
                &errors,
                now(),
            )
            .unwrap();

        let loaded = store.load_protocol(protocol_id).unwrap();
        let recorded: Vec<String> = serde_json::from_value(loaded.metadata["errors"].clone()).unwrap();
        assert_eq!(recorded, errors);
    }

    #[test]
    fn access_protocol_leaves_fresh_failure_unarchived() {
        let store = store();
        let id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        store.transition_protocol_status(id, criteriagate_core::ProtocolStatus::Extracting, None, now()).unwrap();
        store
            .transition_protocol_status(
                id,
                criteriagate_core::ProtocolStatus::ExtractionFailed,
                Some("pdf_too_large"),
                now(),
            )
            .unwrap();
        let accessed = store.access_protocol(id, now(), time::Duration::days(7)).unwrap();
        assert_eq!(accessed.status, criteriagate_core::ProtocolStatus::ExtractionFailed);
    }

    #[test]
    fn access_protocol_archives_stale_failure() {
        let store = store();
        let id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        store.transition_protocol_status(id, criteriagate_core::ProtocolStatus::Extracting, None, now()).unwrap();
        store
            .transition_protocol_status(
                id,
                criteriagate_core::ProtocolStatus::ExtractionFailed,
                Some("pdf_too_large"),
                now(),
            )
            .unwrap();
        let much_later = Timestamp::new(now().as_offset_date_time() + time::Duration::days(8));
        let accessed = store.access_protocol(id, much_later, time::Duration::days(7)).unwrap();
        assert_eq!(accessed.status, criteriagate_core::ProtocolStatus::Archived);
    }

    #[test]
    fn access_protocol_archives_on_aged_dead_letter() {
        let store = store();
        let id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        store.transition_protocol_status(id, criteriagate_core::ProtocolStatus::Extracting, None, now()).unwrap();
        store
            .transition_protocol_status(
                id,
                criteriagate_core::ProtocolStatus::ExtractionFailed,
                Some("fetch_failed"),
                now(),
            )
            .unwrap();
        {
            let connection = store.connection.lock().unwrap();
            connection
                .execute(
                    "INSERT INTO outbox_events (event_type, aggregate_type, aggregate_id, payload_json,
                        idempotency_key, status, retry_count, created_at, next_attempt_at)
                     VALUES ('protocol_uploaded', 'protocol', ?1, '{}', 'k-dl', 'dead_letter', 3, ?2, ?2)",
                    params![id.get().to_string(), timestamp_to_text(now())],
                )
                .unwrap();
        }
        let much_later = Timestamp::new(now().as_offset_date_time() + time::Duration::days(8));
        let accessed = store.access_protocol(id, much_later, time::Duration::days(7)).unwrap();
        assert_eq!(accessed.status, criteriagate_core::ProtocolStatus::Archived);
    }

    #[test]
    fn persist_batch_rejects_edge_outside_batch() {
        let store = store();
        let protocol_id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        let criterion_id = CriterionId::from_raw(1).unwrap();
        let outside_id = CriterionId::from_raw(999).unwrap();
        let write = BatchWrite {
            protocol_id,
            extraction_model: "gpt-x".to_owned(),
            criteria: vec![criteriagate_core::Criteria {
                id: criterion_id,
                batch_id: criteriagate_core::BatchId::from_raw(1).unwrap(),
                criteria_type: CriteriaType::Inclusion,
                category: None,
                text: "Age >= 18".to_owned(),
                structured_criterion: None,
                conditions: None,
                confidence: 0.9,
                assertion_status: AssertionStatus::Present,
                source_section: None,
                page_number: None,
                review_status: None,
            }],
            entities: Vec::new(),
            atoms: Vec::new(),
            composites: Vec::new(),
            relationships: vec![criteriagate_core::CriterionRelationship {
                criterion_id: outside_id,
                parent: criteriagate_core::CompositeId::from_raw(1).unwrap(),
                child: criteriagate_core::NodeId::Atom(criteriagate_core::AtomId::from_raw(1).unwrap()),
                child_sequence: 0,
            }],
            event_type: "criteria_batch_ready".to_owned(),
            idempotency_key: "1:criteria_batch_ready:1".to_owned(),
            event_payload: serde_json::json!({"protocol_id": 1}),
        };
        assert!(store.persist_batch_with_outbox(&write, now()).is_err());
    }

    #[test]
    fn checkpoint_round_trips() {
        let store = store();
        let protocol_id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        let state = criteriagate_core::PipelineState::new(
            protocol_id,
            "local://p/1.pdf".to_owned(),
            "Sample".to_owned(),
        );
        store.save_checkpoint("thread-1", &state, now()).unwrap();
        let loaded = store.load_checkpoint(protocol_id, "thread-1").unwrap().unwrap();
        assert_eq!(loaded.protocol_id, protocol_id);
        assert!(loaded.pdf_bytes.is_none());
    }

    #[test]
    fn load_checkpoint_returns_none_when_absent() {
        let store = store();
        let protocol_id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        assert!(store.load_checkpoint(protocol_id, "missing-thread").unwrap().is_none());
    }

    #[test]
    fn repeated_trigger_insert_with_same_key_is_a_no_op() {
        let store = store();
        let protocol_id = store.insert_protocol("Sample", "local://p/1.pdf", now()).unwrap();
        let payload = serde_json::json!({"protocol_id": protocol_id.get(), "file_uri": "local://p/1.pdf"});
        let key = format!("{}:protocol_uploaded", protocol_id.get());
        store.insert_trigger_event("protocol_uploaded", protocol_id, &key, &payload, now()).unwrap();
        store.insert_trigger_event("protocol_uploaded", protocol_id, &key, &payload, now()).unwrap();

        let connection = store.connection.lock().unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM outbox_events WHERE idempotency_key = ?1", params![key], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
