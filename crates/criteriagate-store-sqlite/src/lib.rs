// crates/criteriagate-store-sqlite/src/lib.rs
// ============================================================================
// Module: CriteriaGate SQLite Store Library
// Description: Durable persistence for the protocol ingestion pipeline,
//              backed by SQLite.
// Purpose: Provide production-grade storage for the domain model, the
//          transactional outbox, and pipeline checkpoints.
// Dependencies: criteriagate_core, criteriagate_outbox, rusqlite
// ============================================================================

//! ## Overview
//! This crate persists the full `CriteriaGate` domain model ([`Protocol`],
//! [`CriteriaBatch`], [`Criteria`], entities, and expression-tree nodes), the
//! transactional outbox table, and pipeline checkpoints behind a single
//! mutex-guarded [`rusqlite::Connection`]. Every aggregate write that must
//! announce itself downstream commits in the same transaction as its outbox
//! row via [`store::BatchWrite`].
//!
//! [`Protocol`]: criteriagate_core::Protocol
//! [`CriteriaBatch`]: criteriagate_core::CriteriaBatch
//! [`Criteria`]: criteriagate_core::Criteria

// ============================================================================
// SECTION: Modules
// ============================================================================

mod codec;
pub mod config;
pub mod error;
mod outbox_store;
pub mod schema;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::SqliteJournalMode;
pub use config::SqliteStoreConfig;
pub use config::SqliteSyncMode;
pub use error::StoreError;
pub use schema::SCHEMA_VERSION;
pub use schema::initialize_schema;
pub use store::BatchWrite;
pub use store::SqliteStore;
pub use store::canonical_text;
