// crates/criteriagate-pipeline/src/runtime.rs
// ============================================================================
// Module: CriteriaGate Pipeline Runtime
// Description: Sequences the seven nodes, checkpointing after each and
//              routing to `END` the moment a node records a fatal error.
// Purpose: The single place that knows the node order and the
//          checkpoint-after-every-node contract; nodes themselves never
//          call each other.
// Dependencies: criteriagate-core, criteriagate-store-sqlite, tracing
// ============================================================================

//! ## Overview
//! `run_pipeline` threads a [`PipelineState`] through `ingest -> extract ->
//! parse -> ground -> persist -> structure -> ordinal_resolve -> END`. After
//! every node it writes a checkpoint keyed by `protocol_id +
//! pipeline_thread_id` with [`PipelineState::for_checkpoint`] (PDF bytes
//! stripped), then checks `should_halt`: a non-empty `error` is a
//! conditional edge straight to `END`, regardless of which node set it. A
//! crashed run resumes from the last successful node by loading its
//! checkpoint instead of constructing a fresh state.

use criteriagate_core::PipelineState;
use tracing::Instrument;
use tracing::info;
use tracing::info_span;

use crate::deps::PipelineDeps;
use crate::error::PipelineError;
use crate::nodes;

/// Default checkpoint thread id for a run triggered directly from the
/// outbox, as opposed to a resumed or manually retried one.
pub const DEFAULT_THREAD_ID: &str = "default";

/// Runs every node in order starting from `state`, checkpointing after each
/// one under `thread_id` and stopping the moment a node's returned state
/// reports [`PipelineState::should_halt`].
///
/// # Errors
///
/// Returns [`PipelineError`] only for an infrastructure failure a node or
/// the checkpoint write itself could not recover from; every business
/// outcome (extraction failure, grounding failure, a skipped criterion) is
/// captured on the returned [`PipelineState`] instead.
pub async fn run_pipeline(
    mut state: PipelineState,
    thread_id: &str,
    deps: &PipelineDeps,
) -> Result<PipelineState, PipelineError> {
    let span = info_span!("pipeline_run", protocol_id = state.protocol_id.get(), thread_id);
    async move {
        type NodeFn = for<'a> fn(
            PipelineState,
            &'a PipelineDeps,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<PipelineState, PipelineError>> + Send + 'a>>;

        let graph: [(&str, NodeFn); 7] = [
            ("ingest", |s, d| Box::pin(nodes::ingest::run(s, d))),
            ("extract", |s, d| Box::pin(nodes::extract::run(s, d))),
            ("parse", |s, d| Box::pin(nodes::parse::run(s, d))),
            ("ground", |s, d| Box::pin(nodes::ground::run(s, d))),
            ("persist", |s, d| Box::pin(nodes::persist::run(s, d))),
            ("structure", |s, d| Box::pin(nodes::structure::run(s, d))),
            ("ordinal_resolve", |s, d| Box::pin(nodes::ordinal_resolve::run(s, d))),
        ];

        for (name, node) in graph {
            state = node(state, deps).await?;

            let store = deps.store.clone();
            let checkpoint = state.for_checkpoint();
            let thread = thread_id.to_owned();
            let now = nodes::now();
            crate::blocking::store_call(move || store.save_checkpoint(&thread, &checkpoint, now)).await?;

            if state.should_halt() {
                info!(node = name, error = state.error.as_deref(), "pipeline run halted");
                return Ok(state);
            }
        }

        info!("pipeline run reached END");
        Ok(state)
    }
    .instrument(span)
    .await
}

/// Resumes a run from its last checkpoint under `thread_id`, or starts a
/// fresh run from `initial` when no checkpoint exists.
///
/// # Errors
///
/// Returns [`PipelineError`] for the same reasons as [`run_pipeline`], plus
/// a checkpoint read failure.
pub async fn resume_or_start(
    initial: PipelineState,
    thread_id: &str,
    deps: &PipelineDeps,
) -> Result<PipelineState, PipelineError> {
    let store = deps.store.clone();
    let protocol_id = initial.protocol_id;
    let thread = thread_id.to_owned();
    let checkpoint = crate::blocking::store_call(move || store.load_checkpoint(protocol_id, &thread)).await?;
    let state = checkpoint.unwrap_or(initial);
    run_pipeline(state, thread_id, deps).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted to unwrap.")]

    use std::sync::Arc;

    use async_trait::async_trait;
    use criteriagate_config::PipelineConfig;
    use criteriagate_core::BlobStore;
    use criteriagate_core::ClassifiedError;
    use criteriagate_core::LlmMessage;
    use criteriagate_core::PermanentError;
    use criteriagate_core::PipelineState;
    use criteriagate_core::StructuredLlm;
    use criteriagate_providers::RoutingTable;
    use criteriagate_providers::TerminologyRouter;
    use criteriagate_store_sqlite::SqliteStore;
    use criteriagate_store_sqlite::SqliteStoreConfig;
    use serde_json::Value;

    use super::DEFAULT_THREAD_ID;
    use super::run_pipeline;
    use crate::deps::PipelineDeps;
    use crate::ids::IdAllocator;
    use crate::roster::LlmRoster;

    struct AlwaysFailsBlob;

    #[async_trait]
    impl BlobStore for AlwaysFailsBlob {
        async fn fetch(&self, _uri: &str) -> Result<Vec<u8>, ClassifiedError> {
            Err(PermanentError::new("no such object").into())
        }
    }

    struct UnusedLlm;

    #[async_trait]
    impl StructuredLlm for UnusedLlm {
        async fn call(&self, _schema: &Value, _messages: &[LlmMessage]) -> Result<Value, ClassifiedError> {
            Err(PermanentError::new("unused in this test").into())
        }
    }

    fn deps() -> PipelineDeps {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).unwrap();
        let router = Arc::new(TerminologyRouter::new(RoutingTable::default_table(), std::collections::BTreeMap::new()));
        let ids = Arc::new(IdAllocator::new(nodes_now()));
        PipelineDeps::new(store, PipelineConfig::default(), Arc::new(AlwaysFailsBlob), LlmRoster::uniform(Arc::new(UnusedLlm)), router, ids)
    }

    fn nodes_now() -> criteriagate_core::Timestamp {
        crate::nodes::now()
    }

    #[tokio::test]
    async fn a_fatal_ingest_failure_halts_the_run_at_the_first_node() {
        let deps = deps();
        let protocol_id = deps.store.insert_protocol("Sample", "local://p.pdf", nodes_now()).unwrap();
        let state = PipelineState::new(protocol_id, "local://p.pdf".to_owned(), "Sample".to_owned());
        let result = run_pipeline(state, DEFAULT_THREAD_ID, &deps).await.unwrap();
        assert!(result.should_halt());
        assert_eq!(result.status, "uploaded", "ingest never advanced status past its own fatal failure");
    }

    #[tokio::test]
    async fn a_halted_run_still_writes_a_checkpoint() {
        let deps = deps();
        let protocol_id = deps.store.insert_protocol("Sample", "local://p.pdf", nodes_now()).unwrap();
        let state = PipelineState::new(protocol_id, "local://p.pdf".to_owned(), "Sample".to_owned());
        run_pipeline(state, DEFAULT_THREAD_ID, &deps).await.unwrap();
        let checkpoint = deps.store.load_checkpoint(protocol_id, DEFAULT_THREAD_ID).unwrap();
        assert!(checkpoint.is_some());
    }
}
