// crates/criteriagate-pipeline/src/deps.rs
// ============================================================================
// Module: CriteriaGate Pipeline Dependencies
// Description: The shared, process-wide handles every node reads from.
// Purpose: Build the resilience wrappers, concurrency caps, and caches once
//          from `PipelineConfig` at startup instead of per pipeline run.
// Dependencies: criteriagate-config, criteriagate-core, criteriagate-providers,
//               criteriagate-resilience, criteriagate-store-sqlite
// ============================================================================

//! ## Overview
//! [`PipelineDeps`] is constructed once per process and shared via `Arc`
//! across every protocol the pipeline ingests. It bundles the durable
//! store, the tuning knobs from [`PipelineConfig`], the capability
//! endpoints (blob storage, the LLM roster, the terminology router), and
//! the resilience primitives (circuit breakers, a terminology result
//! cache, and per-stage concurrency semaphores) those endpoints are called
//! through. Constructing these once, rather than per run, is what lets the
//! circuit breakers and cache actually accumulate state across protocols.

use std::num::NonZeroUsize;
use std::sync::Arc;

use criteriagate_config::PipelineConfig;
use criteriagate_core::BlobStore;
use criteriagate_providers::RoutedCandidate;
use criteriagate_providers::TerminologyRouter;
use criteriagate_resilience::BoundedSemaphore;
use criteriagate_resilience::CircuitBreaker;
use criteriagate_resilience::CircuitBreakerConfig;
use criteriagate_resilience::TtlCache;
use criteriagate_store_sqlite::SqliteStore;

use crate::ids::IdAllocator;
use crate::roster::LlmRoster;

/// Everything a pipeline run needs beyond the `PipelineState` it is
/// threading through: the store, tuning, and every external capability
/// behind its resilience wrapper.
#[derive(Clone)]
pub struct PipelineDeps {
    /// Durable store for protocols, criteria, entities, checkpoints, and
    /// the outbox.
    pub store: SqliteStore,
    /// Tuning knobs loaded once at startup.
    pub config: PipelineConfig,
    /// Fetches protocol PDF bytes.
    pub blob_store: Arc<dyn BlobStore>,
    /// The four structured-LLM roles.
    pub llm: LlmRoster,
    /// Fans a single entity lookup out across a vocabulary's provider list.
    pub router: Arc<TerminologyRouter>,
    /// Client-side primary key allocator for non-auto-incrementing rows.
    pub ids: Arc<IdAllocator>,
    /// Short-lived cache of terminology search results, keyed by provider,
    /// entity type, and normalized mention text.
    pub terminology_cache: Arc<TtlCache<Vec<RoutedCandidate>>>,
    /// Trips when the blob store fails repeatedly.
    pub blob_breaker: Arc<CircuitBreaker>,
    /// Trips when the LLM roster's endpoints fail repeatedly.
    pub llm_breaker: Arc<CircuitBreaker>,
    /// Trips when terminology providers fail repeatedly.
    pub provider_breaker: Arc<CircuitBreaker>,
    /// Bounds how many entities the ground node resolves concurrently.
    pub ground_semaphore: Arc<BoundedSemaphore>,
    /// Bounds how many criteria the structure node decomposes concurrently.
    pub structure_semaphore: Arc<BoundedSemaphore>,
}

impl PipelineDeps {
    /// Builds the shared dependency bundle from `config`, constructing the
    /// resilience wrappers and caches it describes.
    #[must_use]
    pub fn new(
        store: SqliteStore,
        config: PipelineConfig,
        blob_store: Arc<dyn BlobStore>,
        llm: LlmRoster,
        router: Arc<TerminologyRouter>,
        ids: Arc<IdAllocator>,
    ) -> Self {
        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.circuit_failure_threshold,
            open_duration: config.circuit_window,
        };
        let cache_capacity =
            NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let terminology_cache = Arc::new(TtlCache::new(cache_capacity, config.cache_ttl));
        Self {
            store,
            blob_store,
            llm,
            router,
            ids,
            terminology_cache,
            blob_breaker: Arc::new(CircuitBreaker::new(breaker_config)),
            llm_breaker: Arc::new(CircuitBreaker::new(breaker_config)),
            provider_breaker: Arc::new(CircuitBreaker::new(breaker_config)),
            ground_semaphore: Arc::new(BoundedSemaphore::new(config.ground_concurrency)),
            structure_semaphore: Arc::new(BoundedSemaphore::new(config.structure_concurrency)),
            config,
        }
    }
}
