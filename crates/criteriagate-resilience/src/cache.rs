// crates/criteriagate-resilience/src/cache.rs
// ============================================================================
// Module: CriteriaGate Resilience Cache
// Description: Bounded, TTL-expiring LRU cache for terminology lookups.
// Purpose: Avoid re-querying a terminology provider for the same entity
//          mention within a short window, without growing without bound.
// Dependencies: lru, tokio, criteriagate_core
// ============================================================================

//! ## Overview
//! Entries are keyed by `(provider, entity_type, normalized_text)` so two
//! different providers, or the same text under two different entity types,
//! never collide. Capacity eviction is least-recently-used; independent of
//! that, an entry older than `ttl` is treated as absent and removed on next
//! lookup rather than returned stale.

use std::num::NonZeroUsize;
use std::time::Duration;
use std::time::Instant;

use criteriagate_core::EntityType;
use lru::LruCache;
use tokio::sync::Mutex;

/// Identifies one cacheable terminology lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    provider: String,
    entity_type: EntityType,
    normalized_text: String,
}

impl CacheKey {
    /// Builds a key from a provider name, entity type, and mention text.
    /// The text is lowercased and trimmed so trivially different renderings
    /// of the same mention share one cache entry.
    #[must_use]
    pub fn new(provider: impl Into<String>, entity_type: EntityType, mention_text: &str) -> Self {
        Self { provider: provider.into(), entity_type, normalized_text: mention_text.trim().to_lowercase() }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A bounded, TTL-expiring LRU cache guarded by a single mutex.
pub struct TtlCache<V> {
    inner: Mutex<LruCache<CacheKey, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// Builds a cache holding at most `capacity` entries, each valid for
    /// `ttl` from insertion.
    #[must_use]
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self { inner: Mutex::new(LruCache::new(capacity)), ttl }
    }

    /// Builds a cache with the default 5 minute time-to-live.
    #[must_use]
    pub fn with_default_ttl(capacity: NonZeroUsize) -> Self {
        Self::new(capacity, Duration::from_secs(5 * 60))
    }

    /// Returns the cached value for `key`, if present and not expired. An
    /// expired entry is evicted as a side effect of the lookup.
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        let mut guard = self.inner.lock().await;
        let expired = matches!(guard.peek(key), Some(entry) if entry.inserted_at.elapsed() >= self.ttl);
        if expired {
            guard.pop(key);
            return None;
        }
        guard.get(key).map(|entry| entry.value.clone())
    }

    /// Inserts or replaces the cached value for `key`, resetting its TTL
    /// clock and touching its LRU recency.
    pub async fn put(&self, key: CacheKey, value: V) {
        let mut guard = self.inner.lock().await;
        guard.put(key, Entry { value, inserted_at: Instant::now() });
    }

    /// Number of entries currently held, including any not yet recognized
    /// as expired.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Reports whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions on constructed fixtures")]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = TtlCache::with_default_ttl(NonZeroUsize::new(4).unwrap());
        let key = CacheKey::new("snomed", EntityType::Condition, "  Hypertension ");
        cache.put(key.clone(), 7u32).await;
        assert_eq!(cache.get(&key).await, Some(7));
    }

    #[tokio::test]
    async fn normalization_collapses_case_and_whitespace_variants() {
        let cache = TtlCache::with_default_ttl(NonZeroUsize::new(4).unwrap());
        let key_a = CacheKey::new("snomed", EntityType::Condition, "Hypertension");
        let key_b = CacheKey::new("snomed", EntityType::Condition, " hypertension  ");
        cache.put(key_a, 1u32).await;
        assert_eq!(cache.get(&key_b).await, Some(1));
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache: TtlCache<u32> = TtlCache::new(NonZeroUsize::new(4).unwrap(), Duration::from_millis(5));
        let key = CacheKey::new("snomed", EntityType::Condition, "fever");
        cache.put(key.clone(), 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&key).await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn capacity_eviction_drops_least_recently_used() {
        let cache = TtlCache::with_default_ttl(NonZeroUsize::new(2).unwrap());
        let a = CacheKey::new("snomed", EntityType::Condition, "a");
        let b = CacheKey::new("snomed", EntityType::Condition, "b");
        let c = CacheKey::new("snomed", EntityType::Condition, "c");
        cache.put(a.clone(), 1u32).await;
        cache.put(b.clone(), 2u32).await;
        cache.put(c.clone(), 3u32).await;
        assert_eq!(cache.get(&a).await, None);
        assert_eq!(cache.get(&b).await, Some(2));
        assert_eq!(cache.get(&c).await, Some(3));
    }
}
