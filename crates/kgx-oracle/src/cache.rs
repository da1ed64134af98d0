//! Result cache for oracle answers
//!
//! Two tiers sit in front of the oracle client:
//! - an in-process moka cache with bounded capacity and TTL
//! - an optional shared tier behind the [`SharedCache`] trait
//!
//! Keys are content addressed (`{prefix}{kind}:{sha256(text)}`), so the
//! same text extracted with the same kind is only sent to the oracle once.
//! Shared tier failures are logged and treated as misses.
//!
//! Author: hephaex@gmail.com

use kgx_core::{CacheConfig, ExtractionKind, SharedCache};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a single shared tier operation
const SHARED_TIER_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Result Cache
// ============================================================================

/// Two-tier cache of oracle JSON payloads
#[derive(Clone)]
pub struct ResultCache {
    local: Cache<String, String>,
    shared: Option<Arc<dyn SharedCache>>,
    shared_ttl: Duration,
    key_prefix: String,
    stats: Arc<CacheStats>,
}

impl ResultCache {
    /// Create a local-only cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a local-only cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let local = Cache::builder()
            .max_capacity(config.local_max_capacity)
            .time_to_live(Duration::from_secs(config.local_ttl_secs))
            .build();

        Self {
            local,
            shared: None,
            shared_ttl: Duration::from_secs(config.shared_ttl_secs),
            key_prefix: config.key_prefix.clone(),
            stats: Arc::new(CacheStats::new("oracle_results")),
        }
    }

    /// Attach a shared tier
    pub fn with_shared(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Cache key for a text and kind
    pub fn key(&self, text: &str, kind: ExtractionKind) -> String {
        format!("{}{}:{}", self.key_prefix, kind, hash_text(text))
    }

    /// Look up a payload, promoting shared tier hits into the local tier
    pub async fn get(&self, text: &str, kind: ExtractionKind) -> Option<String> {
        let key = self.key(text, kind);

        if let Some(value) = self.local.get(&key).await {
            self.stats.record_local_hit();
            debug!(key = %key, "Result cache hit (local)");
            return Some(value);
        }

        if let Some(value) = self.shared_get(&key).await {
            self.stats.record_shared_hit();
            debug!(key = %key, "Result cache hit (shared), promoting");
            self.local.insert(key, value.clone()).await;
            return Some(value);
        }

        self.stats.record_miss();
        None
    }

    /// Store a payload in both tiers
    pub async fn put(&self, text: &str, kind: ExtractionKind, value: &str) {
        let key = self.key(text, kind);
        self.local.insert(key.clone(), value.to_string()).await;
        self.stats.record_write();

        if let Some(shared) = &self.shared {
            let write = shared.put(&key, value, self.shared_ttl);
            match tokio::time::timeout(SHARED_TIER_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.record_shared_error();
                    warn!(cache = shared.name(), error = %e, "Shared cache write failed");
                }
                Err(_) => {
                    self.stats.record_shared_error();
                    warn!(cache = shared.name(), "Shared cache write timed out");
                }
            }
        }
    }

    /// Remove an entry from the local tier
    pub async fn invalidate(&self, text: &str, kind: ExtractionKind) {
        let key = self.key(text, kind);
        self.local.invalidate(&key).await;
        self.stats.record_invalidation();
    }

    /// Clear the local tier
    pub async fn clear(&self) {
        self.local.invalidate_all();
        // Wait for all pending invalidations to complete
        self.local.run_pending_tasks().await;
        self.stats.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current local tier size
    pub fn entry_count(&self) -> u64 {
        self.local.entry_count()
    }

    async fn shared_get(&self, key: &str) -> Option<String> {
        let shared = self.shared.as_ref()?;
        match tokio::time::timeout(SHARED_TIER_TIMEOUT, shared.get(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.stats.record_shared_error();
                warn!(
                    cache = shared.name(),
                    error = %e,
                    "Shared cache read failed, treating as miss"
                );
                None
            }
            Err(_) => {
                self.stats.record_shared_error();
                warn!(cache = shared.name(), "Shared cache read timed out, treating as miss");
                None
            }
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    /// Cache name for identification
    name: String,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    shared_errors: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_hits: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            shared_errors: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_shared_error(&self) {
        self.shared_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.local_hits,
            &self.shared_hits,
            &self.misses,
            &self.writes,
            &self.shared_errors,
            &self.invalidations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hits from either tier
    pub fn hits(&self) -> u64 {
        self.local_hits() + self.shared_hits()
    }

    pub fn local_hits(&self) -> u64 {
        self.local_hits.load(Ordering::Relaxed)
    }

    pub fn shared_hits(&self) -> u64 {
        self.shared_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn shared_errors(&self) -> u64 {
        self.shared_errors.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Get total requests (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate in [0, 1]; 0 when nothing was requested yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Snapshot for serialization
    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            local_hits: self.local_hits(),
            shared_hits: self.shared_hits(),
            misses: self.misses(),
            writes: self.writes(),
            shared_errors: self.shared_errors(),
            invalidations: self.invalidations(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub shared_errors: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
}

/// Stable content hash used in cache keys
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kgx_core::{KgxError, Result};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MapSharedCache {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl SharedCache for MapSharedCache {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn put(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
            self.entries
                .lock()
                .await
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "map"
        }
    }

    struct DownSharedCache;

    #[async_trait]
    impl SharedCache for DownSharedCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(KgxError::CacheError("connection refused".into()))
        }

        async fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(KgxError::CacheError("connection refused".into()))
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    #[tokio::test]
    async fn test_local_roundtrip_and_stats() {
        let cache = ResultCache::new();

        assert!(cache.get("小明是学生", ExtractionKind::Triples).await.is_none());
        cache
            .put("小明是学生", ExtractionKind::Triples, r#"{"triples":[]}"#)
            .await;
        let value = cache.get("小明是学生", ExtractionKind::Triples).await;

        assert_eq!(value.as_deref(), Some(r#"{"triples":[]}"#));
        let stats = cache.stats();
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.local_hits(), 1);
        assert_eq!(stats.writes(), 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_kind_is_part_of_key() {
        let cache = ResultCache::new();
        cache.put("text", ExtractionKind::Work, "{}").await;

        assert!(cache.get("text", ExtractionKind::Event).await.is_none());
        assert!(cache.get("text", ExtractionKind::Work).await.is_some());
        assert_ne!(
            cache.key("text", ExtractionKind::Work),
            cache.key("text", ExtractionKind::Event)
        );
    }

    #[tokio::test]
    async fn test_shared_hit_promotes_to_local() {
        let shared = Arc::new(MapSharedCache::default());
        let writer = ResultCache::new().with_shared(shared.clone());
        writer.put("doc", ExtractionKind::Triples, "{\"a\":1}").await;

        // a second process sharing the tier but with a cold local cache
        let reader = ResultCache::new().with_shared(shared);
        assert_eq!(
            reader.get("doc", ExtractionKind::Triples).await.as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(reader.stats().shared_hits(), 1);

        reader.get("doc", ExtractionKind::Triples).await;
        assert_eq!(reader.stats().local_hits(), 1);
    }

    #[tokio::test]
    async fn test_shared_failure_degrades_to_miss() {
        let cache = ResultCache::new().with_shared(Arc::new(DownSharedCache));

        assert!(cache.get("doc", ExtractionKind::Triples).await.is_none());
        cache.put("doc", ExtractionKind::Triples, "{}").await;
        assert!(cache.get("doc", ExtractionKind::Triples).await.is_some());

        assert_eq!(cache.stats().shared_errors(), 2);
    }

    #[tokio::test]
    async fn test_clear_and_invalidate() {
        let cache = ResultCache::new();
        cache.put("one", ExtractionKind::Triples, "{}").await;
        cache.put("two", ExtractionKind::Triples, "{}").await;

        cache.invalidate("one", ExtractionKind::Triples).await;
        assert!(cache.get("one", ExtractionKind::Triples).await.is_none());
        assert_eq!(cache.stats().invalidations(), 1);

        cache.clear().await;
        assert!(cache.get("two", ExtractionKind::Triples).await.is_none());
    }

    #[test]
    fn test_hash_text_is_stable_hex() {
        let hash = hash_text("consistent text");
        assert_eq!(hash, hash_text("consistent text"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_uses_prefix() {
        let cache = ResultCache::new();
        assert!(cache
            .key("x", ExtractionKind::Celebrity)
            .starts_with("extract:v4:celebrity:"));
    }
}
