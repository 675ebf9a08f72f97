//! LRU cache with version-based invalidation
//!
//! Keyed by `(repo, logical key, version)`. A lookup for a different version
//! of the same logical key is a miss by construction, so stale values can
//! never leak across versions. Eviction kicks in when either the entry cap
//! or the byte cap is exceeded; `has()` peeks without touching recency.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CacheConfig;

/// Size estimate used by the byte cap.
pub trait EstimateSize {
    fn estimated_size_bytes(&self) -> usize;
}

impl EstimateSize for String {
    fn estimated_size_bytes(&self) -> usize {
        self.len()
    }
}

impl EstimateSize for crate::shared::models::SymbolCard {
    fn estimated_size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(256)
    }
}

/// Cache invalidation seam, implemented by every cache the pipeline must
/// flush on a version commit.
pub trait Invalidate: Send + Sync {
    fn invalidate_version(&self, version: i64);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repo_id: String,
    pub logical_key: String,
    pub version: i64,
}

impl CacheKey {
    pub fn new(repo_id: impl Into<String>, logical_key: impl Into<String>, version: i64) -> Self {
        Self {
            repo_id: repo_id.into(),
            logical_key: logical_key.into(),
            version,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    pub bytes: u64,
}

struct Entry<T> {
    value: Arc<T>,
    size: usize,
}

struct Inner<T> {
    lru: LruCache<CacheKey, Entry<T>>,
    bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded in-memory cache for slice results and symbol cards.
pub struct VersionedCache<T: EstimateSize> {
    inner: Mutex<Inner<T>>,
    max_entries: usize,
    max_bytes: u64,
}

impl<T: EstimateSize> VersionedCache<T> {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.max_size_bytes)
    }

    /// Lookup; a hit refreshes recency.
    pub fn get(&self, repo_id: &str, logical_key: &str, version: i64) -> Option<Arc<T>> {
        let key = CacheKey::new(repo_id, logical_key, version);
        let mut inner = self.inner.lock();
        match inner.lru.get(&key) {
            Some(entry) => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Presence check; never counts as an access.
    pub fn has(&self, repo_id: &str, logical_key: &str, version: i64) -> bool {
        let key = CacheKey::new(repo_id, logical_key, version);
        self.inner.lock().lru.contains(&key)
    }

    pub fn set(&self, repo_id: &str, logical_key: &str, version: i64, value: T) {
        let size = value.estimated_size_bytes();
        let key = CacheKey::new(repo_id, logical_key, version);
        let mut inner = self.inner.lock();

        if let Some(old) = inner.lru.pop(&key) {
            inner.bytes -= old.size as u64;
        }
        inner.lru.put(
            key,
            Entry {
                value: Arc::new(value),
                size,
            },
        );
        inner.bytes += size as u64;

        while inner.lru.len() > self.max_entries || inner.bytes > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => {
                    inner.bytes -= evicted.size as u64;
                    inner.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// O(n) purge of every entry stored under `version`.
    pub fn invalidate_version_entries(&self, version: i64) {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .lru
            .iter()
            .filter(|(key, _)| key.version == version)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(entry) = inner.lru.pop(&key) {
                inner.bytes -= entry.size as u64;
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entry_count: inner.lru.len(),
            bytes: inner.bytes,
        }
    }

    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    /// Entry cap as configured (handy for introspection in tests).
    pub fn capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

impl<T: EstimateSize + Send + Sync> Invalidate for VersionedCache<T> {
    fn invalidate_version(&self, version: i64) {
        self.invalidate_version_entries(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache: VersionedCache<String> = VersionedCache::new(8, u64::MAX);
        cache.set("r1", "k1", 1, "A".to_string());

        assert_eq!(cache.get("r1", "k1", 1).as_deref(), Some(&"A".to_string()));
        assert!(cache.get("r1", "k2", 1).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cross_version_is_a_miss() {
        let cache: VersionedCache<String> = VersionedCache::new(8, u64::MAX);
        cache.set("r1", "k1", 1, "A".to_string());
        assert!(cache.get("r1", "k1", 2).is_none());
    }

    #[test]
    fn test_lru_eviction_on_entry_cap() {
        let cache: VersionedCache<String> = VersionedCache::new(2, u64::MAX);
        cache.set("r1", "k1", 1, "A".to_string());
        cache.set("r1", "k2", 1, "B".to_string());
        cache.set("r1", "k3", 1, "C".to_string());

        // k1 was least recently used
        assert!(cache.get("r1", "k1", 1).is_none());
        assert!(cache.get("r1", "k2", 1).is_some());
        assert!(cache.get("r1", "k3", 1).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency_but_has_does_not() {
        let cache: VersionedCache<String> = VersionedCache::new(2, u64::MAX);
        cache.set("r1", "k1", 1, "A".to_string());
        cache.set("r1", "k2", 1, "B".to_string());

        // touch k1 so k2 becomes the eviction candidate
        cache.get("r1", "k1", 1);
        cache.set("r1", "k3", 1, "C".to_string());
        assert!(cache.has("r1", "k1", 1));
        assert!(!cache.has("r1", "k2", 1));

        // has() must not refresh: peeking k3 then inserting evicts k3's
        // elder, not the peeked key's elder.
        let cache2: VersionedCache<String> = VersionedCache::new(2, u64::MAX);
        cache2.set("r1", "a", 1, "A".to_string());
        cache2.set("r1", "b", 1, "B".to_string());
        assert!(cache2.has("r1", "a", 1));
        cache2.set("r1", "c", 1, "C".to_string());
        // a stays LRU despite the has() peek
        assert!(!cache2.has("r1", "a", 1));
    }

    #[test]
    fn test_byte_cap_eviction() {
        let cache: VersionedCache<String> = VersionedCache::new(100, 10);
        cache.set("r1", "k1", 1, "123456".to_string());
        cache.set("r1", "k2", 1, "123456".to_string());

        // 12 bytes > 10: k1 evicted
        assert!(!cache.has("r1", "k1", 1));
        assert!(cache.has("r1", "k2", 1));
        assert!(cache.stats().bytes <= 10);
    }

    #[test]
    fn test_invalidate_version() {
        let cache: VersionedCache<String> = VersionedCache::new(8, u64::MAX);
        cache.set("r1", "k1", 1, "A".to_string());
        cache.set("r1", "k2", 1, "B".to_string());
        cache.set("r1", "k3", 2, "C".to_string());

        cache.invalidate_version_entries(1);

        assert!(!cache.has("r1", "k1", 1));
        assert!(!cache.has("r1", "k2", 1));
        assert!(cache.has("r1", "k3", 2));
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn test_overwrite_updates_bytes() {
        let cache: VersionedCache<String> = VersionedCache::new(8, u64::MAX);
        cache.set("r1", "k1", 1, "1234".to_string());
        cache.set("r1", "k1", 1, "12".to_string());
        assert_eq!(cache.stats().bytes, 2);
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn test_clear_and_reset_stats() {
        let cache: VersionedCache<String> = VersionedCache::new(8, u64::MAX);
        cache.set("r1", "k1", 1, "A".to_string());
        cache.get("r1", "k1", 1);
        cache.clear();
        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(cache.stats().bytes, 0);
        // counters survive clear, reset wipes them
        assert_eq!(cache.stats().hits, 1);
        cache.reset_stats();
        assert_eq!(cache.stats().hits, 0);
    }
}
