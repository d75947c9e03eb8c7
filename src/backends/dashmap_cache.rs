//! `DashMap` Cache - Simple Concurrent `HashMap` Backend
//!
//! A lightweight in-memory cache using `DashMap` for concurrent access.
//! Always available; useful as a secondary tier, as the store behind a
//! `StampedeCache` in a single process, and in tests.

use anyhow::Result;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::traits::{BackendCapabilities, CacheBackend};

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }
}

/// Simple concurrent cache using `DashMap`
///
/// **Features**:
/// - Sharded concurrent reads/writes
/// - Per-key TTL tracking (expiry follows the tokio clock, so paused-time tests work)
/// - Atomic `set_if_absent` through the entry API
/// - Key enumeration
///
/// **Limitations**:
/// - No eviction policy and no size limit
/// - Expired entries are dropped lazily on access or by `cleanup_expired`
///
/// **Example**:
/// ```rust
/// use tiered_cache::backends::DashMapCache;
/// use tiered_cache::CacheBackend;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = DashMapCache::new();
/// let value = Bytes::from_static(b"alice");
///
/// cache.set_with_ttl("user:1", value.clone(), Some(Duration::from_secs(60))).await?;
/// let cached = cache.get("user:1").await;
/// assert_eq!(cached, Some(value));
/// # Ok(())
/// # }
/// ```
pub struct DashMapCache {
    /// Concurrent `HashMap`
    map: Arc<DashMap<String, CacheEntry>>,
    /// Hit counter
    hits: Arc<AtomicU64>,
    /// Miss counter
    misses: Arc<AtomicU64>,
    /// Set counter
    sets: Arc<AtomicU64>,
}

impl DashMapCache {
    /// Create new `DashMap` cache
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing DashMap Cache (concurrent HashMap)");

        Self {
            map: Arc::new(DashMap::new()),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cleanup expired entries (should be called periodically)
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[DashMap] Cleaned up expired entries");
        }
        removed
    }

    /// Get current cache size (including not yet collected expired entries)
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `(hits, misses, sets)` counters
    #[must_use]
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
        )
    }

    fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.map.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.map.remove_if(key, |_, entry| entry.is_expired());
            return None;
        }
        Some(entry.clone())
    }
}

impl Default for DashMapCache {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Trait Implementations =====

use async_trait::async_trait;

#[async_trait]
impl CacheBackend for DashMapCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(entry) = self.live_entry(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        if let Some(entry) = self.live_entry(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            let remaining = entry.remaining();
            Some((entry.value, remaining))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.map.insert(key.to_string(), CacheEntry::new(value, ttl));
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?ttl, "[DashMap] Cached key with TTL");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<bool> {
        let stored = match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CacheEntry::new(value, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value, ttl));
                true
            }
        };
        if stored {
            self.sets.fetch_add(1, Ordering::Relaxed);
        }
        debug!(key = %key, stored, "[DashMap] set_if_absent");
        Ok(stored)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.map.clear();
        debug!("[DashMap] Cleared all entries");
        Ok(())
    }

    async fn key_exists(&self, key: &str) -> bool {
        self.live_entry(key).is_some()
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .map
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn health_check(&self) -> bool {
        let test_key = "health_check_dashmap";
        let test_value = Bytes::from_static(b"health_check_value");

        match self
            .set_with_ttl(test_key, test_value.clone(), Some(Duration::from_secs(60)))
            .await
        {
            Ok(()) => match self.get(test_key).await {
                Some(retrieved) => {
                    let _ = self.remove(test_key).await;
                    retrieved == test_value
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "DashMap"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default().with_atomic_claim(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_the_tokio_clock() {
        let cache = DashMapCache::new();
        cache
            .set_with_ttl("k", Bytes::from_static(b"v"), Some(Duration::from_secs(5)))
            .await
            .unwrap_or_else(|e| panic!("set: {e}"));

        tokio::time::advance(Duration::from_secs(4)).await;
        let (_, remaining) = cache
            .get_with_ttl("k")
            .await
            .unwrap_or_else(|| panic!("entry should still be live"));
        assert_eq!(remaining, Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_replaces_only_expired_entries() {
        let cache = DashMapCache::new();
        let ttl = Some(Duration::from_secs(10));

        assert!(cache.set_if_absent("claim", Bytes::from_static(b"a"), ttl).await.unwrap_or(false));
        assert!(!cache.set_if_absent("claim", Bytes::from_static(b"b"), ttl).await.unwrap_or(true));
        assert_eq!(cache.get("claim").await, Some(Bytes::from_static(b"a")));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.set_if_absent("claim", Bytes::from_static(b"c"), ttl).await.unwrap_or(false));
        assert_eq!(cache.get("claim").await, Some(Bytes::from_static(b"c")));
    }

    #[tokio::test]
    async fn keys_skip_expired_entries() {
        let cache = DashMapCache::new();
        cache.set_with_ttl("live", Bytes::from_static(b"1"), None).await.unwrap_or_default();
        cache
            .set_with_ttl("dead", Bytes::from_static(b"2"), Some(Duration::ZERO))
            .await
            .unwrap_or_default();

        let keys = cache.keys().await.unwrap_or_default();
        assert_eq!(keys, vec!["live".to_string()]);
        assert_eq!(cache.cleanup_expired(), 1);
    }

    #[tokio::test]
    async fn counters_track_hits_misses_and_sets() {
        let cache = DashMapCache::new();
        cache.set_with_ttl("k", Bytes::from_static(b"v"), None).await.unwrap_or_default();
        assert!(!cache.set_if_absent("k", Bytes::from_static(b"w"), None).await.unwrap_or(true));

        assert!(cache.get("k").await.is_some());
        assert!(cache.get_with_ttl("missing").await.is_none());

        assert_eq!(cache.counters(), (1, 1, 1));
        assert_eq!(cache.len(), 1);
    }
}
