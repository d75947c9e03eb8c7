//! Tiered Cache - Primary/Secondary Orchestration
//!
//! Composes an authoritative (slow, usually distributed) primary store with a
//! fast, TTL-capped secondary store.
//!
//! ```text
//! get:  secondary ──hit──▶ return
//!           │ miss
//!           ▼
//!       primary ──hit──▶ backfill secondary (capped TTL) ──▶ return
//!           │ miss
//!           ▼
//!         None
//!
//! set:  primary (queued on the write pool, or inline) ──▶ secondary (inline, capped TTL)
//! ```
//!
//! Tiers may disagree briefly: a queued primary write can land after the
//! secondary write, and `clear` is not atomic across tiers.

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::traits::{BackendCapabilities, CacheBackend, DistributedBackend};
use crate::worker_pool::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};

/// How writes reach the primary tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Primary writes are queued on the orchestrator's write pool
    #[default]
    Async,
    /// Primary writes are awaited inline and their failures returned
    Sync,
}

/// Configuration for `TieredCache`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredCacheConfig {
    /// Upper bound on how long any entry lives in the secondary tier
    #[serde(with = "crate::serde_secs")]
    pub secondary_ttl: Duration,
    /// Primary write policy
    pub write_mode: WriteMode,
    /// Pool running asynchronous primary writes
    pub write_pool: WorkerPoolConfig,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            secondary_ttl: Duration::from_secs(120),
            write_mode: WriteMode::Async,
            write_pool: WorkerPoolConfig::default(),
        }
    }
}

impl TieredCacheConfig {
    #[must_use]
    pub fn with_secondary_ttl(mut self, secondary_ttl: Duration) -> Self {
        self.secondary_ttl = secondary_ttl;
        self
    }

    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    #[must_use]
    pub fn with_write_pool(mut self, write_pool: WorkerPoolConfig) -> Self {
        self.write_pool = write_pool;
        self
    }
}

/// Tier that answers distributed side-channel operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributedTier {
    Primary,
    Secondary,
    None,
}

/// Tiered cache statistics
#[derive(Debug, Clone)]
pub struct TieredCacheStats {
    pub total_requests: u64,
    pub secondary_hits: u64,
    pub primary_hits: u64,
    pub misses: u64,
    /// Percentage of requests answered by either tier
    pub hit_rate: f64,
    /// Primary hits copied into the secondary tier
    pub backfills: u64,
    pub queued_writes: u64,
    /// Primary writes discarded because the write pool refused them
    pub dropped_writes: u64,
    /// Queued primary writes that the primary rejected
    pub failed_writes: u64,
    pub write_pool: WorkerPoolStats,
}

/// Two-tier cache orchestrator
///
/// # Example
///
/// ```rust
/// use tiered_cache::{TieredCache, TieredCacheConfig};
/// use tiered_cache::backends::DashMapCache;
/// use bytes::Bytes;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = TieredCache::new(
///     Arc::new(DashMapCache::new()),
///     Arc::new(DashMapCache::new()),
///     TieredCacheConfig::default(),
/// )?;
///
/// cache.set("user:1", Bytes::from_static(b"alice"), Some(Duration::from_secs(300))).await?;
/// assert_eq!(cache.get("user:1").await, Some(Bytes::from_static(b"alice")));
/// # Ok(())
/// # }
/// ```
pub struct TieredCache {
    /// Authoritative tier
    primary: Arc<dyn CacheBackend>,
    /// Fast tier; every entry capped at `config.secondary_ttl`
    secondary: Arc<dyn CacheBackend>,
    config: TieredCacheConfig,
    /// Decided at construction: queue primary writes on `write_pool`
    async_primary_writes: bool,
    distributed: DistributedTier,
    write_pool: WorkerPool,
    /// Statistics
    total_requests: Arc<AtomicU64>,
    secondary_hits: Arc<AtomicU64>,
    primary_hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    backfills: Arc<AtomicU64>,
    queued_writes: Arc<AtomicU64>,
    dropped_writes: Arc<AtomicU64>,
    failed_writes: Arc<AtomicU64>,
}

impl TieredCache {
    /// Create a new orchestrator over `primary` and `secondary`
    ///
    /// # Errors
    ///
    /// Returns an error if the write pool configuration is invalid.
    pub fn new(
        primary: Arc<dyn CacheBackend>,
        secondary: Arc<dyn CacheBackend>,
        config: TieredCacheConfig,
    ) -> Result<Self> {
        let async_primary_writes = config.write_mode == WriteMode::Async
            && !primary.capabilities().native_async_writes;

        let distributed = if primary.as_distributed().is_some() {
            DistributedTier::Primary
        } else if secondary.as_distributed().is_some() {
            DistributedTier::Secondary
        } else {
            DistributedTier::None
        };

        let write_pool = WorkerPool::new(
            format!("{}-writes", primary.name()),
            config.write_pool.clone(),
        )?;

        info!(
            primary = %primary.name(),
            secondary = %secondary.name(),
            secondary_ttl_secs = config.secondary_ttl.as_secs(),
            async_primary_writes,
            distributed = ?distributed,
            "Initializing Tiered Cache"
        );

        Ok(Self {
            primary,
            secondary,
            config,
            async_primary_writes,
            distributed,
            write_pool,
            total_requests: Arc::new(AtomicU64::new(0)),
            secondary_hits: Arc::new(AtomicU64::new(0)),
            primary_hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            backfills: Arc::new(AtomicU64::new(0)),
            queued_writes: Arc::new(AtomicU64::new(0)),
            dropped_writes: Arc::new(AtomicU64::new(0)),
            failed_writes: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Whether primary writes go through the write pool
    #[must_use]
    pub fn writes_primary_asynchronously(&self) -> bool {
        self.async_primary_writes
    }

    /// Tier answering `pool_name` / `runtime_stats`
    #[must_use]
    pub fn distributed_tier(&self) -> DistributedTier {
        self.distributed
    }

    #[must_use]
    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    /// Authoritative tier
    #[must_use]
    pub fn primary(&self) -> &Arc<dyn CacheBackend> {
        &self.primary
    }

    /// Fast tier
    #[must_use]
    pub fn secondary(&self) -> &Arc<dyn CacheBackend> {
        &self.secondary
    }

    /// Get value (secondary first, then primary with backfill)
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.get_with_ttl(key).await.map(|(value, _)| value)
    }

    /// Get value with its remaining TTL in the tier that answered
    pub async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if let Some(hit) = self.secondary.get_with_ttl(key).await {
            self.secondary_hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }

        let Some((value, remaining)) = self.primary.get_with_ttl(key).await else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[Tiered] Miss in both tiers");
            return None;
        };
        self.primary_hits.fetch_add(1, Ordering::Relaxed);

        // Entry is about to expire in the primary; do not resurrect it in the secondary
        if remaining.is_some_and(|r| r.is_zero()) {
            return Some((value, remaining));
        }

        let backfill_ttl = self.secondary_ttl_for(remaining);
        match self
            .secondary
            .set_with_ttl(key, value.clone(), backfill_ttl)
            .await
        {
            Ok(()) => {
                self.backfills.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, ttl = ?backfill_ttl, "[Tiered] Backfilled secondary from primary");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "[Tiered] Failed to backfill secondary");
            }
        }

        Some((value, remaining))
    }

    /// Store value in both tiers
    ///
    /// The primary write is queued (asynchronous mode) or awaited; the secondary
    /// write has completed when this returns.
    ///
    /// # Errors
    ///
    /// Returns secondary write failures, and primary write failures in
    /// synchronous mode. A queued primary write never fails the call.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.filter(|ttl| !ttl.is_zero());

        let primary_key = key.to_string();
        let primary_value = value.clone();
        self.write_primary(key, "set", move |primary| async move {
            primary
                .set_with_ttl(&primary_key, primary_value, ttl)
                .await
        })
        .await?;

        let secondary_ttl = self.secondary_ttl_for(ttl);
        self.secondary.set_with_ttl(key, value, secondary_ttl).await?;
        debug!(key = %key, ttl = ?ttl, secondary_ttl = ?secondary_ttl, "[Tiered] Stored value");
        Ok(())
    }

    /// Remove value from both tiers (primary per the write policy, secondary inline)
    ///
    /// # Errors
    ///
    /// Returns secondary failures, and primary failures in synchronous mode.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let primary_key = key.to_string();
        self.write_primary(key, "remove", move |primary| async move {
            primary.remove(&primary_key).await
        })
        .await?;

        self.secondary.remove(key).await
    }

    /// Clear primary then secondary, both inline
    ///
    /// # Errors
    ///
    /// Returns the first tier failure; the secondary is not cleared if the primary fails.
    pub async fn clear(&self) -> Result<()> {
        self.primary.clear().await?;
        self.secondary.clear().await?;
        info!(primary = %self.primary.name(), secondary = %self.secondary.name(), "[Tiered] Cleared both tiers");
        Ok(())
    }

    /// Whether either tier holds `key`
    pub async fn key_exists(&self, key: &str) -> bool {
        self.secondary.key_exists(key).await || self.primary.key_exists(key).await
    }

    /// Keys of the primary tier
    ///
    /// # Errors
    ///
    /// Returns the primary's enumeration error.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.primary.keys().await
    }

    /// Disconnect every tier that holds network connections
    pub async fn disconnect(&self) {
        for tier in [&self.primary, &self.secondary] {
            if let Some(distributed) = tier.as_distributed() {
                distributed.disconnect().await;
            }
        }
    }

    /// Pool name of the distributed tier, if any
    #[must_use]
    pub fn pool_name(&self) -> Option<String> {
        self.distributed_backend().map(|d| d.pool_name().to_string())
    }

    /// Runtime statistics of the distributed tier, if any
    ///
    /// # Errors
    ///
    /// Returns the backend's error when its statistics cannot be read.
    pub async fn runtime_stats(&self) -> Result<Option<HashMap<String, String>>> {
        match self.distributed_backend() {
            Some(distributed) => distributed.runtime_stats().await.map(Some),
            None => Ok(None),
        }
    }

    /// Wait until every queued primary write has run
    pub async fn flush_writes(&self) {
        self.write_pool.wait_idle().await;
    }

    /// Stop accepting primary writes and drain the queue within `grace`
    ///
    /// Returns `true` if the queue drained in time. Later asynchronous writes are
    /// dropped and counted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.write_pool.shutdown(grace).await
    }

    /// Get comprehensive cache statistics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> TieredCacheStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let secondary_hits = self.secondary_hits.load(Ordering::Relaxed);
        let primary_hits = self.primary_hits.load(Ordering::Relaxed);

        TieredCacheStats {
            total_requests,
            secondary_hits,
            primary_hits,
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: if total_requests > 0 {
                ((secondary_hits + primary_hits) as f64 / total_requests as f64) * 100.0
            } else {
                0.0
            },
            backfills: self.backfills.load(Ordering::Relaxed),
            queued_writes: self.queued_writes.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            write_pool: self.write_pool.stats(),
        }
    }

    fn distributed_backend(&self) -> Option<&dyn DistributedBackend> {
        match self.distributed {
            DistributedTier::Primary => self.primary.as_distributed(),
            DistributedTier::Secondary => self.secondary.as_distributed(),
            DistributedTier::None => None,
        }
    }

    fn secondary_ttl_for(&self, ttl: Option<Duration>) -> Option<Duration> {
        cap_ttl(ttl, self.config.secondary_ttl)
    }

    /// Run a primary write inline or queue it on the write pool
    async fn write_primary<W, Fut>(&self, key: &str, op: &'static str, write: W) -> Result<()>
    where
        W: FnOnce(Arc<dyn CacheBackend>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let pending = write(Arc::clone(&self.primary));
        if !self.async_primary_writes {
            return pending.await;
        }

        let failed_writes = Arc::clone(&self.failed_writes);
        let task_key = key.to_string();
        let task = async move {
            if let Err(e) = pending.await {
                failed_writes.fetch_add(1, Ordering::Relaxed);
                warn!(key = %task_key, op, error = %e, "[Tiered] Asynchronous primary write failed");
            }
        };

        match self.write_pool.submit(task) {
            Ok(()) => {
                self.queued_writes.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, op, "[Tiered] Queued primary write");
            }
            Err(e) => {
                self.dropped_writes.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, op, error = %e, "[Tiered] Dropped primary write");
            }
        }
        Ok(())
    }
}

/// `min(ttl, cap)`, or `cap` when the TTL is unspecified; a zero cap disables capping
fn cap_ttl(ttl: Option<Duration>, cap: Duration) -> Option<Duration> {
    if cap.is_zero() {
        return ttl;
    }
    Some(ttl.map_or(cap, |ttl| ttl.min(cap)))
}

// ===== Trait Implementations =====

use async_trait::async_trait;

/// A `TieredCache` is itself a cache store, so a `StampedeCache` can wrap it
#[async_trait]
impl CacheBackend for TieredCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        TieredCache::get(self, key).await
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        TieredCache::get_with_ttl(self, key).await
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.set(key, value, ttl).await
    }

    /// Claims are decided by the primary, inline; the secondary mirrors a won claim
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<bool> {
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        let stored = self.primary.set_if_absent(key, value.clone(), ttl).await?;
        if stored {
            self.secondary
                .set_with_ttl(key, value, self.secondary_ttl_for(ttl))
                .await?;
        }
        Ok(stored)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        TieredCache::remove(self, key).await
    }

    async fn clear(&self) -> Result<()> {
        TieredCache::clear(self).await
    }

    async fn key_exists(&self, key: &str) -> bool {
        TieredCache::key_exists(self, key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        TieredCache::keys(self).await
    }

    async fn health_check(&self) -> bool {
        let primary_ok = self.primary.health_check().await;
        let secondary_ok = self.secondary.health_check().await;
        if !primary_ok || !secondary_ok {
            warn!(primary_ok, secondary_ok, "[Tiered] Health check failed");
        }
        primary_ok && secondary_ok
    }

    fn name(&self) -> &str {
        "Tiered"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
            .with_atomic_claim(self.primary.capabilities().atomic_claim)
            .with_native_async_writes(self.async_primary_writes)
    }

    fn as_distributed(&self) -> Option<&dyn DistributedBackend> {
        match self.distributed {
            DistributedTier::None => None,
            DistributedTier::Primary | DistributedTier::Secondary => Some(self),
        }
    }
}

#[async_trait]
impl DistributedBackend for TieredCache {
    async fn disconnect(&self) {
        TieredCache::disconnect(self).await;
    }

    fn pool_name(&self) -> &str {
        self.distributed_backend().map_or("", |d| d.pool_name())
    }

    async fn runtime_stats(&self) -> Result<HashMap<String, String>> {
        Ok(TieredCache::runtime_stats(self).await?.unwrap_or_default())
    }
}
