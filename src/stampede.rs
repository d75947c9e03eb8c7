//! Stampede Protection - Refresh-Ahead Fetching with Dogpile Markers
//!
//! Wraps a user-supplied [`Fetcher`] around a single cache store. Values are
//! stored with an extended TTL (`ttl * stale_multiplier`) next to two marker keys:
//!
//! - freshness marker (`dp:<key>`, TTL = `ttl`): while present the value is fresh;
//! - in-progress marker (`fdp:<key>`): a background refresh has been claimed.
//!   Its value is `"<deadline_ms>:<owner uuid>"`.
//!
//! ```text
//!            miss: compute inline            freshness marker expired
//! ABSENT ─────────────────────────▶ FRESH ───────────────────────────▶ STALE_REFRESHING
//!   ▲                                 ▲          (one caller claims,          │
//!   │                                 │           everyone gets stale)        │
//!   │                                 └──────── refresh stored ◀──────────────┤
//!   │                                                                         │ deadline passed
//!   └──────────── value and markers cleared, next caller computes ◀── STALE_TIMED_OUT
//! ```
//!
//! Single-flight is best-effort. In-process duplicates are removed by a `DashMap`
//! of keys with a scheduled refresh, each entry carrying its own claim deadline so
//! a hung local refresh stops blocking the key once the window passes; across processes the claim is exact only on
//! backends that advertise `atomic_claim`, otherwise two racing callers may both
//! refresh.

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::traits::{CacheBackend, CacheCodec, Fetcher};
use crate::worker_pool::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};

/// Configuration for `StampedeCache`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampedeConfig {
    /// How long a claimed refresh may run before later callers treat it as abandoned
    #[serde(with = "crate::serde_secs")]
    pub recovery_window: Duration,
    /// Prefix of the freshness marker key
    pub freshness_prefix: String,
    /// Prefix of the in-progress marker key
    pub progress_prefix: String,
    /// Pool running background refreshes
    pub refresh_pool: WorkerPoolConfig,
}

impl Default for StampedeConfig {
    fn default() -> Self {
        Self {
            recovery_window: Duration::from_secs(120),
            freshness_prefix: "dp:".to_string(),
            progress_prefix: "fdp:".to_string(),
            refresh_pool: WorkerPoolConfig::default(),
        }
    }
}

impl StampedeConfig {
    #[must_use]
    pub fn with_recovery_window(mut self, recovery_window: Duration) -> Self {
        self.recovery_window = recovery_window;
        self
    }

    #[must_use]
    pub fn with_marker_prefixes(
        mut self,
        freshness_prefix: impl Into<String>,
        progress_prefix: impl Into<String>,
    ) -> Self {
        self.freshness_prefix = freshness_prefix.into();
        self.progress_prefix = progress_prefix.into();
        self
    }

    #[must_use]
    pub fn with_refresh_pool(mut self, refresh_pool: WorkerPoolConfig) -> Self {
        self.refresh_pool = refresh_pool;
        self
    }
}

/// Contents of the in-progress marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProgressMarker {
    deadline_ms: u64,
    owner: Uuid,
}

impl ProgressMarker {
    fn claim(recovery_window: Duration) -> Self {
        let window_ms = u64::try_from(recovery_window.as_millis()).unwrap_or(u64::MAX);
        Self {
            deadline_ms: unix_millis().saturating_add(window_ms),
            owner: Uuid::new_v4(),
        }
    }

    fn encode(&self) -> Bytes {
        Bytes::from(format!("{}:{}", self.deadline_ms, self.owner))
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        let (deadline, owner) = text.split_once(':')?;
        Some(Self {
            deadline_ms: deadline.parse().ok()?,
            owner: Uuid::parse_str(owner).ok()?,
        })
    }

    fn is_abandoned(&self, now_ms: u64) -> bool {
        now_ms >= self.deadline_ms
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Value key plus its two marker keys
#[derive(Debug, Clone)]
struct EntryKeys {
    value: String,
    freshness: String,
    progress: String,
}

/// Where the value of a fresh computation goes and for how long
#[derive(Debug, Clone, Copy)]
struct Lifetimes {
    /// `ttl * stale_multiplier`
    extended: Option<Duration>,
    /// `ttl`
    fresh: Option<Duration>,
}

impl Lifetimes {
    fn new(ttl: Duration, stale_multiplier: u32) -> Self {
        let fresh = Some(ttl).filter(|ttl| !ttl.is_zero());
        Self {
            extended: fresh.map(|ttl| ttl.saturating_mul(stale_multiplier)),
            fresh,
        }
    }
}

/// Store a freshly computed value with its freshness marker and drop the claim
///
/// With `owner` set, the in-progress marker is only removed while it still names
/// that owner, so a late refresh cannot release a newer claim. Cache write
/// failures are logged; the computed value is still good.
async fn store_fresh(
    store: &dyn CacheBackend,
    keys: &EntryKeys,
    value: Bytes,
    lifetimes: Lifetimes,
    owner: Option<Uuid>,
) {
    if let Err(e) = store
        .set_with_ttl(&keys.value, value, lifetimes.extended)
        .await
    {
        warn!(key = %keys.value, error = %e, "[Stampede] Failed to store computed value");
        return;
    }
    if let Err(e) = store
        .set_with_ttl(&keys.freshness, Bytes::from_static(b"1"), lifetimes.fresh)
        .await
    {
        warn!(key = %keys.value, error = %e, "[Stampede] Failed to set freshness marker");
    }
    if let Some(owner) = owner {
        let current = store
            .get(&keys.progress)
            .await
            .and_then(|raw| ProgressMarker::decode(&raw));
        if current.is_none_or(|marker| marker.owner != owner) {
            debug!(key = %keys.value, "[Stampede] Claim taken over, leaving in-progress marker");
            return;
        }
    }
    if let Err(e) = store.remove(&keys.progress).await {
        warn!(key = %keys.value, error = %e, "[Stampede] Failed to clear in-progress marker");
    }
}

/// Remove the value and both markers, returning the first failure
async fn evict(store: &dyn CacheBackend, keys: &EntryKeys) -> Result<()> {
    let value = store.remove(&keys.value).await;
    let freshness = store.remove(&keys.freshness).await;
    let progress = store.remove(&keys.progress).await;
    value.and(freshness).and(progress)
}

/// Removes the key from the in-flight map when the refresh finishes or is never run
///
/// Only the entry it inserted: a takeover after abandonment installs a new owner.
struct InFlightGuard {
    map: Arc<DashMap<String, ProgressMarker>>,
    key: String,
    owner: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map
            .remove_if(&self.key, |_, marker| marker.owner == self.owner);
    }
}

#[derive(Debug, Default)]
struct Counters {
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    inline_computes: AtomicU64,
    bypasses: AtomicU64,
    refreshes_scheduled: AtomicU64,
    refreshes_completed: AtomicU64,
    refreshes_failed: AtomicU64,
    refreshes_rejected: AtomicU64,
    abandoned_recoveries: AtomicU64,
}

/// Stampede protection statistics
#[derive(Debug, Clone)]
pub struct StampedeStats {
    /// Hits with the freshness marker present
    pub fresh_hits: u64,
    /// Hits served while a refresh is claimed or being scheduled
    pub stale_hits: u64,
    pub misses: u64,
    /// Fetcher calls made by the calling task
    pub inline_computes: u64,
    /// Fetches that skipped the cache because no store is configured
    pub bypasses: u64,
    pub refreshes_scheduled: u64,
    pub refreshes_completed: u64,
    /// Background refreshes that returned an error or no value
    pub refreshes_failed: u64,
    /// Claims released because the refresh pool refused the task
    pub refreshes_rejected: u64,
    /// In-progress markers found past their deadline (or unreadable) and cleared
    pub abandoned_recoveries: u64,
    /// Keys with a refresh queued or running in this process
    pub in_flight_refreshes: usize,
    pub refresh_pool: WorkerPoolStats,
}

/// Stampede-protected fetch layer over one cache store
///
/// # Example
///
/// ```rust
/// use tiered_cache::{StampedeCache, StampedeConfig};
/// use tiered_cache::backends::DashMapCache;
/// use bytes::Bytes;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = StampedeCache::new(Some(Arc::new(DashMapCache::new())), StampedeConfig::default())?;
///
/// let value = cache
///     .fetch("report:daily", Duration::from_secs(60), 5, || async {
///         anyhow::Ok(Some(Bytes::from_static(b"expensive result")))
///     })
///     .await?;
/// assert_eq!(value, Some(Bytes::from_static(b"expensive result")));
/// # Ok(())
/// # }
/// ```
pub struct StampedeCache {
    /// `None` models an unavailable store: every fetch goes straight to the fetcher
    store: Option<Arc<dyn CacheBackend>>,
    atomic_claim: bool,
    config: StampedeConfig,
    refresh_pool: WorkerPool,
    /// Local claims, keyed by cache key
    in_flight: Arc<DashMap<String, ProgressMarker>>,
    counters: Arc<Counters>,
}

impl StampedeCache {
    /// Create a new fetch layer
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh pool configuration is invalid.
    pub fn new(store: Option<Arc<dyn CacheBackend>>, config: StampedeConfig) -> Result<Self> {
        let atomic_claim = store
            .as_ref()
            .is_some_and(|store| store.capabilities().atomic_claim);
        let pool_name = store
            .as_ref()
            .map_or_else(|| "uncached".to_string(), |s| format!("{}-refresh", s.name()));
        let refresh_pool = WorkerPool::new(pool_name, config.refresh_pool.clone())?;

        match &store {
            Some(store) => info!(
                store = %store.name(),
                atomic_claim,
                recovery_window_secs = config.recovery_window.as_secs(),
                "Initializing Stampede Cache"
            ),
            None => warn!("Initializing Stampede Cache without a store; fetches bypass caching"),
        }

        Ok(Self {
            store,
            atomic_claim,
            config,
            refresh_pool,
            in_flight: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StampedeConfig {
        &self.config
    }

    /// Fetch `key`, computing it with `fetcher` when needed
    ///
    /// - `stale_multiplier == 0`: plain read-through, value stored with `ttl`
    /// - otherwise: refresh-ahead. The value lives for `ttl * stale_multiplier` and
    ///   is served stale while a single background refresh runs once `ttl` has passed
    ///
    /// A zero `ttl` stores without expiry.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error when the value had to be computed inline.
    /// Cache failures never surface here.
    pub async fn fetch<F>(
        &self,
        key: &str,
        ttl: Duration,
        stale_multiplier: u32,
        fetcher: F,
    ) -> Result<Option<Bytes>>
    where
        F: Fetcher + 'static,
    {
        let Some(store) = self.store.as_ref() else {
            self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[Stampede] No store, calling fetcher directly");
            return fetcher.fetch().await;
        };

        if stale_multiplier == 0 {
            return self.read_through(store.as_ref(), key, ttl, &fetcher).await;
        }

        let keys = self.entry_keys(key);
        let lifetimes = Lifetimes::new(ttl, stale_multiplier);

        if let Some(value) = store.get(key).await {
            if store.key_exists(&keys.freshness).await {
                self.counters.fresh_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(value));
            }

            match store.get(&keys.progress).await {
                None => {
                    self.schedule_refresh(store, keys, lifetimes, fetcher).await;
                    self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(value));
                }
                Some(raw) => match ProgressMarker::decode(&raw) {
                    Some(marker) if !marker.is_abandoned(unix_millis()) => {
                        self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(Some(value));
                    }
                    marker => {
                        self.counters
                            .abandoned_recoveries
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(
                            key = %key,
                            deadline_ms = ?marker.map(|m| m.deadline_ms),
                            "[Stampede] Refresh abandoned, recomputing inline"
                        );
                        let now_ms = unix_millis();
                        self.in_flight
                            .remove_if(key, |_, local| local.is_abandoned(now_ms));
                        if let Err(e) = evict(store.as_ref(), &keys).await {
                            warn!(key = %key, error = %e, "[Stampede] Failed to clear abandoned entry");
                        }
                    }
                },
            }
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }

        self.compute_inline(store.as_ref(), &keys, lifetimes, &fetcher)
            .await
    }

    /// Typed variant of [`fetch`](Self::fetch) encoding values with `codec`
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error, an encoding error, or a decoding error for a
    /// cached payload that does not match `T` (the entry is invalidated first).
    pub async fn fetch_typed<T, C, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        stale_multiplier: u32,
        codec: C,
        fetcher: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        C: CacheCodec + Clone + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let encoder = codec.clone();
        let byte_fetcher = move || {
            let pending = fetcher();
            let codec = encoder.clone();
            async move {
                let encoded = match pending.await? {
                    Some(value) => Some(Bytes::from(codec.serialize(&value)?)),
                    None => None,
                };
                anyhow::Ok(encoded)
            }
        };

        let Some(bytes) = self.fetch(key, ttl, stale_multiplier, byte_fetcher).await? else {
            return Ok(None);
        };

        match codec.deserialize::<T>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, codec = codec.name(), error = %e, "[Stampede] Cached payload does not decode, invalidating");
                self.invalidate(key).await?;
                Err(e).with_context(|| {
                    format!(
                        "cached value for '{key}' is not a valid {} payload for {}",
                        codec.name(),
                        std::any::type_name::<T>()
                    )
                })
            }
        }
    }

    /// Remove the value and both markers of `key`
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        evict(store.as_ref(), &self.entry_keys(key)).await
    }

    /// Wait until every queued background refresh has finished
    pub async fn wait_for_refreshes(&self) {
        self.refresh_pool.wait_idle().await;
    }

    /// Stop scheduling refreshes and drain the queue within `grace`
    ///
    /// Returns `true` if every refresh finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.refresh_pool.shutdown(grace).await
    }

    #[must_use]
    pub fn stats(&self) -> StampedeStats {
        let c = &self.counters;
        StampedeStats {
            fresh_hits: c.fresh_hits.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            inline_computes: c.inline_computes.load(Ordering::Relaxed),
            bypasses: c.bypasses.load(Ordering::Relaxed),
            refreshes_scheduled: c.refreshes_scheduled.load(Ordering::Relaxed),
            refreshes_completed: c.refreshes_completed.load(Ordering::Relaxed),
            refreshes_failed: c.refreshes_failed.load(Ordering::Relaxed),
            refreshes_rejected: c.refreshes_rejected.load(Ordering::Relaxed),
            abandoned_recoveries: c.abandoned_recoveries.load(Ordering::Relaxed),
            in_flight_refreshes: self.in_flight.len(),
            refresh_pool: self.refresh_pool.stats(),
        }
    }

    fn entry_keys(&self, key: &str) -> EntryKeys {
        EntryKeys {
            value: key.to_string(),
            freshness: format!("{}{key}", self.config.freshness_prefix),
            progress: format!("{}{key}", self.config.progress_prefix),
        }
    }

    async fn read_through<F: Fetcher>(
        &self,
        store: &dyn CacheBackend,
        key: &str,
        ttl: Duration,
        fetcher: &F,
    ) -> Result<Option<Bytes>> {
        if let Some(value) = store.get(key).await {
            self.counters.fresh_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(value));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.inline_computes.fetch_add(1, Ordering::Relaxed);

        let Some(value) = fetcher.fetch().await? else {
            return Ok(None);
        };
        let ttl = Some(ttl).filter(|ttl| !ttl.is_zero());
        if let Err(e) = store.set_with_ttl(key, value.clone(), ttl).await {
            warn!(key = %key, error = %e, "[Stampede] Failed to store computed value");
        }
        Ok(Some(value))
    }

    async fn compute_inline<F: Fetcher>(
        &self,
        store: &dyn CacheBackend,
        keys: &EntryKeys,
        lifetimes: Lifetimes,
        fetcher: &F,
    ) -> Result<Option<Bytes>> {
        self.counters.inline_computes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %keys.value, "[Stampede] Computing inline");

        let Some(value) = fetcher.fetch().await? else {
            return Ok(None);
        };
        store_fresh(store, keys, value.clone(), lifetimes, None).await;
        Ok(Some(value))
    }

    /// Claim the in-progress marker and queue one background refresh
    async fn schedule_refresh<F>(
        &self,
        store: &Arc<dyn CacheBackend>,
        keys: EntryKeys,
        lifetimes: Lifetimes,
        fetcher: F,
    ) where
        F: Fetcher + 'static,
    {
        let marker = ProgressMarker::claim(self.config.recovery_window);
        match self.in_flight.entry(keys.value.clone()) {
            // Another task in this process owns a live refresh
            Entry::Occupied(current) if !current.get().is_abandoned(unix_millis()) => return,
            Entry::Occupied(mut current) => {
                warn!(key = %keys.value, "[Stampede] Local refresh abandoned, taking over");
                current.insert(marker);
            }
            Entry::Vacant(slot) => {
                slot.insert(marker);
            }
        }
        let guard = InFlightGuard {
            map: Arc::clone(&self.in_flight),
            key: keys.value.clone(),
            owner: marker.owner,
        };

        if !self.claim(store.as_ref(), &keys, marker).await {
            debug!(key = %keys.value, "[Stampede] Refresh already claimed elsewhere");
            return;
        }

        let task_store = Arc::clone(store);
        let task_keys = keys.clone();
        let counters = Arc::clone(&self.counters);
        let task = async move {
            let _guard = guard;
            refresh(
                task_store.as_ref(),
                &task_keys,
                lifetimes,
                marker.owner,
                &fetcher,
                &counters,
            )
            .await;
        };

        match self.refresh_pool.submit(task) {
            Ok(()) => {
                self.counters
                    .refreshes_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                debug!(key = %keys.value, "[Stampede] Scheduled background refresh");
            }
            Err(e) => {
                self.counters
                    .refreshes_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(key = %keys.value, error = %e, "[Stampede] Refresh rejected, releasing claim");
                if let Err(e) = store.remove(&keys.progress).await {
                    warn!(key = %keys.value, error = %e, "[Stampede] Failed to release claim");
                }
            }
        }
    }

    /// Try to become the refresher of `keys.value`
    async fn claim(
        &self,
        store: &dyn CacheBackend,
        keys: &EntryKeys,
        marker: ProgressMarker,
    ) -> bool {
        let marker_ttl = Some(self.config.recovery_window.saturating_mul(2))
            .filter(|ttl| !ttl.is_zero());

        match store
            .set_if_absent(&keys.progress, marker.encode(), marker_ttl)
            .await
        {
            Ok(true) if self.atomic_claim => true,
            // Non-atomic claim: the last writer wins, so read the owner back
            Ok(true) => store
                .get(&keys.progress)
                .await
                .and_then(|raw| ProgressMarker::decode(&raw))
                .is_some_and(|current| current.owner == marker.owner),
            Ok(false) => false,
            Err(e) => {
                warn!(key = %keys.value, error = %e, "[Stampede] Failed to claim refresh");
                false
            }
        }
    }
}

async fn refresh<F: Fetcher>(
    store: &dyn CacheBackend,
    keys: &EntryKeys,
    lifetimes: Lifetimes,
    owner: Uuid,
    fetcher: &F,
    counters: &Counters,
) {
    let outcome = fetcher.fetch_background().await;
    if let Ok(Some(value)) = outcome {
        store_fresh(store, keys, value, lifetimes, Some(owner)).await;
        counters.refreshes_completed.fetch_add(1, Ordering::Relaxed);
        debug!(key = %keys.value, "[Stampede] Background refresh stored");
        return;
    }

    counters.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    match outcome {
        Err(e) => warn!(key = %keys.value, error = %e, "[Stampede] Background refresh failed, evicting"),
        _ => debug!(key = %keys.value, "[Stampede] Background refresh returned no value, evicting"),
    }
    if let Err(e) = evict(store, keys).await {
        warn!(key = %keys.value, error = %e, "[Stampede] Failed to evict after refresh");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_encodes_deadline_and_owner() {
        let marker = ProgressMarker::claim(Duration::from_secs(120));
        let decoded = ProgressMarker::decode(&marker.encode());
        assert_eq!(decoded, Some(marker));
        assert!(!marker.is_abandoned(unix_millis()));
        assert!(marker.is_abandoned(marker.deadline_ms));
    }

    #[test]
    fn garbage_markers_do_not_decode() {
        assert_eq!(ProgressMarker::decode(b"1"), None);
        assert_eq!(ProgressMarker::decode(b"soon:7f1c"), None);
        assert_eq!(ProgressMarker::decode(&[0xff, 0xfe, b':']), None);
        assert_eq!(ProgressMarker::decode(b"12:not-a-uuid"), None);
    }

    #[test]
    fn lifetimes_extend_the_real_ttl() {
        let lifetimes = Lifetimes::new(Duration::from_secs(60), 2);
        assert_eq!(lifetimes.fresh, Some(Duration::from_secs(60)));
        assert_eq!(lifetimes.extended, Some(Duration::from_secs(120)));

        let unbounded = Lifetimes::new(Duration::ZERO, 3);
        assert_eq!(unbounded.fresh, None);
        assert_eq!(unbounded.extended, None);
    }

    #[test]
    fn config_defaults_match_marker_conventions() {
        let config: StampedeConfig = serde_json::from_str(r#"{"recovery_window": 30}"#)
            .unwrap_or_else(|e| panic!("config: {e}"));
        assert_eq!(config.recovery_window, Duration::from_secs(30));
        assert_eq!(config.freshness_prefix, "dp:");
        assert_eq!(config.progress_prefix, "fdp:");
    }

    fn keys_for(key: &str) -> EntryKeys {
        EntryKeys {
            value: key.to_string(),
            freshness: format!("dp:{key}"),
            progress: format!("fdp:{key}"),
        }
    }

    #[tokio::test]
    async fn late_refresh_keeps_a_newer_claim() {
        let store = crate::backends::DashMapCache::new();
        let keys = keys_for("k");
        let lifetimes = Lifetimes::new(Duration::from_secs(60), 2);
        let newer = ProgressMarker::claim(Duration::from_secs(120));
        let _ = store
            .set_with_ttl(&keys.progress, newer.encode(), None)
            .await;

        let late = Some(Uuid::new_v4());
        store_fresh(&store, &keys, Bytes::from_static(b"late"), lifetimes, late).await;
        assert_eq!(store.get("k").await, Some(Bytes::from_static(b"late")));
        assert!(store.key_exists("fdp:k").await);

        let owner = Some(newer.owner);
        store_fresh(&store, &keys, Bytes::from_static(b"owner"), lifetimes, owner).await;
        assert!(!store.key_exists("fdp:k").await);
    }

    #[tokio::test]
    async fn inline_store_clears_any_claim() {
        let store = crate::backends::DashMapCache::new();
        let keys = keys_for("k");
        let stray = ProgressMarker::claim(Duration::from_secs(120));
        let _ = store
            .set_with_ttl(&keys.progress, stray.encode(), None)
            .await;

        let lifetimes = Lifetimes::new(Duration::from_secs(1), 2);
        store_fresh(&store, &keys, Bytes::from_static(b"v"), lifetimes, None).await;
        assert!(!store.key_exists("fdp:k").await);
        assert!(store.key_exists("dp:k").await);
    }

    #[test]
    fn in_flight_guard_only_removes_its_own_entry() {
        let map = Arc::new(DashMap::new());
        let stale = ProgressMarker::claim(Duration::ZERO);
        let guard = InFlightGuard {
            map: Arc::clone(&map),
            key: "k".to_string(),
            owner: stale.owner,
        };
        let takeover = ProgressMarker::claim(Duration::from_secs(120));
        map.insert("k".to_string(), takeover);

        drop(guard);
        assert_eq!(map.get("k").map(|m| m.owner), Some(takeover.owner));
    }

    #[tokio::test]
    async fn unavailable_store_calls_fetcher_every_time() {
        let cache = StampedeCache::new(None, StampedeConfig::default())
            .unwrap_or_else(|e| panic!("cache: {e}"));
        for _ in 0..3 {
            let value = cache
                .fetch("k", Duration::from_secs(60), 2, || async {
                    anyhow::Ok(Some(Bytes::from_static(b"direct")))
                })
                .await
                .unwrap_or_default();
            assert_eq!(value, Some(Bytes::from_static(b"direct")));
        }
        assert_eq!(cache.stats().bypasses, 3);
        assert!(cache.invalidate("k").await.is_ok());
    }
}
