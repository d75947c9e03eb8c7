//! Example: Custom Cache Backends
//!
//! Implements a primary backend and a fetcher by hand and plugs them into the
//! builder in place of the default Redis primary.
//!
//! Run with: `cargo run --example custom_backends`

use anyhow::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tiered_cache::{
    BackendCapabilities, CacheBackend, CacheSystemBuilder, DistributedBackend, Fetcher,
    StampedeConfig, TieredCacheConfig, async_trait,
};

// ==================== Example 1: HashMap primary ====================

/// In-memory "remote" store that pretends to be a shared cache server
///
/// Advertises an atomic claim because `set_if_absent` runs under the write lock.
struct HashMapStore {
    name: String,
    store: RwLock<HashMap<String, (Bytes, Option<Instant>)>>,
    round_trips: AtomicU64,
}

impl HashMapStore {
    fn new(name: &str) -> Self {
        println!("  🗺️ Initializing {name} with HashMap backend...");
        Self {
            name: name.to_string(),
            store: RwLock::new(HashMap::new()),
            round_trips: AtomicU64::new(0),
        }
    }

    fn live(expires_at: Option<Instant>) -> bool {
        expires_at.is_none_or(|at| at > Instant::now())
    }
}

#[async_trait]
impl CacheBackend for HashMapStore {
    async fn get(&self, key: &str) -> Option<Bytes> {
        self.get_with_ttl(key).await.map(|(value, _)| value)
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let store = self.store.read();
        let (value, expires_at) = store.get(key)?;
        if !Self::live(*expires_at) {
            return None;
        }
        let remaining = expires_at.map(|at| at.saturating_duration_since(Instant::now()));
        Some((value.clone(), remaining))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.store.write().insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<bool> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let mut store = self.store.write();
        if store.get(key).is_some_and(|(_, expires_at)| Self::live(*expires_at)) {
            return Ok(false);
        }
        store.insert(key.to_string(), (value, ttl.map(|ttl| Instant::now() + ttl)));
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.store.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.store.write().clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .read()
            .iter()
            .filter(|(_, (_, expires_at))| Self::live(*expires_at))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default().with_atomic_claim(true)
    }

    fn as_distributed(&self) -> Option<&dyn DistributedBackend> {
        Some(self)
    }
}

#[async_trait]
impl DistributedBackend for HashMapStore {
    async fn disconnect(&self) {
        println!("  🔌 {} disconnected", self.name);
    }

    fn pool_name(&self) -> &str {
        "demo-pool"
    }

    async fn runtime_stats(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([
            ("entries".to_string(), self.store.read().len().to_string()),
            (
                "round_trips".to_string(),
                self.round_trips.load(Ordering::Relaxed).to_string(),
            ),
        ]))
    }
}

// ==================== Example 2: struct fetcher ====================

/// Fetcher with a cheaper variant for background refreshes
struct PriceFetcher {
    symbol: String,
}

#[async_trait]
impl Fetcher for PriceFetcher {
    async fn fetch(&self) -> Result<Option<Bytes>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Some(Bytes::from(format!("{}=101.5 (live)", self.symbol))))
    }

    async fn fetch_background(&self) -> Result<Option<Bytes>> {
        Ok(Some(Bytes::from(format!("{}=101.7 (batch)", self.symbol))))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Tiered Cache: Custom Backends ===\n");

    let primary = Arc::new(HashMapStore::new("HashMapStore"));
    let cache = CacheSystemBuilder::new()
        .with_primary(primary.clone())
        .with_tiered_config(TieredCacheConfig::default().with_secondary_ttl(Duration::from_secs(30)))
        .with_stampede_config(StampedeConfig::default().with_marker_prefixes("lock:", "refresh:"))
        .build()
        .await?;

    println!("\nDistributed tier: {:?}", cache.tiered().distributed_tier());
    println!("Pool name: {:?}", cache.tiered().pool_name());

    let price = cache
        .stampede()
        .fetch("price:ACME", Duration::from_secs(10), 6, PriceFetcher { symbol: "ACME".into() })
        .await?;
    println!("Fetched: {price:?}");

    cache.tiered().flush_writes().await;
    let mut keys = primary.keys().await?;
    keys.sort();
    println!("Primary keys: {keys:?}");

    if let Some(stats) = cache.tiered().runtime_stats().await? {
        println!("Primary runtime stats: {stats:?}");
    }

    cache.shutdown(Duration::from_secs(5)).await;
    cache.tiered().disconnect().await;
    Ok(())
}
