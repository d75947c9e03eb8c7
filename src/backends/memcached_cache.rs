//! Memcached Cache - Distributed Cache Backend
//!
//! Memcached-based distributed cache. Memcached cannot enumerate keys, so this
//! backend remembers every key it wrote (with its expiry) in a local `DashMap`
//! and namespaces keys as `<pool>#<key>`.

use anyhow::{anyhow, Result};
use bytes::Bytes;
use dashmap::DashMap;
use memcache::MemcacheError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Relative expirations above 30 days are read by memcached as unix timestamps
const MAX_RELATIVE_EXPIRY_SECS: u32 = 60 * 60 * 24 * 30;

/// Memcached distributed cache
///
/// - Distributed caching across multiple instances
/// - Atomic `set_if_absent` through `add`
/// - `noreply=true` in the URL advertises native asynchronous writes
///
/// **Note**: Memcached does not support:
/// - TTL introspection (the remaining TTL reported by `get_with_ttl` comes from
///   the local key registry, not the server)
/// - Key enumeration (`keys` and `clear` only see keys written through this instance)
pub struct MemcachedCache {
    /// Memcached client; `None` after `disconnect`
    client: RwLock<Option<memcache::Client>>,
    /// Pool name used as key namespace
    pool_name: String,
    /// Keys written through this instance and when they expire
    known_keys: DashMap<String, Option<Instant>>,
    /// Whether the connection was opened in `noreply` mode
    noreply: bool,
    /// Hit counter
    hits: Arc<AtomicU64>,
    /// Miss counter
    misses: Arc<AtomicU64>,
    /// Set counter
    sets: Arc<AtomicU64>,
}

impl MemcachedCache {
    /// Create new Memcached cache
    ///
    /// # Configuration
    ///
    /// Uses `MEMCACHED_URL` environment variable or defaults to `memcache://127.0.0.1:11211`
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use tiered_cache::backends::MemcachedCache;
    /// # fn example() -> anyhow::Result<()> {
    /// let cache = MemcachedCache::new("sessions")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the Memcached client cannot be created.
    pub fn new(pool_name: &str) -> Result<Self> {
        let memcached_url = std::env::var("MEMCACHED_URL")
            .unwrap_or_else(|_| "memcache://127.0.0.1:11211".to_string());
        Self::with_url(&memcached_url, pool_name)
    }

    /// Create new Memcached cache with an explicit URL
    ///
    /// # Errors
    ///
    /// Returns an error if the Memcached client cannot be created or the version check fails.
    pub fn with_url(memcached_url: &str, pool_name: &str) -> Result<Self> {
        info!(url = %memcached_url, pool = %pool_name, "Initializing Memcached Cache");

        let client = memcache::connect(memcached_url)
            .map_err(|e| anyhow!("Failed to connect to Memcached: {e}"))?;

        match client.version() {
            Ok(versions) => {
                info!(
                    url = %memcached_url,
                    server_count = versions.len(),
                    "Memcached Cache connected successfully"
                );
            }
            Err(e) => {
                return Err(anyhow!("Memcached connection test failed: {e}"));
            }
        }

        Ok(Self {
            client: RwLock::new(Some(client)),
            pool_name: pool_name.to_string(),
            known_keys: DashMap::new(),
            noreply: memcached_url.contains("noreply=true"),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}#{key}", self.pool_name)
    }

    fn with_client<T>(&self, op: impl FnOnce(&memcache::Client) -> Result<T>) -> Result<T> {
        let guard = self.client.read();
        let client = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Memcached pool '{}' is disconnected", self.pool_name))?;
        op(client)
    }

    fn remember(&self, key: &str, ttl: Option<Duration>) {
        self.known_keys
            .insert(key.to_string(), ttl.map(|ttl| Instant::now() + ttl));
    }
}

fn expiration_secs(ttl: Option<Duration>) -> u32 {
    match ttl {
        None => 0,
        Some(ttl) => {
            let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
            u32::try_from(secs)
                .unwrap_or(MAX_RELATIVE_EXPIRY_SECS)
                .clamp(1, MAX_RELATIVE_EXPIRY_SECS)
        }
    }
}

// ===== Trait Implementations =====

use crate::traits::{BackendCapabilities, CacheBackend, DistributedBackend};
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for MemcachedCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let result = self.with_client(|client| {
            client
                .get::<Vec<u8>>(&self.namespaced(key))
                .map_err(|e| anyhow!("Memcached GET failed: {e}"))
        });

        match result {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Bytes::from(value))
            }
            Ok(None) => {
                self.known_keys.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "[Memcached] GET failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        let value = self.get(key).await?;
        let remaining = self
            .known_keys
            .get(key)
            .and_then(|expires_at| *expires_at)
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()));
        Some((value, remaining))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.with_client(|client| {
            client
                .set(&self.namespaced(key), value.as_ref(), expiration_secs(ttl))
                .map_err(|e| anyhow!("Memcached SET failed: {e}"))
        })?;

        self.remember(key, ttl);
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?ttl, "[Memcached] Cached key with TTL");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<bool> {
        let stored = self.with_client(|client| {
            match client.add(&self.namespaced(key), value.as_ref(), expiration_secs(ttl)) {
                Ok(()) => Ok(true),
                // NOT_STORED / EXISTS: someone else holds the key
                Err(MemcacheError::CommandError(_)) => Ok(false),
                Err(e) => Err(anyhow!("Memcached ADD failed: {e}")),
            }
        })?;

        if stored {
            self.remember(key, ttl);
            self.sets.fetch_add(1, Ordering::Relaxed);
        }
        debug!(key = %key, stored, "[Memcached] ADD");
        Ok(stored)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.with_client(|client| {
            client
                .delete(&self.namespaced(key))
                .map_err(|e| anyhow!("Memcached DELETE failed: {e}"))
        })?;
        self.known_keys.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self.known_keys.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            self.remove(key).await?;
        }
        debug!(count = keys.len(), pool = %self.pool_name, "[Memcached] Cleared known keys");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let now = Instant::now();
        self.known_keys
            .retain(|_, expires_at| expires_at.is_none_or(|at| at > now));
        Ok(self.known_keys.iter().map(|e| e.key().clone()).collect())
    }

    async fn health_check(&self) -> bool {
        self.with_client(|client| {
            client
                .version()
                .map_err(|e| anyhow!("Memcached VERSION failed: {e}"))
        })
        .is_ok()
    }

    fn name(&self) -> &str {
        "Memcached"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
            .with_atomic_claim(true)
            .with_native_async_writes(self.noreply)
    }

    fn as_distributed(&self) -> Option<&dyn DistributedBackend> {
        Some(self)
    }
}

#[async_trait]
impl DistributedBackend for MemcachedCache {
    async fn disconnect(&self) {
        if self.client.write().take().is_some() {
            self.known_keys.clear();
            info!(pool = %self.pool_name, "[Memcached] Disconnected");
        }
    }

    fn pool_name(&self) -> &str {
        &self.pool_name
    }

    async fn runtime_stats(&self) -> Result<HashMap<String, String>> {
        let servers = self.with_client(|client| {
            client
                .stats()
                .map_err(|e| anyhow!("Failed to get Memcached stats: {e}"))
        })?;

        let single = servers.len() == 1;
        let mut stats = HashMap::new();
        for (server, values) in servers {
            for (name, value) in values {
                let key = if single { name } else { format!("{server}/{name}") };
                stats.insert(key, value);
            }
        }
        stats.insert("tracked_keys".into(), self.known_keys.len().to_string());
        Ok(stats)
    }
}
