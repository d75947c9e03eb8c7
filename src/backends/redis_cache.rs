//! Redis Cache - Distributed Cache Backend
//!
//! Redis-based distributed cache, the default primary (authoritative) tier.
//! All keys live under a namespace (`<namespace>:<key>`) so that `clear` and
//! `keys` only touch entries owned by this cache.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "tiered_cache";

/// Redis distributed cache with `ConnectionManager` for automatic reconnection
///
/// - Distributed caching across multiple instances
/// - Millisecond TTLs (`PX`) and TTL introspection (`PTTL`)
/// - Atomic `set_if_absent` through `SET NX`
/// - Namespaced `SCAN`-based key enumeration and clearing
pub struct RedisCache {
    /// Redis connection manager; `None` after `disconnect`
    conn_manager: RwLock<Option<ConnectionManager>>,
    /// Key namespace, also reported as the pool name
    namespace: String,
    /// Hit counter
    hits: Arc<AtomicU64>,
    /// Miss counter
    misses: Arc<AtomicU64>,
    /// Set counter
    sets: Arc<AtomicU64>,
}

impl RedisCache {
    /// Create new Redis cache from `REDIS_URL` (default `redis://127.0.0.1:6379`)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn new() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url, DEFAULT_NAMESPACE).await
    }

    /// Create new Redis cache with custom URL and namespace
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    /// * `namespace` - Prefix for every key written by this cache
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn with_url(redis_url: &str, namespace: &str) -> Result<Self> {
        info!(redis_url = %redis_url, namespace = %namespace, "Initializing Redis Cache with ConnectionManager");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection manager")?;

        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis Cache connected successfully (ConnectionManager enabled)");

        Ok(Self {
            conn_manager: RwLock::new(Some(conn_manager)),
            namespace: namespace.to_string(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn_manager
            .read()
            .clone()
            .ok_or_else(|| anyhow!("Redis cache '{}' is disconnected", self.namespace))
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// SCAN pattern matching every key of this namespace and nothing else
    fn namespace_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.namespace))
    }

    /// Scan raw (namespaced) keys matching a glob-style pattern
    ///
    /// Uses Redis SCAN (non-blocking, cursor-based iteration).
    async fn scan_raw(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let result: (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            cursor = result.0;
            keys.extend(result.1);

            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }
}

/// Escape Redis glob metacharacters so `text` matches literally
fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn parse_info(info: &str) -> HashMap<String, String> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ===== Trait Implementations =====

use crate::traits::{BackendCapabilities, CacheBackend, DistributedBackend};
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let Ok(mut conn) = self.connection() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let result: redis::RedisResult<Option<Vec<u8>>> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Bytes::from(value))
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "[Redis] GET failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        let value = self.get(key).await?;
        let mut conn = self.connection().ok()?;

        // PTTL: -1 = no expiry, -2 = key vanished between the two commands
        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .unwrap_or(-1);

        let ttl = if ttl_ms > 0 {
            Some(Duration::from_millis(ttl_ms.unsigned_abs()))
        } else {
            None
        };

        Some((value, ttl))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection()?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(value.as_ref());
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;

        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?ttl, "[Redis] Cached key with TTL");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.connection()?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(value.as_ref()).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;

        let stored = reply.is_some();
        if stored {
            self.sets.fetch_add(1, Ordering::Relaxed);
        }
        debug!(key = %key, stored, "[Redis] SET NX");
        Ok(stored)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let raw = self.scan_raw(&self.namespace_pattern()).await?;
        if raw.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        for chunk in raw.chunks(500) {
            let _: () = redis::cmd("DEL").arg(chunk).query_async(&mut conn).await?;
        }
        debug!(count = raw.len(), namespace = %self.namespace, "[Redis] Cleared namespace");
        Ok(())
    }

    async fn key_exists(&self, key: &str) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        redis::cmd("EXISTS")
            .arg(self.namespaced(key))
            .query_async::<i64>(&mut conn)
            .await
            .is_ok_and(|count| count > 0)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let prefix = format!("{}:", self.namespace);
        let raw = self.scan_raw(&self.namespace_pattern()).await?;
        Ok(raw
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok_and(|pong| pong == "PONG")
    }

    fn name(&self) -> &str {
        "Redis"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default().with_atomic_claim(true)
    }

    fn as_distributed(&self) -> Option<&dyn DistributedBackend> {
        Some(self)
    }
}

#[async_trait]
impl DistributedBackend for RedisCache {
    async fn disconnect(&self) {
        if self.conn_manager.write().take().is_some() {
            info!(namespace = %self.namespace, "[Redis] Disconnected");
        }
    }

    fn pool_name(&self) -> &str {
        &self.namespace
    }

    async fn runtime_stats(&self) -> Result<HashMap<String, String>> {
        let mut conn = self.connection()?;
        let info: String = redis::cmd("INFO")
            .query_async(&mut conn)
            .await
            .context("Redis INFO failed")?;

        let mut stats = parse_info(&info);
        stats.insert("client_hits".into(), self.hits.load(Ordering::Relaxed).to_string());
        stats.insert("client_misses".into(), self.misses.load(Ordering::Relaxed).to_string());
        stats.insert("client_sets".into(), self.sets.load(Ordering::Relaxed).to_string());
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info_skips_sections_and_blank_lines() {
        let info = "# Server\r\nredis_version:7.2.4\r\n\r\n# Stats\r\nkeyspace_hits:42\r\n";
        let stats = parse_info(info);
        assert_eq!(stats.get("redis_version").map(String::as_str), Some("7.2.4"));
        assert_eq!(stats.get("keyspace_hits").map(String::as_str), Some("42"));
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn sub_millisecond_ttl_rounds_up() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("orders"), "orders");
        assert_eq!(escape_glob("a*"), "a\\*");
        assert_eq!(escape_glob("t?[x]"), "t\\?\\[x\\]");
        assert_eq!(escape_glob("back\\slash"), "back\\\\slash");
    }
}
