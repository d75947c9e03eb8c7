//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Instrumented backends (counting, failing, write-gated, distributed)
//! - A scripted fetcher that can fail or hang on a chosen call
//! - Test key generators

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::backends::DashMapCache;
use tiered_cache::{
    async_trait, BackendCapabilities, CacheBackend, DistributedBackend, Fetcher, WorkerPoolConfig,
};
use tokio::sync::Semaphore;

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Small pool for tests: workers are cheap, queue unbounded
pub fn test_pool() -> WorkerPoolConfig {
    WorkerPoolConfig::default()
        .with_min_workers(1)
        .with_max_workers(4)
}

/// In-memory backend that counts calls and can pose as other backend kinds
///
/// - `with_capabilities` changes the advertised flags (`set_if_absent` stays the
///   non-atomic trait default regardless)
/// - `with_pool_name` makes it a `DistributedBackend`
/// - `gated` makes every write wait for a permit from `release_writes`
pub struct CountingBackend {
    inner: DashMapCache,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub removes: AtomicUsize,
    capabilities: BackendCapabilities,
    pool_name: Option<String>,
    pub disconnected: AtomicBool,
    write_gate: Option<Semaphore>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self {
            inner: DashMapCache::new(),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            capabilities: BackendCapabilities::default(),
            pool_name: None,
            disconnected: AtomicBool::new(false),
            write_gate: None,
        }
    }

    pub fn gated() -> Self {
        Self {
            write_gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_pool_name(mut self, pool_name: &str) -> Self {
        self.pool_name = Some(pool_name.to_string());
        self
    }

    /// Let `n` blocked writes through
    pub fn release_writes(&self, n: usize) {
        if let Some(gate) = &self.write_gate {
            gate.add_permits(n);
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Direct read that bypasses the counters
    pub async fn peek(&self, key: &str) -> Option<Bytes> {
        self.inner.get(key).await
    }

    /// Remaining TTL of `key`, bypassing the counters
    pub async fn peek_ttl(&self, key: &str) -> Option<Option<Duration>> {
        self.inner.get_with_ttl(key).await.map(|(_, ttl)| ttl)
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.write_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

impl Default for CountingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for CountingBackend {
    async fn get(&self, key: &str) -> Option<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_with_ttl(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.pass_gate().await;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.pass_gate().await;
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn key_exists(&self, key: &str) -> bool {
        self.inner.key_exists(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn health_check(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "Counting"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn as_distributed(&self) -> Option<&dyn DistributedBackend> {
        if self.pool_name.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl DistributedBackend for CountingBackend {
    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn pool_name(&self) -> &str {
        self.pool_name.as_deref().unwrap_or_default()
    }

    async fn runtime_stats(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([
            ("gets".to_string(), self.gets().to_string()),
            ("sets".to_string(), self.sets().to_string()),
        ]))
    }
}

/// Backend whose writes always fail and whose reads always miss
#[derive(Default)]
pub struct FailingBackend {
    pub write_attempts: AtomicUsize,
}

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Option<Bytes> {
        None
    }

    async fn set_with_ttl(&self, key: &str, _value: Bytes, _ttl: Option<Duration>) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("backend refused write for '{key}'"))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("backend refused delete for '{key}'"))
    }

    async fn clear(&self) -> Result<()> {
        Err(anyhow!("backend refused clear"))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Err(anyhow!("backend cannot enumerate keys"))
    }

    async fn health_check(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "Failing"
    }
}

/// Fetcher returning `v<n>` on its n-th call (1-based, shared across clones)
///
/// `hang_on` makes that call never complete; `fail_on` makes it return an error;
/// `empty_on` makes it return `Ok(None)`.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    calls: Arc<AtomicUsize>,
    hang_on: Option<usize>,
    fail_on: Option<usize>,
    empty_on: Option<usize>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn hang_on(mut self, call: usize) -> Self {
        self.hang_on = Some(call);
        self
    }

    #[must_use]
    pub fn fail_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }

    #[must_use]
    pub fn empty_on(mut self, call: usize) -> Self {
        self.empty_on = Some(call);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self) -> Result<Option<Bytes>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hang_on == Some(call) {
            std::future::pending::<()>().await;
        }
        if self.fail_on == Some(call) {
            return Err(anyhow!("source unavailable on call {call}"));
        }
        if self.empty_on == Some(call) {
            return Ok(None);
        }
        Ok(Some(Bytes::from(format!("v{call}"))))
    }
}

/// Shorthand for a static payload
pub fn bytes(value: &'static str) -> Bytes {
    Bytes::from_static(value.as_bytes())
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    use tokio::time::sleep;

    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    false
}

/// Let spawned tasks run without advancing the (possibly paused) clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("user");
        let key2 = test_key("user");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_user_"));
    }
}
