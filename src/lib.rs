//! Tiered Cache
//!
//! A two-tier caching library for Rust featuring:
//! - **Secondary Tier**: Fast in-memory caching (Moka by default), every entry TTL-capped
//! - **Primary Tier**: Authoritative distributed cache (Redis by default)
//! - **Asynchronous Primary Writes**: `set` returns once the secondary holds the value;
//!   the primary write runs on a bounded worker pool
//! - **Cache Stampede Protection**: refresh-ahead fetching with dogpile markers, so
//!   one background refresh runs per expired key while callers get the stale value
//! - **Pluggable Backends**: anything implementing `CacheBackend`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tiered_cache::CacheSystem;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystem::new().await?;
//!
//!     // Write both tiers (primary asynchronously)
//!     cache.tiered()
//!         .set("user:1", Bytes::from_static(b"alice"), Some(Duration::from_secs(300)))
//!         .await?;
//!
//!     // Stale-while-refresh fetch: fresh for 60s, served stale for up to 300s
//!     let report = cache.stampede()
//!         .fetch("report:daily", Duration::from_secs(60), 5, || async {
//!             anyhow::Ok(Some(Bytes::from_static(b"expensive")))
//!         })
//!         .await?;
//!
//!     tracing::info!(hit_rate = cache.tiered().stats().hit_rate, ?report, "done");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! caller → StampedeCache (optional) → TieredCache → secondary (Moka)
//!                                                 → primary   (Redis)
//! ```

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod backends;
pub mod builder;
pub mod codecs;
pub mod error;
pub(crate) mod serde_secs;
pub mod stampede;
pub mod tiered_cache;
pub mod traits;
pub mod worker_pool;

pub use backends::DashMapCache;

#[cfg(feature = "moka")]
pub use backends::{MokaCache, MokaCacheConfig};

#[cfg(feature = "redis")]
pub use backends::RedisCache;

#[cfg(feature = "backend-memcached")]
pub use backends::MemcachedCache;

pub use builder::CacheSystemBuilder;
pub use codecs::JsonCodec;
pub use error::PoolError;
pub use stampede::{StampedeCache, StampedeConfig, StampedeStats};
pub use tiered_cache::{DistributedTier, TieredCache, TieredCacheConfig, TieredCacheStats, WriteMode};
pub use traits::{BackendCapabilities, CacheBackend, CacheCodec, DistributedBackend, Fetcher};
pub use worker_pool::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};

// Re-export async_trait for user convenience
pub use async_trait::async_trait;

/// Main entry point for the Tiered Cache system
///
/// Bundles a `TieredCache` and a `StampedeCache` layered on top of it.
///
/// # Example
///
/// ```rust,no_run
/// use tiered_cache::CacheSystem;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let cache = CacheSystem::new().await?;
///
///     let tiered = cache.tiered();
///     let stampede = cache.stampede();
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CacheSystem {
    /// Primary/secondary orchestrator
    pub tiered: Arc<TieredCache>,
    /// Stampede-protected fetch layer over `tiered`
    pub stampede: Arc<StampedeCache>,
}

impl CacheSystem {
    /// Create new cache system with default configuration
    ///
    /// # Configuration
    ///
    /// Redis connection is configured via `REDIS_URL` environment variable.
    /// Default: `redis://127.0.0.1:6379`
    ///
    /// # Errors
    ///
    /// Returns an error if a default backend cannot be initialized.
    pub async fn new() -> Result<Self> {
        CacheSystemBuilder::new().build().await
    }

    /// Create cache system with custom Redis URL and key namespace
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tiered_cache::CacheSystem;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let cache = CacheSystem::with_redis_url("redis://custom:6379", "orders").await?;
    ///     Ok(())
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if Redis is unreachable or a backend cannot be initialized.
    #[cfg(feature = "redis")]
    pub async fn with_redis_url(redis_url: &str, namespace: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Tiered Cache System with custom Redis URL");
        let primary = Arc::new(RedisCache::with_url(redis_url, namespace).await?);
        CacheSystemBuilder::new().with_primary(primary).build().await
    }

    /// Perform health check on both tiers
    ///
    /// Returns `true` if at least the secondary is operational; a primary
    /// failure is tolerated (reads still hit the secondary).
    pub async fn health_check(&self) -> bool {
        let secondary_ok = self.tiered.secondary().health_check().await;
        let primary_ok = self.tiered.primary().health_check().await;

        if secondary_ok && primary_ok {
            info!("Tiered Cache health check passed");
            true
        } else {
            warn!(secondary_ok = %secondary_ok, primary_ok = %primary_ok, "Tiered Cache health check - partial failure");
            secondary_ok
        }
    }

    /// Primary/secondary orchestrator
    #[must_use]
    pub fn tiered(&self) -> &Arc<TieredCache> {
        &self.tiered
    }

    /// Stampede-protected fetch layer
    #[must_use]
    pub fn stampede(&self) -> &Arc<StampedeCache> {
        &self.stampede
    }

    /// Drain background refreshes, then queued primary writes
    ///
    /// Returns `true` if both pools drained within `grace` each.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let refreshes = self.stampede.shutdown(grace).await;
        let writes = self.tiered.shutdown(grace).await;
        refreshes && writes
    }
}
