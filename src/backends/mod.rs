//! Cache Backend Implementations
//!
//! # Available Backends
//!
//! ## In-Memory (secondary tier, or single-process stores)
//! - **`DashMap`** - Simple concurrent HashMap-based cache (always available)
//! - **Moka** - High-performance concurrent cache with automatic eviction (feature: `moka`)
//!
//! ## Distributed (primary tier)
//! - **Redis** - Namespaced distributed cache with atomic claims (feature: `redis`)
//! - **Memcached** - Lightweight distributed cache (feature: `backend-memcached`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use tiered_cache::backends::{MokaCache, MokaCacheConfig, RedisCache};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let moka = MokaCache::new(MokaCacheConfig::default())?;
//! let redis = RedisCache::with_url("redis://127.0.0.1:6379", "orders").await?;
//! # Ok(())
//! # }
//! ```

pub mod dashmap_cache;

#[cfg(feature = "moka")]
pub mod moka_cache;

#[cfg(feature = "redis")]
pub mod redis_cache;

#[cfg(feature = "backend-memcached")]
pub mod memcached_cache;

pub use dashmap_cache::DashMapCache;

#[cfg(feature = "moka")]
pub use moka_cache::{MokaCache, MokaCacheConfig};

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

#[cfg(feature = "backend-memcached")]
pub use memcached_cache::MemcachedCache;
