//! Cache System Builder
//!
//! Provides a flexible builder pattern for constructing `CacheSystem` with custom backends.
//!
//! # Example: Using Default Backends
//!
//! ```rust,no_run
//! use tiered_cache::CacheSystemBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystemBuilder::new()
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Backends
//!
//! ```rust
//! use tiered_cache::{CacheSystemBuilder, TieredCacheConfig, WriteMode};
//! use tiered_cache::backends::DashMapCache;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = CacheSystemBuilder::new()
//!     .with_primary(Arc::new(DashMapCache::new()))
//!     .with_secondary(Arc::new(DashMapCache::new()))
//!     .with_tiered_config(TieredCacheConfig::default().with_write_mode(WriteMode::Sync))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::stampede::{StampedeCache, StampedeConfig};
use crate::tiered_cache::{TieredCache, TieredCacheConfig};
use crate::traits::CacheBackend;
use crate::CacheSystem;

/// Builder for constructing `CacheSystem` with custom backends
///
/// # Default Behavior
///
/// Tiers that are not provided are created on `build`:
/// - **Secondary**: Moka in-memory cache (`DashMapCache` without the `moka` feature)
/// - **Primary**: Redis distributed cache from `REDIS_URL` (requires the `redis` feature)
pub struct CacheSystemBuilder {
    primary: Option<Arc<dyn CacheBackend>>,
    secondary: Option<Arc<dyn CacheBackend>>,
    tiered_config: TieredCacheConfig,
    stampede_config: StampedeConfig,
}

impl CacheSystemBuilder {
    /// Create a new builder with no custom backends configured
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: None,
            secondary: None,
            tiered_config: TieredCacheConfig::default(),
            stampede_config: StampedeConfig::default(),
        }
    }

    /// Configure the authoritative (primary) tier
    #[must_use]
    pub fn with_primary(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    /// Configure the fast (secondary) tier
    #[must_use]
    pub fn with_secondary(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.secondary = Some(backend);
        self
    }

    #[must_use]
    pub fn with_tiered_config(mut self, config: TieredCacheConfig) -> Self {
        self.tiered_config = config;
        self
    }

    #[must_use]
    pub fn with_stampede_config(mut self, config: StampedeConfig) -> Self {
        self.stampede_config = config;
        self
    }

    /// Build the `CacheSystem` with configured or default backends
    ///
    /// # Errors
    ///
    /// Returns an error if a default backend fails to initialize (e.g. Redis
    /// connection error), if no primary is available, or if a pool
    /// configuration is invalid.
    pub async fn build(self) -> Result<CacheSystem> {
        info!("Building Tiered Cache System");

        let secondary = match self.secondary {
            Some(backend) => {
                info!(backend = %backend.name(), "Using custom secondary backend");
                backend
            }
            None => default_secondary()?,
        };

        let primary = match self.primary {
            Some(backend) => {
                info!(backend = %backend.name(), "Using custom primary backend");
                backend
            }
            None => default_primary().await?,
        };

        let tiered = Arc::new(TieredCache::new(primary, secondary, self.tiered_config)?);
        let stampede = Arc::new(StampedeCache::new(
            Some(Arc::clone(&tiered) as Arc<dyn CacheBackend>),
            self.stampede_config,
        )?);

        info!("Tiered Cache System built successfully");
        Ok(CacheSystem { tiered, stampede })
    }
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "moka")]
fn default_secondary() -> Result<Arc<dyn CacheBackend>> {
    use crate::backends::{MokaCache, MokaCacheConfig};
    info!("Using default secondary backend (Moka)");
    Ok(Arc::new(MokaCache::new(MokaCacheConfig::default())?))
}

#[cfg(not(feature = "moka"))]
#[allow(clippy::unnecessary_wraps)]
fn default_secondary() -> Result<Arc<dyn CacheBackend>> {
    info!("Using default secondary backend (DashMap)");
    Ok(Arc::new(crate::backends::DashMapCache::new()))
}

#[cfg(feature = "redis")]
async fn default_primary() -> Result<Arc<dyn CacheBackend>> {
    info!("Using default primary backend (Redis)");
    Ok(Arc::new(crate::backends::RedisCache::new().await?))
}

#[cfg(not(feature = "redis"))]
#[allow(clippy::unused_async)]
async fn default_primary() -> Result<Arc<dyn CacheBackend>> {
    anyhow::bail!("no primary backend configured and the `redis` feature is disabled")
}
