//! Cache Backend Traits
//!
//! This module defines the trait abstractions that the tiered orchestrator and the
//! stampede-protected fetch layer consume.
//!
//! # Architecture
//!
//! - `CacheCodec`: Trait for pluggable serialization backends
//! - `CacheBackend`: Uniform contract every cache store implements
//! - `BackendCapabilities`: Optional capability flags, read once at construction
//! - `DistributedBackend`: Side-channel operations of networked stores
//! - `Fetcher`: The "compute value" operation wrapped by the fetch layer
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use tiered_cache::{CacheBackend, async_trait};
//! use bytes::Bytes;
//! use std::time::Duration;
//! use anyhow::Result;
//!
//! struct MyCustomCache {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl CacheBackend for MyCustomCache {
//!     async fn get(&self, key: &str) -> Option<Bytes> {
//!         // Your implementation
//!     }
//!
//!     async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
//!         // Your implementation
//!     }
//!
//!     async fn remove(&self, key: &str) -> Result<()> {
//!         // Your implementation
//!     }
//!
//!     async fn clear(&self) -> Result<()> {
//!         // Your implementation
//!     }
//!
//!     async fn keys(&self) -> Result<Vec<String>> {
//!         // Your implementation
//!     }
//!
//!     async fn health_check(&self) -> bool {
//!         // Your implementation
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// Trait for cache value serialization/deserialization
///
/// The core treats payloads as opaque bytes. Codecs are only used by the typed
/// helpers (`StampedeCache::fetch_typed`) to turn structured values into bytes.
///
/// # Example: Custom Codec
///
/// ```rust,ignore
/// use tiered_cache::CacheCodec;
/// use anyhow::Result;
/// use serde::{Serialize, de::DeserializeOwned};
///
/// #[derive(Debug)]
/// struct MyCustomCodec;
///
/// impl CacheCodec for MyCustomCodec {
///     fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
///         Ok(mycodec::serialize(value)?)
///     }
///
///     fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
///         Ok(mycodec::deserialize(bytes)?)
///     }
///
///     fn name(&self) -> &'static str {
///         "mycodec"
///     }
/// }
/// ```
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented by this codec.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Get the name of the codec (used for logging)
    fn name(&self) -> &'static str;
}

/// Optional capabilities a backend advertises.
///
/// The orchestrator and the fetch layer read these flags once, when they are
/// constructed, and never inspect the backend type at call time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Writes are already fire-and-forget inside the backend (e.g. Memcached
    /// `noreply` mode). The orchestrator writes such a primary inline instead of
    /// queueing the write on its own worker pool.
    pub native_async_writes: bool,
    /// `set_if_absent` is a single atomic backend operation (e.g. Redis `SET NX`).
    pub atomic_claim: bool,
}

impl BackendCapabilities {
    /// Capabilities with `native_async_writes` set
    #[must_use]
    pub fn with_native_async_writes(mut self, enabled: bool) -> Self {
        self.native_async_writes = enabled;
        self
    }

    /// Capabilities with `atomic_claim` set
    #[must_use]
    pub fn with_atomic_claim(mut self, enabled: bool) -> Self {
        self.atomic_claim = enabled;
        self
    }
}

/// Uniform contract implemented by every cache store
///
/// # TTL Semantics
///
/// `ttl: None` means "backend default / no expiry". Callers that accept a raw
/// `Duration` map `Duration::ZERO` to `None` before reaching a backend.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to support concurrent access across async tasks.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get value from cache by key
    ///
    /// Backend failures are reported as a miss.
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Get value together with its remaining TTL
    ///
    /// * `Some((value, Some(ttl)))` - Value found with remaining TTL
    /// * `Some((value, None))` - Value found, remaining TTL unknown or unlimited
    /// * `None` - Key not found or expired
    async fn get_with_ttl(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        self.get(key).await.map(|value| (value, None))
    }

    /// Set value in cache with time-to-live
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Store `value` only if `key` is absent; returns whether this call stored it
    ///
    /// The default is a plain get-then-set, so two concurrent callers can both
    /// observe `true`. Backends with a native primitive override this and set
    /// `BackendCapabilities::atomic_claim`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<bool> {
        if self.get(key).await.is_some() {
            return Ok(false);
        }
        self.set_with_ttl(key, value, ttl).await?;
        Ok(true)
    }

    /// Remove value from cache (succeeds if the key did not exist)
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the delete.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry owned by this store
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the operation.
    async fn clear(&self) -> Result<()>;

    /// Presence check, not a liveness guarantee
    async fn key_exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Enumerate keys currently held (order irrelevant)
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot enumerate its keys.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Check if cache backend is healthy
    async fn health_check(&self) -> bool;

    /// Get the name of this cache backend (used for logging)
    fn name(&self) -> &str {
        "unknown"
    }

    /// Capability flags of this backend
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// Distributed side-channel operations, if this backend is networked
    fn as_distributed(&self) -> Option<&dyn DistributedBackend> {
        None
    }
}

/// Side-channel operations of distributed (networked) backends
///
/// The tiered orchestrator forwards these to whichever of its tiers implements
/// them, primary preferred.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    /// Tear down connections; later operations fail or miss
    async fn disconnect(&self);

    /// Identity of the connection pool / namespace this backend uses
    fn pool_name(&self) -> &str;

    /// Server-side runtime statistics as flat key/value pairs
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be retrieved.
    async fn runtime_stats(&self) -> Result<HashMap<String, String>>;
}

/// The "compute value" operation wrapped by the fetch layer
///
/// `fetch` is called on the inline (miss) path. `fetch_background` is called by
/// background recompute tasks and defaults to `fetch`; override it when an
/// asynchronous-friendly variant exists (for example one that avoids holding a
/// request-scoped resource).
///
/// Any `Fn() -> impl Future<Output = Result<Option<Bytes>>> + 'static` closure is a
/// `Fetcher`; clone captured handles into the returned future.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Compute the value; `Ok(None)` means "no value available"
    ///
    /// # Errors
    ///
    /// Returns whatever error the underlying source reports.
    async fn fetch(&self) -> Result<Option<Bytes>>;

    /// Compute the value from a background recompute task
    ///
    /// # Errors
    ///
    /// Returns whatever error the underlying source reports.
    async fn fetch_background(&self) -> Result<Option<Bytes>> {
        self.fetch().await
    }
}

#[async_trait]
impl<F, Fut> Fetcher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Bytes>>> + Send + 'static,
{
    async fn fetch(&self) -> Result<Option<Bytes>> {
        (self)().await
    }
}
