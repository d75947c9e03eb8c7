//! Stampede Protection Example
//!
//! Shows refresh-ahead fetching: one caller computes, concurrent callers get the
//! stale value while a single background refresh runs.
//!
//! Run with: cargo run --example stampede_protection
//!
//! Uses an in-process store, so no server is needed.

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tiered_cache::{CacheBackend, DashMapCache, StampedeCache, StampedeConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!("=== Tiered Cache: Stampede Protection ===\n");

    let store = Arc::new(DashMapCache::new());
    let cache = Arc::new(StampedeCache::new(
        Some(store.clone() as Arc<dyn CacheBackend>),
        StampedeConfig::default().with_recovery_window(Duration::from_secs(5)),
    )?);

    let computations = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(1);

    let slow_query = {
        let computations = computations.clone();
        move || {
            let computations = computations.clone();
            async move {
                let n = computations.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(300)).await;
                anyhow::Ok(Some(Bytes::from(format!("report #{n}"))))
            }
        }
    };

    // 1. Cold key: computed inline
    let start = Instant::now();
    let value = cache.fetch("report:daily", ttl, 10, slow_query.clone()).await?;
    println!("Cold fetch: {value:?} in {:?}", start.elapsed());

    // 2. Let the fresh window lapse
    tokio::time::sleep(ttl + Duration::from_millis(100)).await;

    // 3. 100 concurrent callers on a stale key
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..100 {
        let cache = cache.clone();
        let fetcher = slow_query.clone();
        handles.push(tokio::spawn(async move {
            cache.fetch("report:daily", ttl, 10, fetcher).await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    println!("100 stale fetches answered in {:?}", start.elapsed());

    // 4. Wait for the single background refresh
    cache.wait_for_refreshes().await;
    let value = cache.fetch("report:daily", ttl, 10, slow_query).await?;
    println!("After refresh: {value:?}");

    let stats = cache.stats();
    println!("\n=== Stampede Statistics ===");
    println!("Computations: {}", computations.load(Ordering::SeqCst));
    println!("Fresh hits: {}", stats.fresh_hits);
    println!("Stale hits: {}", stats.stale_hits);
    println!("Refreshes scheduled: {}", stats.refreshes_scheduled);
    println!("Refreshes completed: {}", stats.refreshes_completed);

    cache.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
