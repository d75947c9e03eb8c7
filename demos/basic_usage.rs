//! Basic Usage Example
//!
//! Demonstrates tiered set/get, backfill and statistics.
//!
//! Run with: cargo run --example basic_usage
//! (requires Redis at `REDIS_URL`, default `redis://127.0.0.1:6379`)

use bytes::Bytes;
use std::time::Duration;
use tiered_cache::{CacheBackend, CacheSystem};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!("=== Tiered Cache: Basic Usage ===\n");

    // 1. Initialize cache system (default: Moka secondary + Redis primary)
    let cache = CacheSystem::new().await?;

    // 2. Health check
    if cache.health_check().await {
        println!("✅ Cache system is healthy\n");
    }

    // 3. Store a value; returns once the secondary holds it
    let user = serde_json::json!({ "id": 1, "name": "Alice", "role": "admin" });
    cache
        .tiered()
        .set("user:1", Bytes::from(serde_json::to_vec(&user)?), Some(Duration::from_secs(300)))
        .await?;
    println!("Stored user:1 (primary write queued)");

    // 4. Read it back from the secondary
    if let Some(raw) = cache.tiered().get("user:1").await {
        let user: serde_json::Value = serde_json::from_slice(&raw)?;
        println!("✅ Retrieved from cache: {user}");
    }

    // 5. Drop it from the secondary only; the next read backfills from the primary
    cache.tiered().flush_writes().await;
    cache.tiered().secondary().remove("user:1").await?;
    if let Some((_, ttl)) = cache.tiered().get_with_ttl("user:1").await {
        println!("✅ Backfilled from primary, remaining TTL {ttl:?}");
    }

    // 6. Statistics
    let stats = cache.tiered().stats();
    println!("\n=== Cache Statistics ===");
    println!("Total requests: {}", stats.total_requests);
    println!("Secondary hits: {}", stats.secondary_hits);
    println!("Primary hits: {}", stats.primary_hits);
    println!("Misses: {}", stats.misses);
    println!("Hit rate: {:.2}%", stats.hit_rate);
    println!("Backfills: {}", stats.backfills);
    println!("Queued primary writes: {}", stats.queued_writes);

    cache.tiered().remove("user:1").await?;
    cache.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
