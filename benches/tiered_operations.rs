//! Benchmarks for tiered cache reads and writes
//!
//! Uses an in-process `DashMapCache` as the primary so no server is needed.

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::{
    CacheBackend, CacheSystem, CacheSystemBuilder, DashMapCache, TieredCacheConfig, WriteMode,
};
use tokio::runtime::Runtime;

const TTL: Option<Duration> = Some(Duration::from_secs(300));

fn payload(size_bytes: usize) -> Bytes {
    Bytes::from("x".repeat(size_bytes))
}

fn build_cache(rt: &Runtime, write_mode: WriteMode) -> (CacheSystem, Arc<DashMapCache>) {
    rt.block_on(async {
        let primary = Arc::new(DashMapCache::new());
        let cache = CacheSystemBuilder::new()
            .with_primary(primary.clone())
            .with_tiered_config(TieredCacheConfig::default().with_write_mode(write_mode))
            .build()
            .await
            .unwrap_or_else(|_| panic!("Failed to build cache system"));
        (cache, primary)
    })
}

/// Reads answered by the secondary
fn bench_secondary_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let (cache, _) = build_cache(&rt, WriteMode::Async);

    rt.block_on(async {
        cache
            .tiered()
            .set("bench:hot", payload(1024), TTL)
            .await
            .unwrap_or_else(|_| panic!("Failed to set"));
    });

    c.bench_function("tiered_secondary_hit", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cache.tiered().get(black_box("bench:hot")).await);
        });
    });
}

/// Reads that miss the secondary and backfill from the primary
fn bench_primary_hit_backfill(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let (cache, primary) = build_cache(&rt, WriteMode::Async);

    rt.block_on(async {
        primary
            .set_with_ttl("bench:cold", payload(1024), TTL)
            .await
            .unwrap_or_else(|_| panic!("Failed to seed primary"));
    });

    c.bench_function("tiered_primary_hit_backfill", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cache.tiered().get("bench:cold").await);
            let _ = cache.tiered().secondary().remove("bench:cold").await;
        });
    });
}

/// `set` latency with queued vs inline primary writes
fn bench_set_write_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_set");

    for (label, mode) in [("async", WriteMode::Async), ("sync", WriteMode::Sync)] {
        let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
        let (cache, _) = build_cache(&rt, mode);

        for size in [128, 4096] {
            let value = payload(size);
            group.bench_with_input(BenchmarkId::new(label, size), &value, |b, value| {
                b.to_async(&rt).iter(|| async {
                    let key = format!("bench:set:{}", rand::random::<u16>());
                    cache
                        .tiered()
                        .set(&key, value.clone(), TTL)
                        .await
                        .unwrap_or_else(|_| panic!("Failed to set"));
                });
            });
        }

        rt.block_on(cache.tiered().flush_writes());
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_secondary_hit,
    bench_primary_hit_backfill,
    bench_set_write_modes
);
criterion_main!(benches);
