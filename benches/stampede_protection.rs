//! Benchmarks for stampede-protected fetching

use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::{CacheBackend, DashMapCache, StampedeCache, StampedeConfig};
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(60);

fn setup(rt: &Runtime) -> (Arc<StampedeCache>, Arc<DashMapCache>) {
    let _guard = rt.enter();
    let store = Arc::new(DashMapCache::new());
    let cache = StampedeCache::new(
        Some(store.clone() as Arc<dyn CacheBackend>),
        StampedeConfig::default(),
    )
    .unwrap_or_else(|_| panic!("Failed to create stampede cache"));
    (Arc::new(cache), store)
}

/// Fresh hits: value and dogpile marker both present
fn bench_fresh_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let (cache, _) = setup(&rt);

    rt.block_on(async {
        cache
            .fetch("bench:fresh", TTL, 5, || async {
                anyhow::Ok(Some(Bytes::from_static(b"computed")))
            })
            .await
            .unwrap_or_else(|_| panic!("Failed to seed"));
    });

    c.bench_function("stampede_fresh_hit", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                cache
                    .fetch("bench:fresh", TTL, 5, || async {
                        anyhow::Ok(Some(Bytes::from_static(b"computed")))
                    })
                    .await
                    .unwrap_or_else(|_| panic!("Failed to fetch")),
            );
        });
    });
}

/// 100 concurrent callers hitting a stale key: one refresh, 100 stale answers
fn bench_stale_herd(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let (cache, store) = setup(&rt);

    c.bench_function("stampede_100_concurrent_stale", |b| {
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            let store = store.clone();
            async move {
                let key = format!("bench:stale:{}", rand::random::<u32>());
                store
                    .set_with_ttl(&key, Bytes::from_static(b"stale"), Some(TTL * 5))
                    .await
                    .unwrap_or_else(|_| panic!("Failed to seed"));

                let mut handles = Vec::with_capacity(100);
                for _ in 0..100 {
                    let cache = cache.clone();
                    let key = key.clone();
                    handles.push(tokio::spawn(async move {
                        cache
                            .fetch(&key, TTL, 5, || async {
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                anyhow::Ok(Some(Bytes::from_static(b"fresh")))
                            })
                            .await
                            .unwrap_or_else(|_| panic!("Failed to fetch"))
                    }));
                }

                for handle in handles {
                    black_box(handle.await.unwrap_or_else(|_| panic!("Task failed")));
                }
            }
        });
    });

    rt.block_on(cache.wait_for_refreshes());
}

criterion_group!(benches, bench_fresh_hit, bench_stale_herd);
criterion_main!(benches);
