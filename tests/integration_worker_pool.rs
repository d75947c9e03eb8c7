//! Integration tests for the worker pool
//!
//! Tests task execution, worker limits, queue capacity, idle reaping and shutdown

mod common;

use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::{PoolError, WorkerPool, WorkerPoolConfig};
use tokio::sync::Semaphore;

fn pool(config: WorkerPoolConfig) -> WorkerPool {
    WorkerPool::new("test-pool", config).unwrap_or_else(|e| panic!("Failed to build pool: {e}"))
}

/// Every submitted task runs; wait_idle returns once they are done
#[tokio::test]
async fn test_runs_all_submitted_tasks() {
    let pool = pool(WorkerPoolConfig::default());
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let counter = Arc::clone(&counter);
        pool.submit(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_or_else(|e| panic!("submit: {e}"));
    }

    pool.wait_idle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 20);

    let stats = pool.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.completed, 20);
    assert_eq!(stats.pending, 0);
    assert!(stats.workers >= 1);
}

/// No more than max_workers tasks run at once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_respects_max_workers() {
    let pool = pool(
        WorkerPoolConfig::default()
            .with_min_workers(0)
            .with_max_workers(2),
    );
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        pool.submit(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap_or_else(|e| panic!("submit: {e}"));
    }

    pool.wait_idle().await;
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(pool.stats().workers <= 2);
    assert_eq!(pool.stats().completed, 10);
}

/// A bounded queue rejects work when full
#[tokio::test]
async fn test_bounded_queue_rejects_when_full() {
    let pool = pool(
        WorkerPoolConfig::default()
            .with_min_workers(0)
            .with_max_workers(1)
            .with_queue_capacity(Some(1)),
    );
    let gate = Arc::new(Semaphore::new(0));

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let gate = Arc::clone(&gate);
        outcomes.push(pool.submit(async move {
            let _ = gate.acquire().await;
        }));
    }

    let full = outcomes
        .iter()
        .filter(|r| matches!(r, Err(PoolError::QueueFull { capacity: 1, .. })))
        .count();
    assert!(full >= 1, "expected at least one QueueFull rejection");
    assert_eq!(pool.stats().rejected as usize, full);

    gate.add_permits(3);
    pool.wait_idle().await;
    assert_eq!(pool.stats().completed as usize, 3 - full);
}

/// Workers above min_workers exit after idle_timeout
#[tokio::test(start_paused = true)]
async fn test_idle_workers_are_reaped() {
    let pool = pool(
        WorkerPoolConfig::default()
            .with_min_workers(1)
            .with_max_workers(4)
            .with_idle_timeout(Duration::from_secs(1)),
    );
    let gate = Arc::new(Semaphore::new(0));

    for _ in 0..4 {
        let gate = Arc::clone(&gate);
        pool.submit(async move {
            let _ = gate.acquire().await;
        })
        .unwrap_or_else(|e| panic!("submit: {e}"));
    }
    assert_eq!(pool.stats().workers, 4);

    gate.add_permits(4);
    pool.wait_idle().await;

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;

    let stats = pool.stats();
    assert_eq!(stats.workers, 1);
    assert_eq!(stats.reaped, 3);
}

/// A hung task does not hold back work queued right behind it
#[tokio::test]
async fn test_hung_task_does_not_starve_next_task() {
    let pool = pool(test_pool());

    // Leave exactly one idle worker behind
    pool.submit(async {}).unwrap_or_else(|e| panic!("submit: {e}"));
    pool.wait_idle().await;
    settle().await;
    assert_eq!(pool.stats().workers, 1);

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    pool.submit(std::future::pending::<()>())
        .unwrap_or_else(|e| panic!("submit: {e}"));
    pool.submit(async move {
        let _ = done_tx.send(());
    })
    .unwrap_or_else(|e| panic!("submit: {e}"));

    let finished = tokio::time::timeout(Duration::from_secs(2), done_rx).await;
    assert!(matches!(finished, Ok(Ok(()))), "quick task ran beside the hung one");
    assert_eq!(pool.stats().workers, 2);
}

async fn explode() {
    panic!("boom");
}

/// A panicking task is counted and the pool keeps working
#[tokio::test]
async fn test_panicking_task_does_not_kill_pool() {
    let pool = pool(test_pool());
    let counter = Arc::new(AtomicUsize::new(0));

    pool.submit(explode())
        .unwrap_or_else(|e| panic!("submit: {e}"));
    let after = Arc::clone(&counter);
    pool.submit(async move {
        after.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap_or_else(|e| panic!("submit: {e}"));

    pool.wait_idle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().panicked, 1);
    assert_eq!(pool.stats().completed, 1);
}

/// shutdown drains queued work, then rejects new submissions
#[tokio::test]
async fn test_shutdown_drains_and_closes() {
    let pool = pool(test_pool());
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let counter = Arc::clone(&counter);
        pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_or_else(|e| panic!("submit: {e}"));
    }

    assert!(pool.shutdown(Duration::from_secs(5)).await);
    assert_eq!(counter.load(Ordering::SeqCst), 5);
    assert!(pool.is_closed());
    assert!(matches!(pool.submit(async {}), Err(PoolError::Closed { .. })));
}

/// shutdown gives up on a task that never finishes
#[tokio::test]
async fn test_shutdown_aborts_hung_tasks() {
    let pool = pool(test_pool());
    pool.submit(std::future::pending::<()>())
        .unwrap_or_else(|e| panic!("submit: {e}"));
    settle().await;

    assert!(!pool.shutdown(Duration::from_millis(50)).await);
}
