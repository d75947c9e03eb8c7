//! Worker Pool - Bounded Background Task Execution
//!
//! Executes fire-and-forget futures (asynchronous primary writes, background
//! recomputes) on a bounded set of tokio tasks.
//!
//! # Behaviour
//!
//! - Workers are spawned lazily on the ambient tokio runtime, up to `max_workers`
//! - Workers above `min_workers` exit after `idle_timeout` without work
//! - The queue is bounded (`queue_capacity: Some(n)`) or unbounded (`None`)
//! - A panicking task is counted and does not take its worker down
//! - Dropping the pool closes the queue; workers drain what is left and exit
//!
//! Each `TieredCache` and each `StampedeCache` owns its own pool, so a hung
//! recompute can never occupy a worker needed for writes.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PoolError;

type Task = BoxFuture<'static, ()>;

/// Configuration for `WorkerPool`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Workers kept alive while idle
    pub min_workers: usize,
    /// Upper bound on concurrently running workers
    pub max_workers: usize,
    /// Maximum queued tasks; `None` = unbounded
    pub queue_capacity: Option<usize>,
    /// Idle time after which a worker above `min_workers` exits
    #[serde(with = "crate::serde_secs")]
    pub idle_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 5,
            max_workers: 100,
            queue_capacity: None,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl WorkerPoolConfig {
    #[must_use]
    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: Option<usize>) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Check the configuration for contradictions
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` when `max_workers` is zero or below
    /// `min_workers`, or when the queue capacity is zero.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig("max_workers must be at least 1".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(PoolError::InvalidConfig("queue_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

enum QueueSender {
    Bounded(mpsc::Sender<Task>),
    Unbounded(mpsc::UnboundedSender<Task>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<Task>),
    Unbounded(mpsc::UnboundedReceiver<Task>),
}

enum SendFailure {
    Full,
    Closed,
}

impl QueueSender {
    fn try_send(&self, task: Task) -> Result<(), SendFailure> {
        match self {
            Self::Bounded(tx) => tx.try_send(task).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendFailure::Full,
                mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
            }),
            Self::Unbounded(tx) => tx.send(task).map_err(|_| SendFailure::Closed),
        }
    }
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Task> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

struct PoolInner {
    name: String,
    config: WorkerPoolConfig,
    sender: RwLock<Option<QueueSender>>,
    receiver: tokio::sync::Mutex<QueueReceiver>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    idle_notify: Notify,
    workers: AtomicUsize,
    idle: AtomicUsize,
    queued: AtomicUsize,
    pending: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
    reaped: AtomicU64,
}

impl PoolInner {
    /// Give up a worker slot if the pool is above its minimum.
    ///
    /// Work that was queued while this worker was deciding keeps it alive.
    fn try_retire(&self) -> bool {
        let mut current = self.workers.load(Ordering::SeqCst);
        loop {
            if current <= self.config.min_workers {
                return false;
            }
            match self.workers.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if self.queued.load(Ordering::SeqCst) > 0 {
            self.workers.fetch_add(1, Ordering::SeqCst);
            return false;
        }

        self.reaped.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn finish_task(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle_notify.notify_waiters();
        }
    }
}

async fn worker_loop(inner: Arc<PoolInner>) {
    debug!(pool = %inner.name, "Worker started");
    loop {
        inner.idle.fetch_add(1, Ordering::SeqCst);
        let next = tokio::time::timeout(inner.config.idle_timeout, async {
            inner.receiver.lock().await.recv().await
        })
        .await;
        inner.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Ok(Some(task)) => {
                inner.queued.fetch_sub(1, Ordering::SeqCst);
                match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(()) => {
                        inner.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        inner.panicked.fetch_add(1, Ordering::Relaxed);
                        warn!(pool = %inner.name, "Worker task panicked");
                    }
                }
                inner.finish_task();
            }
            Ok(None) => {
                inner.workers.fetch_sub(1, Ordering::SeqCst);
                break;
            }
            Err(_) => {
                if inner.try_retire() {
                    debug!(pool = %inner.name, "Idle worker retired");
                    break;
                }
            }
        }
    }
    debug!(pool = %inner.name, "Worker stopped");
}

/// Worker pool statistics
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolStats {
    pub name: String,
    pub workers: usize,
    pub idle_workers: usize,
    pub queued: usize,
    /// Queued plus running tasks
    pub pending: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub rejected: u64,
    pub reaped: u64,
}

/// Bounded pool of tokio worker tasks
///
/// The pool is owned by the component that created it; dropping it closes the
/// queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a new pool. No worker is spawned until the first submit.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is rejected.
    pub fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let name = name.into();

        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
        };

        info!(
            pool = %name,
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            queue_capacity = ?config.queue_capacity,
            "Initializing worker pool"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                config,
                sender: RwLock::new(Some(sender)),
                receiver: tokio::sync::Mutex::new(receiver),
                handles: Mutex::new(Vec::new()),
                idle_notify: Notify::new(),
                workers: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                reaped: AtomicU64::new(0),
            }),
        })
    }

    /// Pool name (used in logs)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a task without waiting for it to run
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the bounded queue has no free slot
    /// - `PoolError::Closed` after `shutdown`
    /// - `PoolError::NoRuntime` when called outside a tokio runtime
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = &self.inner;
        let Ok(runtime) = Handle::try_current() else {
            inner.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::NoRuntime {
                pool: inner.name.clone(),
            });
        };

        {
            let sender = inner.sender.read();
            let Some(sender) = sender.as_ref() else {
                inner.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Closed {
                    pool: inner.name.clone(),
                });
            };

            inner.pending.fetch_add(1, Ordering::SeqCst);
            inner.queued.fetch_add(1, Ordering::SeqCst);
            if let Err(failure) = sender.try_send(task.boxed()) {
                inner.queued.fetch_sub(1, Ordering::SeqCst);
                inner.finish_task();
                inner.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(match failure {
                    SendFailure::Full => PoolError::QueueFull {
                        pool: inner.name.clone(),
                        capacity: inner.config.queue_capacity.unwrap_or_default(),
                    },
                    SendFailure::Closed => PoolError::Closed {
                        pool: inner.name.clone(),
                    },
                });
            }
        }

        inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.maybe_spawn_worker(&runtime);
        Ok(())
    }

    fn maybe_spawn_worker(&self, runtime: &Handle) {
        let inner = &self.inner;
        // Every queued task already has an idle worker to pick it up
        if inner.idle.load(Ordering::SeqCst) >= inner.queued.load(Ordering::SeqCst) {
            return;
        }

        let mut current = inner.workers.load(Ordering::SeqCst);
        loop {
            if current >= inner.config.max_workers {
                return;
            }
            match inner.workers.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let handle = runtime.spawn(worker_loop(Arc::clone(inner)));
        let mut handles = inner.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait until no task is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle_notify.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close the queue and wait up to `grace` for workers to drain it.
    ///
    /// Returns `true` if every worker finished in time; stragglers are aborted
    /// otherwise.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.close();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drained = tokio::time::timeout(grace, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(pool = %self.inner.name, "Worker pool did not drain in time, aborting workers");
            for abort in aborts {
                abort.abort();
            }
        }
        info!(pool = %self.inner.name, drained, "Worker pool shut down");
        drained
    }

    /// Whether `shutdown` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.sender.read().is_none()
    }

    fn close(&self) {
        self.inner.sender.write().take();
    }

    #[must_use]
    pub fn stats(&self) -> WorkerPoolStats {
        let inner = &self.inner;
        WorkerPoolStats {
            name: inner.name.clone(),
            workers: inner.workers.load(Ordering::SeqCst),
            idle_workers: inner.idle.load(Ordering::SeqCst),
            queued: inner.queued.load(Ordering::SeqCst),
            pending: inner.pending.load(Ordering::SeqCst),
            submitted: inner.submitted.load(Ordering::Relaxed),
            completed: inner.completed.load(Ordering::Relaxed),
            panicked: inner.panicked.load(Ordering::Relaxed),
            rejected: inner.rejected.load(Ordering::Relaxed),
            reaped: inner.reaped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}
