//! Typed errors
//!
//! Backend and fetcher seams use `anyhow::Result`; the worker pool reports its
//! own failures through `PoolError` so callers can tell a full queue apart from a
//! closed pool.

use thiserror::Error;

/// Errors returned by [`WorkerPool`](crate::worker_pool::WorkerPool)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The bounded task queue has no free slot
    #[error("worker pool '{pool}' queue is full ({capacity} pending tasks)")]
    QueueFull { pool: String, capacity: usize },

    /// The pool has been shut down
    #[error("worker pool '{pool}' is shut down")]
    Closed { pool: String },

    /// A task was submitted outside of a tokio runtime
    #[error("worker pool '{pool}' requires a running tokio runtime")]
    NoRuntime { pool: String },

    /// Rejected configuration
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),
}
