//! Sizeable executors for native compute work
//!
//! This module provides:
//! - [`Executor`] - the sizing surface the registry drives (resize, warm-up)
//! - [`ExecutorFactory`] - how the registry constructs executors
//! - [`WorkerPool`] - the default OS-thread implementation
//! - [`AffinityHook`] - one-time per-worker setup for native interop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  submit() ──► ┌──────────────────────────┐                   │
//! │               │  FIFO queue (Mutex)      │                   │
//! │               └────────────┬─────────────┘                   │
//! │                            │ Condvar                          │
//! │         ┌──────────────────┼──────────────────┐              │
//! │         ▼                  ▼                  ▼              │
//! │   [worker-0]         [worker-1]   ...   [worker-cap-1]       │
//! │   hook once          hook once          hook once            │
//! │                                                              │
//! │  resize(n): grow ─► spawn for queued work                    │
//! │             shrink ─► surplus workers retire after their task │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod affinity;
mod options;
mod pool;
mod task;

pub use affinity::{is_thread_pinned, AffinityHook};
pub use options::PoolOptions;
pub use pool::{WorkerPool, WorkerPoolFactory};
pub use task::{TaskError, TaskHandle};

/// Executor errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Requested size cannot hold any worker
    #[error("invalid pool size: {0}")]
    InvalidSize(usize),

    /// Pool was built with pre-allocation and has a fixed worker count
    #[error("pre-allocated pool cannot be resized")]
    PreAllocated,

    /// Pool no longer accepts work
    #[error("pool is closed")]
    Closed,

    /// OS refused to start a worker thread
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// Warm-up did not complete
    #[error("warm-up failed: {0}")]
    Warmup(String),
}

/// Sizing surface of a worker pool
///
/// Implementations must be safe to resize and warm up while other threads
/// submit and run tasks.
pub trait Executor: Send + Sync + 'static {
    /// Current capacity
    fn cap(&self) -> usize;

    /// Workers currently alive
    fn running(&self) -> usize;

    /// Change capacity without dropping queued or running work
    fn resize(&self, size: usize) -> Result<(), ExecutorError>;

    /// Spin up and park workers up to capacity, each running `hook` once
    fn warmup(&self, hook: Option<AffinityHook>) -> Result<(), ExecutorError>;
}

/// Constructs executors for the registry
pub trait ExecutorFactory: Send + Sync + 'static {
    /// Executor type produced
    type Executor: Executor;

    /// Build an executor with the given initial capacity
    fn create(
        &self,
        name: &str,
        size: usize,
        options: PoolOptions,
    ) -> Result<Self::Executor, ExecutorError>;
}
