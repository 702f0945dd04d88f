//! # Query Node Worker Pools
//!
//! Named, lazily-created, resizable worker pools that move CPU-bound native
//! work (search, loading, miscellaneous dynamic calls) off the request path.
//!
//! ## Features
//!
//! - **Exactly-once lazy initialization**: each pool is built on first use, concurrent callers block until it is ready
//! - **Live sizing**: pool sizes follow configuration and hardware, recomputed on every change
//! - **In-place resize**: configuration changes resize the running pool without dropping queued or running work
//! - **Lock-free access**: steady-state lookups are a single atomic load
//! - **Affinity hooks**: workers run a one-time setup hook before native work, eagerly or on first task
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PoolRegistry                            │
//! │  get(kind) ─► OnceCell guard ─► ArcSwapOption<Executor>      │
//! └─────────────────────────────────────────────────────────────┘
//!        │ initial size                     ▲ change handler
//!        ▼                                  │
//! ┌──────────────────┐            ┌──────────────────────┐
//! │   sizing         │ ◄───────── │    ConfigSource       │
//! │ (config + cpus)  │            │  (ParamTable.watch)   │
//! └──────────────────┘            └──────────────────────┘
//!        │ new size
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ResizeController                           │
//! │  (reject non-positive, resize, warm eager pools, metrics)    │
//! └─────────────────────────────────────────────────────────────┘
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  (OS threads, FIFO queue, warm-up, idle purge)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use querynode_pools::prelude::*;
//!
//! let config = Arc::new(ParamTable::new());
//! config.set(keys::MAX_READ_CONCURRENCY, "8");
//! config.set(keys::CGO_POOL_SIZE_RATIO, "0.5");
//!
//! let registry = PoolRegistry::new(config.clone());
//! let pool = registry.search_pool().unwrap();
//! assert_eq!(pool.cap(), 4);
//!
//! let answer = pool.submit(|| 6 * 7).unwrap().wait().unwrap();
//! assert_eq!(answer, 42);
//!
//! // Operators change configuration; the live pool follows.
//! config.set(keys::MAX_READ_CONCURRENCY, "16");
//! assert_eq!(pool.cap(), 8);
//! ```

pub mod config;
pub mod executor;
pub mod hardware;
pub mod kind;
pub mod registry;
pub mod resize;
pub mod sizing;
pub mod telemetry;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{keys, ConfigEvent, ConfigSource, EventHandler, ParamTable, PoolParams};
    pub use crate::executor::{
        AffinityHook, Executor, ExecutorError, ExecutorFactory, PoolOptions, TaskError,
        TaskHandle, WorkerPool,
    };
    pub use crate::hardware::{FixedHardware, HardwareInfo, SystemHardware};
    pub use crate::kind::PoolKind;
    pub use crate::registry::{InitState, PoolRegistry, RegistryError};
    pub use crate::resize::{ResizeOutcome, ResizeStats};
}

// Re-export key types at crate root
pub use config::{ConfigEvent, ConfigSource, EventHandler, ParamTable, PoolParams};
pub use executor::{
    AffinityHook, Executor, ExecutorError, ExecutorFactory, PoolOptions, TaskError, TaskHandle,
    WorkerPool, WorkerPoolFactory,
};
pub use hardware::{FixedHardware, HardwareInfo, SystemHardware};
pub use kind::{PoolKind, WarmupPolicy};
pub use registry::{InitState, PoolRegistry, PoolRegistryBuilder, RegistryError};
pub use resize::{ResizeController, ResizeOutcome, ResizeStats};
