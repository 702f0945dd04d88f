//! Lazily-initialized registry of the named pools
//!
//! Each [`PoolKind`] owns one slot. The first caller of [`PoolRegistry::get`]
//! runs the slot's initialization exactly once; concurrent callers block until
//! it finishes. The finished pool is published through an atomically swappable
//! cell so that every later lookup is a lock-free load.
//!
//! # Lifecycle
//!
//! ```text
//! ┌───────────────┐  first get()  ┌──────────────┐  construction ok  ┌───────┐
//! │ Uninitialized │ ────────────► │ Initializing │ ────────────────► │ Ready │ ◄─┐
//! └───────────────┘               └──────────────┘                   └───────┘   │
//!                                        │ construction error            │ resize │
//!                                        ▼                               └────────┘
//!                                   ┌────────┐
//!                                   │ Failed │
//!                                   └────────┘
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{ConfigEvent, ConfigSource, EventHandler, PoolParams};
use crate::executor::{AffinityHook, Executor, ExecutorFactory, WorkerPoolFactory};
use crate::hardware::{HardwareInfo, SystemHardware};
use crate::kind::{PoolKind, WarmupPolicy};
use crate::resize::{ResizeController, ResizeOutcome, ResizeStats};
use crate::sizing;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The pool could not be constructed; the kind stays unavailable
    #[error("failed to initialize {kind} pool: {reason}")]
    InitializationFailure { kind: PoolKind, reason: String },
}

/// Initialization state of a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl InitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Failed,
        }
    }
}

struct PoolSlot<E> {
    kind: PoolKind,
    once: OnceCell<Result<(), RegistryError>>,
    handle: ArcSwapOption<E>,
    state: AtomicU8,
    /// Serializes read-config / compute / apply for this kind
    resize_lock: Mutex<()>,
}

impl<E> PoolSlot<E> {
    fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            once: OnceCell::new(),
            handle: ArcSwapOption::empty(),
            state: AtomicU8::new(InitState::Uninitialized as u8),
            resize_lock: Mutex::new(()),
        }
    }

    fn state(&self) -> InitState {
        InitState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: InitState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Builder for [`PoolRegistry`]
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use querynode_pools::{FixedHardware, ParamTable, PoolRegistry};
///
/// let config = Arc::new(ParamTable::new());
/// let registry = PoolRegistry::builder(config)
///     .with_hardware(Arc::new(FixedHardware::new(2)))
///     .build();
///
/// let pool = registry.dynamic_pool().unwrap();
/// assert_eq!(pool.cap(), 2);
/// ```
pub struct PoolRegistryBuilder {
    config: Arc<dyn ConfigSource>,
    hardware: Arc<dyn HardwareInfo>,
    affinity: AffinityHook,
    expiry: Duration,
}

impl PoolRegistryBuilder {
    /// Start from a configuration source, host hardware and thread pinning
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            hardware: Arc::new(SystemHardware),
            affinity: AffinityHook::pin_thread(),
            expiry: Duration::from_secs(1),
        }
    }

    /// Set the hardware source
    pub fn with_hardware(mut self, hardware: Arc<dyn HardwareInfo>) -> Self {
        self.hardware = hardware;
        self
    }

    /// Set the hook every worker runs before native work
    pub fn with_affinity_hook(mut self, hook: AffinityHook) -> Self {
        self.affinity = hook;
        self
    }

    /// Set how long idle workers of purgeable pools survive
    pub fn with_expiry_duration(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Build a registry of [`crate::executor::WorkerPool`]s
    pub fn build(self) -> Arc<PoolRegistry> {
        self.build_with(WorkerPoolFactory)
    }

    /// Build a registry using a custom executor factory
    pub fn build_with<F: ExecutorFactory>(self, factory: F) -> Arc<PoolRegistry<F>> {
        Arc::new_cyclic(|this| PoolRegistry {
            controller: ResizeController::new(self.affinity.clone()),
            config: self.config,
            hardware: self.hardware,
            affinity: self.affinity,
            expiry: self.expiry,
            factory,
            slots: PoolKind::ALL.map(PoolSlot::new),
            this: this.clone(),
        })
    }
}

/// Owner of the named worker pools
///
/// Construct one per process and hand the `Arc` to every caller that needs a
/// pool. Pools are created on first use and live as long as the registry.
pub struct PoolRegistry<F: ExecutorFactory = WorkerPoolFactory> {
    config: Arc<dyn ConfigSource>,
    hardware: Arc<dyn HardwareInfo>,
    affinity: AffinityHook,
    expiry: Duration,
    factory: F,
    controller: ResizeController,
    slots: [PoolSlot<F::Executor>; 3],
    this: Weak<Self>,
}

impl PoolRegistry {
    /// Registry of worker pools on host hardware
    pub fn new(config: Arc<dyn ConfigSource>) -> Arc<Self> {
        PoolRegistryBuilder::new(config).build()
    }

    pub fn builder(config: Arc<dyn ConfigSource>) -> PoolRegistryBuilder {
        PoolRegistryBuilder::new(config)
    }
}

impl<F: ExecutorFactory> PoolRegistry<F> {
    /// Ready pool for `kind`, initializing it on first use
    pub fn get(&self, kind: PoolKind) -> Result<Arc<F::Executor>, RegistryError> {
        let slot = self.slot(kind);
        if let Some(pool) = slot.handle.load_full() {
            return Ok(pool);
        }

        slot.once.get_or_init(|| self.initialize(slot)).clone()?;

        slot.handle
            .load_full()
            .ok_or_else(|| RegistryError::InitializationFailure {
                kind,
                reason: "pool handle missing after initialization".to_string(),
            })
    }

    /// Pool for search and query requests
    pub fn search_pool(&self) -> Result<Arc<F::Executor>, RegistryError> {
        self.get(PoolKind::Search)
    }

    /// Pool for miscellaneous dynamic native operations
    pub fn dynamic_pool(&self) -> Result<Arc<F::Executor>, RegistryError> {
        self.get(PoolKind::Dynamic)
    }

    /// Pool for segment and index loading
    pub fn load_pool(&self) -> Result<Arc<F::Executor>, RegistryError> {
        self.get(PoolKind::Load)
    }

    /// Initialization state of `kind`
    pub fn state(&self, kind: PoolKind) -> InitState {
        self.slot(kind).state()
    }

    /// Resize counters of `kind`
    pub fn resize_stats(&self, kind: PoolKind) -> ResizeStats {
        self.controller.metrics(kind)
    }

    /// Size `kind` would get from the current configuration and hardware
    pub fn target_size(&self, kind: PoolKind) -> i64 {
        let params = PoolParams::read(self.config.as_ref());
        sizing::target_size(kind, &params, self.hardware.cpu_num())
    }

    /// Resize entry point for the search pool
    pub fn resize_search_pool(&self, event: &ConfigEvent) -> Option<ResizeOutcome> {
        self.on_config_event(PoolKind::Search, event)
    }

    /// Resize entry point for the dynamic pool
    pub fn resize_dynamic_pool(&self, event: &ConfigEvent) -> Option<ResizeOutcome> {
        self.on_config_event(PoolKind::Dynamic, event)
    }

    /// Resize entry point for the load pool
    pub fn resize_load_pool(&self, event: &ConfigEvent) -> Option<ResizeOutcome> {
        self.on_config_event(PoolKind::Load, event)
    }

    /// Handle a configuration change for `kind`
    ///
    /// A pool that does not exist yet is initialized first. Returns `None`
    /// when the event carries no change or the pool cannot be initialized;
    /// otherwise the outcome of the resize attempt.
    pub fn on_config_event(&self, kind: PoolKind, event: &ConfigEvent) -> Option<ResizeOutcome> {
        if !event.has_updated {
            trace!(pool = kind.tag(), key = %event.key, "Ignoring unchanged configuration");
            return None;
        }

        let pool = match self.get(kind) {
            Ok(pool) => pool,
            Err(e) => {
                warn!(
                    pool = kind.tag(),
                    key = %event.key,
                    outcome = "skipped",
                    error = %e,
                    "Pool unavailable, skipping resize"
                );
                return None;
            }
        };

        let slot = self.slot(kind);
        let _serialized = slot.resize_lock.lock();
        let new_size = self.target_size(kind);
        Some(self.controller.apply(kind, pool.as_ref(), new_size))
    }

    fn slot(&self, kind: PoolKind) -> &PoolSlot<F::Executor> {
        &self.slots[kind.index()]
    }

    #[instrument(skip(self, slot), fields(pool = slot.kind.tag()))]
    fn initialize(&self, slot: &PoolSlot<F::Executor>) -> Result<(), RegistryError> {
        slot.set_state(InitState::Initializing);

        match self.construct(slot.kind) {
            Ok(pool) => {
                slot.handle.store(Some(Arc::clone(&pool)));
                self.subscribe(slot.kind);
                self.catch_up(slot, pool.as_ref());
                slot.set_state(InitState::Ready);
                info!(size = pool.cap(), "Pool initialized");
                Ok(())
            }
            Err(e) => {
                slot.set_state(InitState::Failed);
                error!(error = %e, "Pool initialization failed");
                Err(e)
            }
        }
    }

    fn construct(&self, kind: PoolKind) -> Result<Arc<F::Executor>, RegistryError> {
        let failure = |reason: String| RegistryError::InitializationFailure { kind, reason };

        let size = self.target_size(kind);
        let size = usize::try_from(size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| failure(format!("non-positive initial size {}", size)))?;

        let options = kind.pool_options(&self.affinity, self.expiry);
        let pool = self
            .factory
            .create(kind.tag(), size, options)
            .map_err(|e| failure(e.to_string()))?;

        if kind.warmup_policy() == WarmupPolicy::Eager {
            pool.warmup(Some(self.affinity.clone()))
                .map_err(|e| failure(e.to_string()))?;
        }

        Ok(Arc::new(pool))
    }

    /// Apply writes that landed between reading the configuration and
    /// registering the handlers
    fn catch_up(&self, slot: &PoolSlot<F::Executor>, pool: &F::Executor) {
        let _serialized = slot.resize_lock.lock();
        let target = self.target_size(slot.kind);
        if target != pool.cap() as i64 {
            debug!(
                target_size = target,
                size = pool.cap(),
                "Configuration changed during initialization"
            );
            self.controller.apply(slot.kind, pool, target);
        }
    }

    /// Register change handlers for the keys feeding `kind`'s size
    fn subscribe(&self, kind: PoolKind) {
        for key in kind.watched_keys() {
            let registry = self.this.clone();
            self.config.watch(
                key,
                EventHandler::new(kind.handler_id(key), move |event| {
                    if let Some(registry) = registry.upgrade() {
                        registry.on_config_event(kind, event);
                    }
                }),
            );
        }
    }
}
