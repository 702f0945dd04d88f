//! Runtime resize of live pools
//!
//! Every attempt produces exactly one [`ResizeOutcome`], one structured log
//! event and one counter increment. Failures stop here: they are never handed
//! back to the configuration source and never retried.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::executor::{AffinityHook, Executor};
use crate::kind::{PoolKind, WarmupPolicy};

/// Result of one resize attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResizeOutcome {
    /// Pool now runs at `size`
    Accepted { size: usize },
    /// Requested size was zero or negative; pool unchanged
    RejectedNonPositive { requested: i64 },
    /// Executor refused the new size; pool unchanged
    Failed { requested: i64, error: String },
}

impl ResizeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::RejectedNonPositive { .. } => "rejected_non_positive",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl fmt::Display for ResizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resize counters for one pool kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeStats {
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
    /// Post-resize warm-ups that did not complete
    pub warmup_failed: u64,
}

impl ResizeStats {
    /// Resize attempts of any outcome
    pub fn attempts(&self) -> u64 {
        self.accepted + self.rejected + self.failed
    }
}

#[derive(Default)]
struct ResizeMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    warmup_failed: AtomicU64,
}

impl ResizeMetrics {
    fn record(&self, outcome: &ResizeOutcome) {
        let counter = match outcome {
            ResizeOutcome::Accepted { .. } => &self.accepted,
            ResizeOutcome::RejectedNonPositive { .. } => &self.rejected,
            ResizeOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ResizeStats {
        ResizeStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            warmup_failed: self.warmup_failed.load(Ordering::Relaxed),
        }
    }
}

/// Validates and applies new sizes to live pools
pub struct ResizeController {
    hook: AffinityHook,
    metrics: [ResizeMetrics; 3],
}

impl ResizeController {
    /// Create a controller; `hook` is used to warm eager pools after a resize
    pub fn new(hook: AffinityHook) -> Self {
        Self {
            hook,
            metrics: Default::default(),
        }
    }

    /// Apply `new_size` to `pool`
    pub fn apply<E: Executor + ?Sized>(
        &self,
        kind: PoolKind,
        pool: &E,
        new_size: i64,
    ) -> ResizeOutcome {
        let outcome = self.resize(kind, pool, new_size);
        self.metrics[kind.index()].record(&outcome);
        outcome
    }

    /// Counters for a pool kind
    pub fn metrics(&self, kind: PoolKind) -> ResizeStats {
        self.metrics[kind.index()].snapshot()
    }

    fn resize<E: Executor + ?Sized>(
        &self,
        kind: PoolKind,
        pool: &E,
        new_size: i64,
    ) -> ResizeOutcome {
        let size = match usize::try_from(new_size) {
            Ok(size) if size > 0 => size,
            _ => {
                let outcome = ResizeOutcome::RejectedNonPositive {
                    requested: new_size,
                };
                warn!(
                    pool = kind.tag(),
                    new_size,
                    outcome = %outcome,
                    "Cannot set pool size to non-positive value"
                );
                return outcome;
            }
        };

        if let Err(e) = pool.resize(size) {
            let outcome = ResizeOutcome::Failed {
                requested: new_size,
                error: e.to_string(),
            };
            warn!(
                pool = kind.tag(),
                new_size,
                outcome = %outcome,
                error = %e,
                "Failed to resize pool"
            );
            return outcome;
        }

        let outcome = ResizeOutcome::Accepted { size };
        info!(pool = kind.tag(), new_size, outcome = %outcome, "Pool resized");

        if kind.warmup_policy() == WarmupPolicy::Eager {
            if let Err(e) = pool.warmup(Some(self.hook.clone())) {
                self.metrics[kind.index()]
                    .warmup_failed
                    .fetch_add(1, Ordering::Relaxed);
                warn!(pool = kind.tag(), new_size, error = %e, "Failed to warm up resized pool");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorError;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Executor that records calls instead of running workers
    #[derive(Default)]
    struct FakeExecutor {
        cap: AtomicUsize,
        resize_calls: AtomicUsize,
        warmups: AtomicUsize,
        resize_error: Mutex<Option<ExecutorError>>,
        warmup_error: Mutex<Option<ExecutorError>>,
    }

    impl FakeExecutor {
        fn with_cap(cap: usize) -> Self {
            let fake = Self::default();
            fake.cap.store(cap, Ordering::SeqCst);
            fake
        }
    }

    impl Executor for FakeExecutor {
        fn cap(&self) -> usize {
            self.cap.load(Ordering::SeqCst)
        }

        fn running(&self) -> usize {
            0
        }

        fn resize(&self, size: usize) -> Result<(), ExecutorError> {
            self.resize_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.resize_error.lock().clone() {
                return Err(e);
            }
            self.cap.store(size, Ordering::SeqCst);
            Ok(())
        }

        fn warmup(&self, _hook: Option<AffinityHook>) -> Result<(), ExecutorError> {
            self.warmups.fetch_add(1, Ordering::SeqCst);
            match self.warmup_error.lock().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn controller() -> ResizeController {
        ResizeController::new(AffinityHook::new("noop", || {}))
    }

    #[test]
    fn test_accepts_positive_size() {
        let controller = controller();
        let pool = FakeExecutor::with_cap(4);

        let outcome = controller.apply(PoolKind::Load, &pool, 8);
        assert_eq!(outcome, ResizeOutcome::Accepted { size: 8 });
        assert_eq!(pool.cap(), 8);
        assert_eq!(pool.warmups.load(Ordering::SeqCst), 0);
        assert_eq!(controller.metrics(PoolKind::Load).accepted, 1);
    }

    #[test]
    fn test_rejects_non_positive_without_touching_pool() {
        let controller = controller();
        let pool = FakeExecutor::with_cap(4);

        for size in [0, -3] {
            let outcome = controller.apply(PoolKind::Search, &pool, size);
            assert_eq!(outcome, ResizeOutcome::RejectedNonPositive { requested: size });
        }

        assert_eq!(pool.cap(), 4);
        assert_eq!(pool.resize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(pool.warmups.load(Ordering::SeqCst), 0);
        assert_eq!(controller.metrics(PoolKind::Search).rejected, 2);
    }

    #[test]
    fn test_executor_failure_leaves_pool_unchanged() {
        let controller = controller();
        let pool = FakeExecutor::with_cap(4);
        *pool.resize_error.lock() = Some(ExecutorError::Closed);

        let outcome = controller.apply(PoolKind::Search, &pool, 6);
        assert_eq!(
            outcome,
            ResizeOutcome::Failed {
                requested: 6,
                error: "pool is closed".to_string()
            }
        );
        assert_eq!(pool.cap(), 4);
        assert_eq!(pool.resize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.warmups.load(Ordering::SeqCst), 0);
        assert_eq!(controller.metrics(PoolKind::Search).failed, 1);
    }

    #[test]
    fn test_search_pool_is_warmed_after_resize() {
        let controller = controller();
        let pool = FakeExecutor::with_cap(4);

        assert!(controller.apply(PoolKind::Search, &pool, 8).is_accepted());
        assert_eq!(pool.warmups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_warmup_failure_is_not_fatal() {
        let controller = controller();
        let pool = FakeExecutor::with_cap(4);
        *pool.warmup_error.lock() = Some(ExecutorError::Warmup("no threads".into()));

        let outcome = controller.apply(PoolKind::Search, &pool, 8);
        assert_eq!(outcome, ResizeOutcome::Accepted { size: 8 });

        let stats = controller.metrics(PoolKind::Search);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.warmup_failed, 1);
        assert_eq!(stats.attempts(), 1);
    }

    #[test]
    fn test_spawn_failure_keeps_live_pool_size() {
        use crate::executor::{PoolOptions, WorkerPool};
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        use std::time::Duration;

        let controller = controller();
        let pool = WorkerPool::new("LoadPool", 1, PoolOptions::default()).unwrap();
        let gate = Arc::new(AtomicBool::new(false));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                pool.submit(move || {
                    while !gate.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
                .unwrap()
            })
            .collect();

        pool.set_spawn_budget(2);
        let outcome = controller.apply(PoolKind::Load, &pool, 8);

        assert!(matches!(outcome, ResizeOutcome::Failed { requested: 8, .. }));
        assert_eq!(Executor::cap(&pool), 1);
        assert_eq!(controller.metrics(PoolKind::Load).failed, 1);

        gate.store(true, Ordering::SeqCst);
        for handle in handles {
            handle.wait().unwrap();
        }
    }

    #[test]
    fn test_metrics_are_per_kind() {
        let controller = controller();
        let pool = FakeExecutor::with_cap(1);

        controller.apply(PoolKind::Load, &pool, 2);
        assert_eq!(controller.metrics(PoolKind::Load).attempts(), 1);
        assert_eq!(controller.metrics(PoolKind::Search), ResizeStats::default());
        assert_eq!(controller.metrics(PoolKind::Dynamic), ResizeStats::default());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ResizeOutcome::RejectedNonPositive { requested: -1 })
            .unwrap();
        assert_eq!(json["outcome"], "rejected_non_positive");
        assert_eq!(json["requested"], -1);
        assert_eq!(ResizeOutcome::Accepted { size: 1 }.to_string(), "accepted");
    }
}
