//! Per-worker affinity hooks
//!
//! A hook is a one-time setup action a worker thread runs before it does any
//! native work. The executor runs it either eagerly during warm-up or lazily
//! right before the worker's first task.

use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

thread_local! {
    static PINNED: Cell<bool> = const { Cell::new(false) };
}

/// One-time worker setup callback
///
/// Cheap to clone; every clone shares the same callback.
///
/// # Example
///
/// ```
/// use querynode_pools::executor::AffinityHook;
///
/// let hook = AffinityHook::new("noop", || {});
/// hook.run();
/// assert_eq!(hook.name(), "noop");
/// ```
#[derive(Clone)]
pub struct AffinityHook {
    name: &'static str,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl AffinityHook {
    /// Create a hook from a callback
    pub fn new<F>(name: &'static str, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            name,
            callback: Arc::new(callback),
        }
    }

    /// Hook that binds the calling worker to its OS thread for native calls
    ///
    /// Pool workers already own a dedicated OS thread, so binding amounts to
    /// marking the thread as reserved for foreign-interop work. The mark is
    /// observable through [`is_thread_pinned`].
    pub fn pin_thread() -> Self {
        Self::new("pin_thread", || {
            PINNED.with(|pinned| pinned.set(true));
            debug!(
                thread = std::thread::current().name().unwrap_or("unnamed"),
                "Worker thread pinned for native calls"
            );
        })
    }

    /// Hook name, used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the hook on the current thread
    ///
    /// A panicking hook is logged and swallowed; the worker keeps running.
    pub fn run(&self) {
        if catch_unwind(AssertUnwindSafe(|| (self.callback)())).is_err() {
            warn!(hook = self.name, "Affinity hook panicked");
        }
    }
}

impl fmt::Debug for AffinityHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityHook")
            .field("name", &self.name)
            .finish()
    }
}

/// Whether the current thread ran [`AffinityHook::pin_thread`]
pub fn is_thread_pinned() -> bool {
    PINNED.with(Cell::get)
}
