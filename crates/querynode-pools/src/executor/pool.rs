//! Resizable OS-thread worker pool
//!
//! Workers are spawned on demand up to the pool capacity. Capacity can be
//! changed while tasks are queued and running: growing spawns workers for
//! pending work, shrinking retires surplus workers once they finish their
//! current task. Nothing queued or in flight is dropped.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace, warn};

use super::affinity::AffinityHook;
use super::options::PoolOptions;
use super::task::{panic_message, TaskError, TaskHandle};
use super::{Executor, ExecutorError, ExecutorFactory};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool for CPU-bound work
///
/// # Example
///
/// ```
/// use querynode_pools::executor::{PoolOptions, WorkerPool};
///
/// let pool = WorkerPool::new("example", 2, PoolOptions::default()).unwrap();
/// let handle = pool.submit(|| 40 + 2).unwrap();
/// assert_eq!(handle.wait().unwrap(), 42);
///
/// pool.resize(4).unwrap();
/// assert_eq!(pool.cap(), 4);
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
}

/// State shared by the pool owner and its worker threads
struct Shared {
    name: String,
    options: PoolOptions,
    state: Mutex<State>,
    job_available: Condvar,
    completed: AtomicU64,
    next_worker_id: AtomicUsize,
    /// Spawns left before spawning fails
    #[cfg(test)]
    spawn_budget: AtomicUsize,
}

struct Queued {
    id: u64,
    job: Job,
}

struct State {
    queue: VecDeque<Queued>,
    next_job_id: u64,
    capacity: usize,
    /// Workers alive, including ones still starting up
    workers: usize,
    /// Workers parked waiting for a job
    idle: usize,
    closed: bool,
    /// Hook handed to workers spawned from now on
    init_hook: Option<AffinityHook>,
}

impl State {
    /// Workers to spawn so every queued job has a worker, bounded by capacity
    fn workers_needed(&self) -> usize {
        let uncovered = self.queue.len().saturating_sub(self.idle);
        uncovered.min(self.capacity.saturating_sub(self.workers))
    }
}

/// How a freshly spawned worker runs its init hook
enum WorkerStart {
    /// Run the hook before the first task
    Lazy(Option<AffinityHook>),
    /// Run the hook immediately, then report readiness
    Eager {
        hook: Option<AffinityHook>,
        ready: mpsc::Sender<()>,
    },
}

impl WorkerPool {
    /// Create a pool with the given capacity
    pub fn new(
        name: impl Into<String>,
        size: usize,
        options: PoolOptions,
    ) -> Result<Self, ExecutorError> {
        if size == 0 {
            return Err(ExecutorError::InvalidSize(0));
        }

        let init_hook = options.pre_handler.clone();
        let pre_alloc = options.pre_alloc;
        let pool = Self {
            shared: Arc::new(Shared {
                name: name.into(),
                options,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    next_job_id: 0,
                    capacity: size,
                    workers: 0,
                    idle: 0,
                    closed: false,
                    init_hook,
                }),
                job_available: Condvar::new(),
                completed: AtomicU64::new(0),
                next_worker_id: AtomicUsize::new(0),
                #[cfg(test)]
                spawn_budget: AtomicUsize::new(usize::MAX),
            }),
        };

        if pre_alloc {
            let mut state = pool.shared.state.lock();
            state.workers = size;
            let hook = state.init_hook.clone();
            drop(state);
            for spawned in 0..size {
                if let Err(e) = pool.spawn_worker(WorkerStart::Lazy(hook.clone())) {
                    pool.shared.state.lock().workers -= size - spawned;
                    return Err(e);
                }
            }
        }

        debug!(pool = %pool.shared.name, size, pre_alloc, "Worker pool created");
        Ok(pool)
    }

    /// Pool name, also the worker thread name prefix
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Options the pool was built with
    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Submit a task
    ///
    /// The task runs on a pool worker; a panic inside it is reported through
    /// the returned handle as [`TaskError::Panicked`]. An error means the task
    /// will not run.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
            // Receiver may be gone; the caller no longer wants the result.
            let _ = tx.send(result);
        });

        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(ExecutorError::Closed);
        }
        let id = state.next_job_id;
        state.next_job_id += 1;
        state.queue.push_back(Queued { id, job });
        let spawn = state.workers_needed();
        state.workers += spawn;
        let hook = state.init_hook.clone();
        drop(state);

        self.shared.job_available.notify_one();
        if let Err(e) = self.spawn_lazy_workers(spawn, hook) {
            let mut state = self.shared.state.lock();
            // A running worker may already have taken it; then it still runs.
            if let Some(index) = state.queue.iter().position(|queued| queued.id == id) {
                let withdrawn = state.queue.remove(index);
                drop(state);
                drop(withdrawn);
                warn!(pool = %self.shared.name, error = %e, "Task withdrawn, no worker could be spawned");
                return Err(e);
            }
        }

        Ok(TaskHandle::new(rx))
    }

    /// Stop accepting tasks
    ///
    /// Queued tasks still run; workers exit once the queue is drained.
    pub fn release(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);

        self.shared.job_available.notify_all();
        debug!(pool = %self.shared.name, "Worker pool released");
    }

    /// Whether [`WorkerPool::release`] was called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Current capacity
    pub fn cap(&self) -> usize {
        self.shared.state.lock().capacity
    }

    /// Workers currently alive
    pub fn running(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Workers parked waiting for a task
    pub fn idle(&self) -> usize {
        self.shared.state.lock().idle
    }

    /// Tasks queued but not yet picked up
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Tasks finished since the pool was created
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Change the capacity
    #[instrument(skip(self), fields(pool = %self.shared.name))]
    pub fn resize(&self, size: usize) -> Result<(), ExecutorError> {
        if size == 0 {
            return Err(ExecutorError::InvalidSize(0));
        }
        if self.shared.options.pre_alloc {
            return Err(ExecutorError::PreAllocated);
        }

        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(ExecutorError::Closed);
        }
        let previous = state.capacity;
        if previous == size {
            return Ok(());
        }
        state.capacity = size;
        let spawn = state.workers_needed();
        state.workers += spawn;
        let hook = state.init_hook.clone();
        drop(state);

        // Wake idle workers so surplus ones notice the lower capacity.
        if size < previous {
            self.shared.job_available.notify_all();
        }
        if let Err(e) = self.spawn_lazy_workers(spawn, hook) {
            let mut state = self.shared.state.lock();
            if state.capacity == size {
                state.capacity = previous;
            }
            drop(state);
            // Workers that did start are now surplus and retire.
            self.shared.job_available.notify_all();
            warn!(previous, size, error = %e, "Worker spawn failed, capacity restored");
            return Err(e);
        }

        debug!(previous, size, spawned = spawn, "Worker pool capacity changed");
        Ok(())
    }

    /// Spawn workers until the pool runs at full capacity
    ///
    /// Every new worker runs `hook` once and then parks. Returns after all of
    /// them ran it. The hook is also handed to workers spawned later.
    #[instrument(skip(self, hook), fields(pool = %self.shared.name))]
    pub fn warmup(&self, hook: Option<AffinityHook>) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(ExecutorError::Closed);
        }
        if hook.is_some() {
            state.init_hook = hook.clone();
        }
        let missing = state.capacity.saturating_sub(state.workers);
        state.workers += missing;
        drop(state);

        let (ready_tx, ready_rx) = mpsc::channel();
        let mut spawned = 0;
        for _ in 0..missing {
            let start = WorkerStart::Eager {
                hook: hook.clone(),
                ready: ready_tx.clone(),
            };
            if let Err(e) = self.spawn_worker(start) {
                self.shared.state.lock().workers -= missing - spawned;
                return Err(ExecutorError::Warmup(e.to_string()));
            }
            spawned += 1;
        }
        drop(ready_tx);

        for _ in 0..spawned {
            ready_rx
                .recv()
                .map_err(|_| ExecutorError::Warmup("worker exited before warm-up".into()))?;
        }

        debug!(warmed = spawned, "Worker pool warmed up");
        Ok(())
    }

    fn spawn_lazy_workers(
        &self,
        count: usize,
        hook: Option<AffinityHook>,
    ) -> Result<(), ExecutorError> {
        for spawned in 0..count {
            if let Err(e) = self.spawn_worker(WorkerStart::Lazy(hook.clone())) {
                self.shared.state.lock().workers -= count - spawned;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Start one worker thread; the caller has already counted it in `workers`
    fn spawn_worker(&self, start: WorkerStart) -> Result<(), ExecutorError> {
        #[cfg(test)]
        if self
            .shared
            .spawn_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_err()
        {
            return Err(ExecutorError::Spawn("spawn budget exhausted".into()));
        }

        let id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);

        thread::Builder::new()
            .name(format!("{}-{}", self.shared.name, id))
            .spawn(move || Worker { shared }.run(start))
            .map(|_| ())
            .map_err(|e| ExecutorError::Spawn(e.to_string()))
    }
}

#[cfg(test)]
impl WorkerPool {
    /// Make spawning fail after `spawns` more threads
    pub(crate) fn set_spawn_budget(&self, spawns: usize) {
        self.shared.spawn_budget.store(spawns, Ordering::SeqCst);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.release();
    }
}

impl Executor for WorkerPool {
    fn cap(&self) -> usize {
        WorkerPool::cap(self)
    }

    fn running(&self) -> usize {
        WorkerPool::running(self)
    }

    fn resize(&self, size: usize) -> Result<(), ExecutorError> {
        WorkerPool::resize(self, size)
    }

    fn warmup(&self, hook: Option<AffinityHook>) -> Result<(), ExecutorError> {
        WorkerPool::warmup(self, hook)
    }
}

/// Builds [`WorkerPool`]s for the registry
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerPoolFactory;

impl ExecutorFactory for WorkerPoolFactory {
    type Executor = WorkerPool;

    fn create(
        &self,
        name: &str,
        size: usize,
        options: PoolOptions,
    ) -> Result<WorkerPool, ExecutorError> {
        WorkerPool::new(name, size, options)
    }
}

struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self, start: WorkerStart) {
        let mut hook = match start {
            WorkerStart::Lazy(hook) => hook,
            WorkerStart::Eager { hook, ready } => {
                if let Some(hook) = hook {
                    hook.run();
                }
                let _ = ready.send(());
                None
            }
        };

        let mut state = self.shared.state.lock();
        loop {
            if state.workers > state.capacity {
                trace!(pool = %self.shared.name, "Retiring surplus worker");
                break;
            }

            if let Some(Queued { job, .. }) = state.queue.pop_front() {
                MutexGuard::unlocked(&mut state, || {
                    if let Some(hook) = hook.take() {
                        hook.run();
                    }
                    job();
                    self.shared.completed.fetch_add(1, Ordering::Relaxed);
                });
                continue;
            }

            if state.closed {
                break;
            }

            state.idle += 1;
            let timed_out = if self.shared.options.disable_purge {
                self.shared.job_available.wait(&mut state);
                false
            } else {
                self.shared
                    .job_available
                    .wait_for(&mut state, self.shared.options.expiry_duration)
                    .timed_out()
            };
            state.idle -= 1;

            if timed_out && state.queue.is_empty() && !state.closed {
                trace!(pool = %self.shared.name, "Purging idle worker");
                break;
            }
        }
        state.workers -= 1;
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!(pool = %self.shared.name, "Worker thread exiting on panic");
        }
    }
}
