//! Engine lifecycle, configuration and the process-wide instance.
//!
//! An [`Engine`] owns the worker pool, the pending-task queue, the id
//! allocator and the completion bus. Engines are ordinary values (tests
//! build as many as they like), and the module additionally hosts one
//! process-wide engine behind [`init`]/[`destroy`], with tunables that
//! must be set before [`init`].
//!
//! # Example
//!
//! ```no_run
//! use horizon_foundry_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//!
//! let task = engine.start(|name: &String| format!("hello, {name}"), "world".to_string()).unwrap();
//! assert_eq!(task.wait(), Some("hello, world".to_string()));
//!
//! engine.shutdown();
//! ```
//!
//! # Global engine
//!
//! ```no_run
//! use horizon_foundry_core::engine;
//!
//! engine::set_pool_size(4);
//! engine::init().unwrap();
//!
//! let task = engine::start(|n: &i32| n + 1, 41).unwrap();
//! assert_eq!(task.wait(), Some(42));
//!
//! engine::destroy();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::bus::{CompletionBus, completion_event_name};
use crate::error::{EngineError, FatalKind, Result, fatal};
use crate::ids::{IdAllocator, TaskId};
use crate::logging::targets;
use crate::queue::TaskQueue;
use crate::task::{Task, TaskCore, TaskState, erase_args, erase_callback};
use crate::worker::{WorkerHandle, WorkerJob};

/// Await timeout applied when a task handle has outlived its engine.
pub(crate) const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Configuration for creating an engine.
///
/// All three tunables must be positive. Note that the scheduler occupies
/// the first worker permanently, so a pool of size `n` executes user
/// tasks on `n - 1` workers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker threads, scheduler included.
    pub pool_size: usize,
    /// Maximum number of simultaneously live task ids.
    pub id_capacity: usize,
    /// Default timeout for [`Task::wait`].
    pub await_timeout: Duration,
}

impl EngineConfig {
    /// The default configuration: 8 workers, 100 ids, 15 s await timeout.
    pub const fn defaults() -> Self {
        Self {
            pool_size: 8,
            id_capacity: 100,
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
        }
    }

    /// Set the worker pool size.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the id capacity.
    pub fn with_id_capacity(mut self, id_capacity: usize) -> Self {
        self.id_capacity = id_capacity;
        self
    }

    /// Set the default await timeout.
    pub fn with_await_timeout(mut self, await_timeout: Duration) -> Self {
        self.await_timeout = await_timeout;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Engine internals shared with workers and task handles.
pub(crate) struct EngineShared {
    config: EngineConfig,
    running: AtomicBool,
    pub(crate) queue: Mutex<TaskQueue>,
    pub(crate) ids: Mutex<IdAllocator>,
    pub(crate) bus: CompletionBus,
    /// Worker table; this is the engine's structural mutex, held for
    /// init/teardown, assignment and worker rebuilds.
    pub(crate) workers: Mutex<Vec<WorkerHandle>>,
}

impl EngineShared {
    /// Context under which completion events are published.
    pub(crate) const CONTEXT: &'static str = "foundry";
    /// Event stem for task completion.
    pub(crate) const COMPLETE_EVENT: &'static str = "on_complete";

    pub(crate) fn is_live(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The completion event name owned by task `id`.
    pub(crate) fn completion_event(&self, id: TaskId) -> String {
        completion_event_name(Self::CONTEXT, Self::COMPLETE_EVENT, id)
    }

    /// Move a task into the pending queue.
    pub(crate) fn submit(&self, task: Arc<TaskCore>) -> Result<()> {
        if !self.is_live() {
            return Err(EngineError::Unavailable);
        }
        match *task.state.lock() {
            TaskState::Configured | TaskState::Done => {}
            // Double-submission and resurrection of a released record are
            // programmer errors, not load conditions.
            TaskState::Pending | TaskState::Running | TaskState::Released => {
                fatal(FatalKind::InvalidTask)
            }
        }

        *task.last_check.lock() = Some(Instant::now());
        task.time_to_fire_ms
            .store(task.delay_ms.load(Ordering::Relaxed), Ordering::Relaxed);
        *task.state.lock() = TaskState::Pending;
        self.queue.lock().enqueue(task);
        Ok(())
    }

    /// Re-queue a periodic task for its next iteration.
    ///
    /// Unlike [`EngineShared::submit`], a record that is no longer `Done`
    /// is a benign outcome, not a misuse: a concurrent cancel or release
    /// may have freed the task after its completion protocol ran. The
    /// state transition happens under the state lock, so exactly one of
    /// the re-queue and the release wins.
    pub(crate) fn requeue(&self, task: Arc<TaskCore>) -> bool {
        if !self.is_live() {
            return false;
        }
        {
            let mut state = task.state.lock();
            if *state != TaskState::Done {
                return false;
            }
            *state = TaskState::Pending;
        }
        *task.last_check.lock() = Some(Instant::now());
        task.time_to_fire_ms
            .store(task.delay_ms.load(Ordering::Relaxed), Ordering::Relaxed);
        self.queue.lock().enqueue(task);
        true
    }

    /// Run the completion protocol for a finished task: notify this id's
    /// subscribers with the result, then drop them so the event name is
    /// clean for whoever acquires the id next.
    pub(crate) fn fire_completion(&self, task: &Arc<TaskCore>) {
        let event = self.completion_event(task.id);
        if self.bus.subscriber_count(Self::CONTEXT, &event) == 0 {
            return;
        }
        let result = task.result.lock().clone();
        if let Some(result) = result {
            self.bus.notify(Self::CONTEXT, &event, &result);
        }
        self.bus.unsubscribe_event(Self::CONTEXT, &event);
    }

    /// Destroy a task record: return the id, drop subscribers and the
    /// callback. Idempotent.
    pub(crate) fn release_task(&self, task: &Arc<TaskCore>) {
        {
            let mut state = task.state.lock();
            if *state == TaskState::Released {
                return;
            }
            *state = TaskState::Released;
        }
        self.ids.lock().release(task.id);
        let event = self.completion_event(task.id);
        self.bus.unsubscribe_event(Self::CONTEXT, &event);
        task.discard_callback();
        tracing::trace!(target: targets::ENGINE, task = %task.id, "task released");
    }

    /// Cancel a running task: retire its worker, install a replacement in
    /// the same pool slot, and free the task. Returns whether the task
    /// was actually running.
    pub(crate) fn cancel_task(self: &Arc<Self>, task: &Arc<TaskCore>) -> bool {
        let mut workers = self.workers.lock();
        if !task.is_running.load(Ordering::Acquire) {
            return false;
        }
        let Some(index) = *task.worker.lock() else {
            return false;
        };
        if workers.get(index).is_none() {
            return false;
        }

        task.cancelled.store(true, Ordering::Release);
        task.is_running.store(false, Ordering::Release);

        // The worker table keeps its shape: the replacement takes the
        // retired worker's slot while the orphaned thread winds down on
        // its own.
        let replacement = WorkerHandle::spawn(index, self.clone())
            .expect("failed to respawn worker after cancellation");
        let retired = std::mem::replace(&mut workers[index], replacement);
        retired.retire_detached();
        drop(workers);

        self.release_task(task);
        tracing::debug!(target: targets::ENGINE, task = %task.id, worker = index, "task cancelled");
        true
    }
}

/// The task execution engine.
///
/// Cheap to clone (clones share the same pool). Dropping an `Engine`
/// does not stop its workers; call [`Engine::shutdown`] (or [`destroy`]
/// for the global engine) to tear the pool down.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Build an engine and start its worker pool.
    ///
    /// The scheduler is pinned to the first worker immediately. Panics
    /// with [`FatalKind::InvalidArgument`] if any tunable is zero.
    pub fn new(config: EngineConfig) -> Result<Self> {
        if config.pool_size == 0 || config.id_capacity == 0 || config.await_timeout.is_zero() {
            fatal(FatalKind::InvalidArgument);
        }

        let shared = Arc::new(EngineShared {
            ids: Mutex::new(IdAllocator::new(config.id_capacity)),
            queue: Mutex::new(TaskQueue::new()),
            bus: CompletionBus::new(),
            workers: Mutex::new(Vec::with_capacity(config.pool_size)),
            running: AtomicBool::new(true),
            config,
        });

        {
            let mut workers = shared.workers.lock();
            for index in 0..shared.config.pool_size {
                match WorkerHandle::spawn(index, shared.clone()) {
                    Ok(worker) => workers.push(worker),
                    Err(err) => {
                        shared.running.store(false, Ordering::Release);
                        for started in workers.drain(..) {
                            started.retire();
                        }
                        return Err(err);
                    }
                }
            }
            workers[0].shared.busy.store(true, Ordering::Release);
            workers[0].assign(WorkerJob::Scheduler);
        }

        tracing::info!(
            target: targets::ENGINE,
            pool_size = shared.config.pool_size,
            id_capacity = shared.config.id_capacity,
            "engine started"
        );
        Ok(Self { shared })
    }

    /// Create a task without submitting it.
    ///
    /// Allocates an id and the task record with engine defaults:
    /// priority 5, no delay, no interval, single run, automatic release.
    /// Returns [`EngineError::Unavailable`] when every id is reserved.
    pub fn make_task<A, T, F>(&self, callback: F, args: A) -> Result<Task<A, T>>
    where
        A: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: FnMut(&A) -> T + Send + 'static,
    {
        if !self.shared.is_live() {
            fatal(FatalKind::NotInitialized);
        }
        let id = self
            .shared
            .ids
            .lock()
            .acquire()
            .ok_or(EngineError::Unavailable)?;
        let core = Arc::new(TaskCore::new(
            id,
            Arc::downgrade(&self.shared),
            erase_callback(callback),
            erase_args(args),
        ));
        Ok(Task::from_core(core))
    }

    /// Create and immediately submit a task.
    pub fn start<A, T, F>(&self, callback: F, args: A) -> Result<Task<A, T>>
    where
        A: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: FnMut(&A) -> T + Send + 'static,
    {
        let task = self.make_task(callback, args)?;
        task.run()?;
        Ok(task)
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        self.shared.config()
    }

    /// Number of workers, scheduler included.
    pub fn pool_size(&self) -> usize {
        self.shared.config.pool_size
    }

    /// Number of tasks waiting in the scheduler queue.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of reserved task ids.
    pub fn live_tasks(&self) -> usize {
        self.shared.ids.lock().allocated()
    }

    /// Whether the engine is accepting and executing tasks.
    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    /// Stop the engine: retire and join every worker, then release all
    /// pending tasks. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let workers = std::mem::take(&mut *self.shared.workers.lock());
        for worker in workers {
            worker.retire_joined();
        }
        for task in self.shared.queue.lock().drain() {
            self.shared.release_task(&task);
        }
        tracing::info!(target: targets::ENGINE, "engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool_size", &self.pool_size())
            .field("live_tasks", &self.live_tasks())
            .field("pending_tasks", &self.pending_tasks())
            .field("is_live", &self.is_live())
            .finish()
    }
}

static_assertions::assert_impl_all!(Engine: Send, Sync);

/// The process-wide engine instance.
static GLOBAL_ENGINE: RwLock<Option<Engine>> = RwLock::new(None);

/// Tunables applied by the next [`init`].
static PENDING_CONFIG: Mutex<EngineConfig> = Mutex::new(EngineConfig::defaults());

/// Set the global pool size. Must be called before [`init`].
pub fn set_pool_size(pool_size: usize) {
    if pool_size == 0 {
        fatal(FatalKind::InvalidArgument);
    }
    if is_initialized() {
        fatal(FatalKind::AlreadyInitialized);
    }
    PENDING_CONFIG.lock().pool_size = pool_size;
}

/// Set the global id capacity. Must be called before [`init`].
pub fn set_id_capacity(id_capacity: usize) {
    if id_capacity == 0 {
        fatal(FatalKind::InvalidArgument);
    }
    if is_initialized() {
        fatal(FatalKind::AlreadyInitialized);
    }
    PENDING_CONFIG.lock().id_capacity = id_capacity;
}

/// Set the global await timeout. Must be called before [`init`].
pub fn set_await_timeout(timeout: Duration) {
    if timeout.is_zero() {
        fatal(FatalKind::InvalidArgument);
    }
    if is_initialized() {
        fatal(FatalKind::AlreadyInitialized);
    }
    PENDING_CONFIG.lock().await_timeout = timeout;
}

/// Initialize the global engine with the pending tunables.
///
/// Idempotent: a second call while the engine is live is a no-op.
pub fn init() -> Result<()> {
    let mut global = GLOBAL_ENGINE.write();
    if global.is_some() {
        return Ok(());
    }
    let config = PENDING_CONFIG.lock().clone();
    *global = Some(Engine::new(config)?);
    Ok(())
}

/// Tear down the global engine.
pub fn destroy() {
    let engine = GLOBAL_ENGINE.write().take();
    match engine {
        Some(engine) => engine.shutdown(),
        None => fatal(FatalKind::NotInitialized),
    }
}

/// Whether the global engine is currently initialized.
pub fn is_initialized() -> bool {
    GLOBAL_ENGINE.read().is_some()
}

/// Get the global engine.
pub fn instance() -> Engine {
    match try_instance() {
        Some(engine) => engine,
        None => fatal(FatalKind::NotInitialized),
    }
}

/// Get the global engine if it is initialized.
pub fn try_instance() -> Option<Engine> {
    GLOBAL_ENGINE.read().clone()
}

/// Create a task on the global engine without submitting it.
pub fn make_task<A, T, F>(callback: F, args: A) -> Result<Task<A, T>>
where
    A: Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: FnMut(&A) -> T + Send + 'static,
{
    instance().make_task(callback, args)
}

/// Create and submit a task on the global engine.
pub fn start<A, T, F>(callback: F, args: A) -> Result<Task<A, T>>
where
    A: Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: FnMut(&A) -> T + Send + 'static,
{
    instance().start(callback, args)
}
