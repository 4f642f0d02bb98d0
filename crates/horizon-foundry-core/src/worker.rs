//! Worker threads and cooperative cancellation.
//!
//! The pool is a fixed set of workers, each owning a single current-task
//! slot fed by the scheduler. A worker samples its slot, executes the
//! callback, publishes the result and flags, fires the completion
//! protocol, then either re-queues the task (periodic), frees it
//! (default release) or leaves it to its owner (manual release).
//!
//! Cancellation is cooperative: the engine retires the worker (its thread
//! finishes the current callback and exits without post-processing) and
//! installs a fresh worker in the same pool slot. Long callbacks can
//! shorten the orphaned tail by polling [`cancellation_requested`] at
//! convenient safe points:
//!
//! ```no_run
//! use horizon_foundry_core::{Engine, EngineConfig, worker};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let task = engine
//!     .start(
//!         |_: &()| {
//!             for chunk in 0..1000 {
//!                 if worker::cancellation_requested() {
//!                     return None;
//!                 }
//!                 // process chunk...
//!                 let _ = chunk;
//!             }
//!             Some(())
//!         },
//!         (),
//!     )
//!     .unwrap();
//! # let _ = task;
//! ```

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::engine::EngineShared;
use crate::error::EngineError;
use crate::logging::targets;
use crate::task::{TaskCore, TaskState};

/// How long a worker sleeps between samples of an empty slot.
const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A token for cooperative cancellation.
///
/// Cancellation is a one-way signal: once set, holders polling
/// [`CancellationToken::is_cancelled`] should wind down at their next
/// safe point.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Reset the token to the non-cancelled state.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

thread_local! {
    static CURRENT_CANCELLATION: RefCell<Option<CancellationToken>> =
        const { RefCell::new(None) };
}

/// Whether the worker executing the current thread has been asked to stop.
///
/// Returns `false` when called outside a worker thread. Task callbacks
/// poll this at safe points to honor [`crate::Task::cancel`] promptly.
pub fn cancellation_requested() -> bool {
    CURRENT_CANCELLATION.with(|token| {
        token
            .borrow()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    })
}

/// A job delivered to a worker's current-task slot.
pub(crate) enum WorkerJob {
    /// Execute a user task.
    Run(Arc<TaskCore>),
    /// Become the scheduler loop (pinned to the first worker at init).
    Scheduler,
}

/// State shared between a worker's thread and the pool table.
pub(crate) struct WorkerShared {
    pub(crate) index: usize,
    pub(crate) busy: AtomicBool,
    retired: AtomicBool,
    pub(crate) cancellation: CancellationToken,
}

impl WorkerShared {
    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Pool-side handle to one worker.
pub(crate) struct WorkerHandle {
    pub(crate) shared: Arc<WorkerShared>,
    sender: Sender<WorkerJob>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker thread for pool slot `index`.
    pub(crate) fn spawn(index: usize, engine: Arc<EngineShared>) -> Result<Self, EngineError> {
        let (sender, receiver) = bounded(1);
        let shared = Arc::new(WorkerShared {
            index,
            busy: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
        });

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("foundry-worker-{index}"))
            .spawn(move || worker_loop(engine, thread_shared, receiver))
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            shared,
            sender,
            handle: Some(handle),
        })
    }

    /// Hand a job to this worker's slot.
    pub(crate) fn assign(&self, job: WorkerJob) -> bool {
        self.sender.send(job).is_ok()
    }

    /// Ask the worker thread to stop at its next safe point.
    pub(crate) fn retire(&self) {
        self.shared.retired.store(true, Ordering::Release);
        self.shared.cancellation.cancel();
    }

    /// Retire and abandon the thread without waiting for it.
    ///
    /// Used by cancellation: the orphaned thread finishes its callback and
    /// exits on its own while a replacement takes over the pool slot.
    pub(crate) fn retire_detached(mut self) {
        self.retire();
        drop(self.handle.take());
    }

    /// Retire and wait for the worker thread to exit.
    pub(crate) fn retire_joined(mut self) {
        self.retire();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The per-thread loop: sample the slot, execute, repeat.
fn worker_loop(engine: Arc<EngineShared>, me: Arc<WorkerShared>, receiver: Receiver<WorkerJob>) {
    CURRENT_CANCELLATION.with(|token| {
        *token.borrow_mut() = Some(me.cancellation.clone());
    });
    tracing::debug!(target: targets::WORKER, worker = me.index, "worker started");

    while engine.is_live() && !me.is_retired() {
        match receiver.recv_timeout(SLOT_POLL_INTERVAL) {
            Ok(WorkerJob::Scheduler) => crate::scheduler::run(&engine, &me),
            Ok(WorkerJob::Run(task)) => execute_task(&engine, &me, task),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!(target: targets::WORKER, worker = me.index, "worker stopped");
}

/// Execute one task iteration: flags, callback, completion protocol,
/// then re-queue or release.
#[tracing::instrument(
    skip_all,
    target = "horizon_foundry_core::worker",
    level = "trace",
    fields(worker = me.index, task = %task.id)
)]
fn execute_task(engine: &Arc<EngineShared>, me: &Arc<WorkerShared>, task: Arc<TaskCore>) {
    if task.cancelled.load(Ordering::Acquire) || *task.state.lock() == TaskState::Released {
        // Released between assignment and pickup; nothing to run.
        *task.worker.lock() = None;
        me.busy.store(false, Ordering::Release);
        return;
    }

    *task.worker.lock() = Some(me.index);
    *task.state.lock() = TaskState::Running;
    // Reset the previous iteration's done pulse only now, so waiters had
    // the whole inter-iteration window to observe it.
    task.is_done.store(false, Ordering::Release);
    task.is_running.store(true, Ordering::Release);

    let args = task.args.lock().clone();
    let result = task.invoke(&args);

    if me.is_retired() || task.cancelled.load(Ordering::Acquire) {
        // Cancelled mid-callback: the engine already released the id and
        // replaced this worker. Discard the result and bow out.
        tracing::debug!(target: targets::WORKER, worker = me.index, task = %task.id, "orphaned worker discarding cancelled task");
        return;
    }

    *task.result.lock() = Some(result);
    task.is_done.store(true, Ordering::Release);
    *task.state.lock() = TaskState::Done;

    // Subscribers observe is_done == true; waiters key on the completion
    // counter, so they unblock only after the subscribers have run.
    engine.fire_completion(&task);
    task.completions.fetch_add(1, Ordering::AcqRel);
    task.is_running.store(false, Ordering::Release);

    if me.is_retired() || task.cancelled.load(Ordering::Acquire) {
        // Cancelled during the completion protocol; the engine has
        // already released the record and replaced this worker.
        return;
    }

    let interval_ms = task.interval_ms.load(Ordering::Relaxed);
    let infinite = task.infinite.load(Ordering::Relaxed);
    let repeats = task.repeat_left.load(Ordering::Relaxed);
    if interval_ms > 0 && (infinite || repeats > 1) {
        if !infinite {
            task.repeat_left.store(repeats - 1, Ordering::Relaxed);
        }
        task.delay_ms.store(interval_ms, Ordering::Relaxed);
        if !engine.requeue(task.clone()) {
            // Released or cancelled in the meantime, or the engine is
            // shutting down; release is idempotent either way.
            engine.release_task(&task);
        }
    } else {
        if interval_ms > 0 && !infinite {
            task.repeat_left.store(0, Ordering::Relaxed);
        }
        if !task.manual_release.load(Ordering::Relaxed) {
            engine.release_task(&task);
        }
    }

    *task.worker.lock() = None;
    me.busy.store(false, Ordering::Release);
}
