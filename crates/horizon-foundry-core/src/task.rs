//! Task records and the typed task handle.
//!
//! A task couples a callback, its arguments, scheduling metadata and a
//! result slot. Internally the engine stores tasks type-erased so a single
//! queue can carry every submission; the public [`Task`] handle re-types
//! the surface per submission site, so results come back as the `T` the
//! callback actually produced.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_foundry_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//!
//! let task = engine
//!     .make_task(|n: &u64| n * 2, 21u64)
//!     .unwrap()
//!     .with_priority(2)
//!     .with_delay(Duration::from_millis(50))
//!     .on_complete(|result| println!("doubled: {result}"));
//!
//! task.run().unwrap();
//! assert_eq!(task.wait(), Some(42));
//! engine.shutdown();
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bus::Payload;
use crate::engine::{DEFAULT_AWAIT_TIMEOUT, EngineShared};
use crate::error::{FatalKind, Result, fatal};
use crate::ids::TaskId;

/// The default priority assigned to new tasks. Lower values are more
/// urgent; 0 is the most urgent.
pub const DEFAULT_PRIORITY: u32 = 5;

/// What the engine does with a task after it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// Free the task (and its id) automatically after completion, or
    /// after the last iteration for periodic tasks.
    #[default]
    Default,
    /// Never free the task; the owner calls [`Task::release`] explicitly.
    Manual,
}

/// Lifecycle stage of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Created but not yet submitted.
    Configured,
    /// Waiting in the scheduler queue.
    Pending,
    /// Assigned to a worker, callback executing.
    Running,
    /// Callback returned; awaiting release or re-queue.
    Done,
    /// Destroyed; the id has been returned to the allocator.
    Released,
}

pub(crate) type ErasedCallback = Box<dyn FnMut(&Payload) -> Payload + Send>;

/// The type-erased task record shared between handles, the queue and
/// workers.
pub(crate) struct TaskCore {
    pub(crate) id: TaskId,
    pub(crate) engine: Weak<EngineShared>,
    pub(crate) state: Mutex<TaskState>,
    callback: Mutex<Option<ErasedCallback>>,
    pub(crate) args: Mutex<Payload>,
    pub(crate) result: Mutex<Option<Payload>>,

    /// Observable flags: `result` is published before `is_done`, and
    /// `is_done` of iteration N precedes `is_running` of iteration N+1.
    pub(crate) is_running: AtomicBool,
    pub(crate) is_done: AtomicBool,
    pub(crate) cancelled: AtomicBool,
    /// Number of completed iterations; lets waiters observe a completion
    /// even after the flags are reset for the next periodic iteration.
    pub(crate) completions: AtomicU64,

    pub(crate) priority: AtomicU32,
    pub(crate) delay_ms: AtomicI64,
    pub(crate) interval_ms: AtomicI64,
    pub(crate) repeat_left: AtomicU32,
    pub(crate) infinite: AtomicBool,
    pub(crate) manual_release: AtomicBool,

    /// Index of the worker currently executing this task.
    pub(crate) worker: Mutex<Option<usize>>,

    // Scheduler bookkeeping, touched under the queue lock.
    pub(crate) last_check: Mutex<Option<Instant>>,
    pub(crate) time_to_fire_ms: AtomicI64,
}

impl TaskCore {
    pub(crate) fn new(
        id: TaskId,
        engine: Weak<EngineShared>,
        callback: ErasedCallback,
        args: Payload,
    ) -> Self {
        Self {
            id,
            engine,
            state: Mutex::new(TaskState::Configured),
            callback: Mutex::new(Some(callback)),
            args: Mutex::new(args),
            result: Mutex::new(None),
            is_running: AtomicBool::new(false),
            is_done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            completions: AtomicU64::new(0),
            priority: AtomicU32::new(DEFAULT_PRIORITY),
            delay_ms: AtomicI64::new(0),
            interval_ms: AtomicI64::new(0),
            repeat_left: AtomicU32::new(1),
            infinite: AtomicBool::new(false),
            manual_release: AtomicBool::new(false),
            worker: Mutex::new(None),
            last_check: Mutex::new(None),
            time_to_fire_ms: AtomicI64::new(0),
        }
    }

    /// Run the callback against `args`.
    ///
    /// The callback is taken out of the record for the duration of the
    /// call; no record lock is held while user code runs, so the task can
    /// be released or cancelled from other threads mid-callback.
    pub(crate) fn invoke(&self, args: &Payload) -> Payload {
        // A queued record always carries its callback; losing it means
        // the record was released while still scheduled.
        let Some(mut callback) = self.callback.lock().take() else {
            fatal(FatalKind::InvariantViolation);
        };
        let result = callback(args);
        if *self.state.lock() != TaskState::Released {
            *self.callback.lock() = Some(callback);
        }
        result
    }

    /// Drop the callback so captured resources are freed at release time.
    pub(crate) fn discard_callback(&self) {
        *self.callback.lock() = None;
    }

    pub(crate) fn priority(&self) -> u32 {
        self.priority.load(Ordering::Relaxed)
    }
}

/// A handle to a submitted or configurable task.
///
/// `A` is the argument type handed to the callback on each run; `T` is the
/// callback's result type. Handles are cheap to clone and keep the task's
/// result slot alive even after the engine has released the task itself.
pub struct Task<A, T> {
    pub(crate) core: Arc<TaskCore>,
    _types: PhantomData<fn(&A) -> T>,
}

impl<A, T> Clone for Task<A, T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _types: PhantomData,
        }
    }
}

impl<A, T> std::fmt::Debug for Task<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("state", &*self.core.state.lock())
            .field("priority", &self.core.priority())
            .finish()
    }
}

impl<A, T> Task<A, T>
where
    A: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) fn from_core(core: Arc<TaskCore>) -> Self {
        Self {
            core,
            _types: PhantomData,
        }
    }

    /// The task's id, unique among live tasks.
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Set the scheduling priority. 0 is the most urgent; larger values
    /// are less urgent. Defaults to [`DEFAULT_PRIORITY`].
    pub fn with_priority(self, priority: u32) -> Self {
        self.core.priority.store(priority, Ordering::Relaxed);
        self
    }

    /// Delay the first execution by `delay` after submission.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.core.delay_ms.store(delay.as_millis() as i64, Ordering::Relaxed);
        self
    }

    /// Make the task periodic: after each completion it is re-queued with
    /// `interval` as its delay. `count` bounds the number of executions;
    /// `count == 0` repeats forever. The task keeps its id across
    /// iterations.
    pub fn with_interval(self, interval: Duration, count: u32) -> Self {
        self.core.interval_ms.store(interval.as_millis() as i64, Ordering::Relaxed);
        if count == 0 {
            self.core.infinite.store(true, Ordering::Relaxed);
        } else {
            self.core.repeat_left.store(count, Ordering::Relaxed);
        }
        self
    }

    /// Switch to [`ReleasePolicy::Manual`]: the engine never frees the
    /// task; its id stays reserved until [`Task::release`] is called.
    pub fn as_manual(self) -> Self {
        self.core.manual_release.store(true, Ordering::Relaxed);
        self
    }

    /// The task's release policy.
    pub fn release_policy(&self) -> ReleasePolicy {
        if self.core.manual_release.load(Ordering::Relaxed) {
            ReleasePolicy::Manual
        } else {
            ReleasePolicy::Default
        }
    }

    /// Subscribe `callback` to this task's completion. It runs on the
    /// worker that finished the task, after `is_done` is observable, and
    /// is removed again once notified.
    pub fn on_complete<F>(self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let Some(engine) = self.core.engine.upgrade() else {
            fatal(FatalKind::NotInitialized);
        };
        let event = engine.completion_event(self.core.id);
        engine.bus.subscribe(EngineShared::CONTEXT, &event, move |payload| {
            match payload.downcast_ref::<T>() {
                Some(result) => callback(result),
                // The event name is unique per live id, so a foreign
                // payload type cannot legitimately arrive here.
                None => fatal(FatalKind::InvariantViolation),
            }
        });
        self
    }

    /// Submit the task to the scheduler with its stored arguments.
    pub fn run(&self) -> Result<()> {
        let Some(engine) = self.core.engine.upgrade() else {
            fatal(FatalKind::NotInitialized);
        };
        engine.submit(self.core.clone())
    }

    /// Replace the stored arguments, then submit.
    pub fn run_with_args(&self, args: A) -> Result<()> {
        *self.core.args.lock() = Arc::new(args) as Payload;
        self.run()
    }

    /// Whether a worker is currently executing the callback.
    pub fn is_running(&self) -> bool {
        self.core.is_running.load(Ordering::Acquire)
    }

    /// Whether the callback has returned. For periodic tasks this reports
    /// the most recent iteration; see [`Task::completions`] for the count.
    pub fn is_done(&self) -> bool {
        self.core.is_done.load(Ordering::Acquire)
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.core.cancelled.load(Ordering::Acquire)
    }

    /// The number of completed iterations so far.
    pub fn completions(&self) -> u64 {
        self.core.completions.load(Ordering::Acquire)
    }

    /// Wait for completion with the engine's configured await timeout.
    ///
    /// Returns the result of the most recent completed iteration, or
    /// `None` if the timeout elapsed or the task was cancelled. If the
    /// timeout elapses while the task is running, the task is cancelled.
    pub fn wait(&self) -> Option<T>
    where
        T: Clone,
    {
        let timeout = self
            .core
            .engine
            .upgrade()
            .map_or(DEFAULT_AWAIT_TIMEOUT, |engine| engine.config().await_timeout);
        self.wait_timeout(timeout)
    }

    /// Wait for completion, bounded by `timeout`.
    ///
    /// Polls the task's observable flags with a short yield, matching the
    /// engine's cooperative scheduling model.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.core.cancelled.load(Ordering::Acquire) {
                return None;
            }
            // The counter trails the completion protocol, so returning
            // here means this iteration's subscribers have already run.
            if self.core.completions.load(Ordering::Acquire) > 0 {
                return self.latest_result();
            }
            if Instant::now() >= deadline {
                if self.core.is_running.load(Ordering::Acquire) {
                    self.cancel();
                }
                return None;
            }
            std::thread::yield_now();
        }
    }

    /// The result of the most recent completed iteration, if any.
    pub fn latest_result(&self) -> Option<T>
    where
        T: Clone,
    {
        let result = self.core.result.lock();
        result
            .as_ref()
            .and_then(|payload| payload.downcast_ref::<T>())
            .cloned()
    }

    /// Cancel the task if it is currently running.
    ///
    /// The executing worker is retired and rebuilt, the id is released
    /// and completion subscribers are torn down. Returns whether
    /// cancellation took effect.
    pub fn cancel(&self) -> bool {
        let Some(engine) = self.core.engine.upgrade() else {
            return false;
        };
        engine.cancel_task(&self.core)
    }

    /// Explicitly destroy the task, releasing its id.
    ///
    /// Required for [`ReleasePolicy::Manual`] tasks and for configured
    /// tasks that were never run. Releasing a running task is a fatal
    /// misuse; cancel it instead.
    pub fn release(&self) {
        if matches!(*self.core.state.lock(), TaskState::Running) {
            fatal(FatalKind::InvalidTask);
        }
        if let Some(engine) = self.core.engine.upgrade() {
            engine.queue.lock().remove(&self.core);
            engine.release_task(&self.core);
        }
    }
}

// Handles cross threads freely; the erased payloads they carry are
// Send + Sync by construction.
static_assertions::assert_impl_all!(Task<(), ()>: Send, Sync);

/// Type-erase a typed callback into the record representation.
pub(crate) fn erase_callback<A, T, F>(mut callback: F) -> ErasedCallback
where
    A: Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: FnMut(&A) -> T + Send + 'static,
{
    Box::new(move |args: &Payload| -> Payload {
        match args.downcast_ref::<A>() {
            Some(typed) => Arc::new(callback(typed)),
            // Arguments are typed at submission and only replaced through
            // the typed handle, so a mismatch cannot legitimately occur.
            None => fatal(FatalKind::InvariantViolation),
        }
    })
}

/// Type-erase an argument value.
pub(crate) fn erase_args<A>(args: A) -> Payload
where
    A: Send + Sync + 'static,
{
    Arc::new(args) as Payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone_core(callback: ErasedCallback) -> TaskCore {
        let mut ids = crate::ids::IdAllocator::new(8);
        TaskCore::new(ids.acquire().unwrap(), Weak::new(), callback, erase_args(()))
    }

    #[test]
    fn erased_callback_roundtrip() {
        let core = standalone_core(erase_callback(|n: &i32| n + 1));
        *core.args.lock() = erase_args(41i32);

        let args = core.args.lock().clone();
        let result = core.invoke(&args);
        assert_eq!(result.downcast_ref::<i32>(), Some(&42));
    }

    #[test]
    fn new_core_has_engine_defaults() {
        let core = standalone_core(erase_callback(|_: &()| ()));
        assert_eq!(core.priority(), DEFAULT_PRIORITY);
        assert_eq!(core.delay_ms.load(Ordering::Relaxed), 0);
        assert_eq!(core.interval_ms.load(Ordering::Relaxed), 0);
        assert_eq!(core.repeat_left.load(Ordering::Relaxed), 1);
        assert!(!core.infinite.load(Ordering::Relaxed));
        assert!(!core.manual_release.load(Ordering::Relaxed));
        assert_eq!(*core.state.lock(), TaskState::Configured);
    }

    #[test]
    #[should_panic(expected = "fatal engine error 14")]
    fn invoking_discarded_callback_is_fatal() {
        let core = standalone_core(erase_callback(|_: &()| ()));
        core.discard_callback();
        let args = core.args.lock().clone();
        core.invoke(&args);
    }
}
