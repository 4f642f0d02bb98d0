//! The scheduling loop: priority aging and task assignment.
//!
//! The scheduler runs as a job pinned to the pool's first worker for the
//! engine's whole lifetime. Each tick it stable-sorts the pending queue by
//! priority, runs the aging rule over every waiting task, and assigns the
//! head task to an idle worker once its deadline is close enough.
//!
//! # Priority aging
//!
//! `time_to_fire` counts down toward each task's deadline. Per tick:
//!
//! - deadline within the urgency window: priority forced to 0,
//! - deadline at least the relax threshold away: priority incremented,
//! - otherwise: priority decremented toward 0, one step per tick.
//!
//! Tasks whose deadline is imminent therefore overtake older work, tasks
//! far in the future drift back, and everything in between slowly climbs.
//! The sort is stable, so equal priorities stay FIFO by enqueue time.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::engine::EngineShared;
use crate::logging::targets;
use crate::task::TaskCore;
use crate::worker::{WorkerJob, WorkerShared};

/// A task whose deadline lies within this window is due: its priority is
/// forced to 0 and the head task is considered eligible for assignment.
pub(crate) const URGENCY_WINDOW_MS: i64 = 5;

/// A task whose deadline is at least this far away relaxes, stepping its
/// priority away from 0.
pub(crate) const RELAX_THRESHOLD_MS: i64 = 5000;

/// Sleep between ticks when there is nothing eligible to assign.
const IDLE_TICK: Duration = Duration::from_millis(1);

/// The scheduler loop. Runs until the engine stops or the hosting worker
/// is retired.
pub(crate) fn run(engine: &Arc<EngineShared>, me: &Arc<WorkerShared>) {
    tracing::debug!(target: targets::SCHEDULER, "scheduler started");
    while engine.is_live() && !me.is_retired() {
        if !tick(engine) {
            std::thread::sleep(IDLE_TICK);
        }
    }
    tracing::debug!(target: targets::SCHEDULER, "scheduler stopped");
}

/// One scheduling tick. Returns whether a task was assigned.
#[tracing::instrument(skip_all, target = "horizon_foundry_core::scheduler", level = "trace")]
fn tick(engine: &Arc<EngineShared>) -> bool {
    let now = Instant::now();
    {
        let mut queue = engine.queue.lock();
        if queue.is_empty() {
            return false;
        }
        queue.sort_by_priority();
        queue.for_each(|task| age(task, now));

        let Some(head) = queue.head() else {
            return false;
        };
        if head.time_to_fire_ms.load(Ordering::Relaxed) > URGENCY_WINDOW_MS {
            // Head not yet eligible; let the clock advance.
            return false;
        }
    }
    assign_head(engine)
}

/// Spin for an idle worker, then hand it the queue head.
fn assign_head(engine: &Arc<EngineShared>) -> bool {
    loop {
        if !engine.is_live() {
            return false;
        }
        let Some(index) = claim_idle_worker(engine) else {
            std::thread::yield_now();
            continue;
        };

        // Re-check the head under the queue lock: it may have been
        // released while we were spinning for a worker.
        let task = {
            let mut queue = engine.queue.lock();
            match queue.head() {
                Some(head)
                    if head.time_to_fire_ms.load(Ordering::Relaxed) <= URGENCY_WINDOW_MS =>
                {
                    queue.pop_head()
                }
                _ => None,
            }
        };
        let Some(task) = task else {
            unclaim_worker(engine, index);
            return false;
        };

        *task.worker.lock() = Some(index);
        let delivered = {
            let workers = engine.workers.lock();
            workers
                .get(index)
                .is_some_and(|worker| worker.assign(WorkerJob::Run(task.clone())))
        };
        if !delivered {
            // The pool is being torn down; free the stranded task.
            unclaim_worker(engine, index);
            *task.worker.lock() = None;
            engine.release_task(&task);
            return false;
        }

        tracing::trace!(target: targets::SCHEDULER, task = %task.id, worker = index, "task assigned");
        return true;
    }
}

/// Find an idle worker and mark it busy. The worker itself clears the
/// flag once it finishes the assignment.
fn claim_idle_worker(engine: &Arc<EngineShared>) -> Option<usize> {
    let workers = engine.workers.lock();
    for worker in workers.iter() {
        let shared = &worker.shared;
        if !shared.is_retired() && !shared.busy.swap(true, Ordering::AcqRel) {
            return Some(shared.index);
        }
    }
    None
}

fn unclaim_worker(engine: &Arc<EngineShared>, index: usize) {
    let workers = engine.workers.lock();
    if let Some(worker) = workers.get(index) {
        worker.shared.busy.store(false, Ordering::Release);
    }
}

/// The per-task aging rule.
fn age(task: &Arc<TaskCore>, now: Instant) {
    let mut last_check = task.last_check.lock();
    let elapsed_ms = last_check
        .map_or(0, |last| now.saturating_duration_since(last).as_millis() as i64);
    *last_check = Some(now);

    let time_to_fire = task.time_to_fire_ms.load(Ordering::Relaxed) - elapsed_ms;
    task.time_to_fire_ms.store(time_to_fire, Ordering::Relaxed);

    if time_to_fire <= URGENCY_WINDOW_MS {
        task.priority.store(0, Ordering::Relaxed);
    } else if time_to_fire >= RELAX_THRESHOLD_MS {
        task.priority.fetch_add(1, Ordering::Relaxed);
    } else {
        let priority = task.priority.load(Ordering::Relaxed);
        if priority > 0 {
            task.priority.store(priority - 1, Ordering::Relaxed);
        }
    }
}
