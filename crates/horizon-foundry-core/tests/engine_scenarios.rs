//! End-to-end scenarios exercising the engine through its public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use horizon_foundry_core::{Engine, EngineConfig, EngineError, ReleasePolicy};

fn engine_with(pool_size: usize, id_capacity: usize) -> Engine {
    Engine::new(
        EngineConfig::default()
            .with_pool_size(pool_size)
            .with_id_capacity(id_capacity),
    )
    .unwrap()
}

/// Wait until `predicate` holds, up to `timeout`.
fn eventually(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    predicate()
}

#[test]
fn simple_echo() {
    let engine = engine_with(4, 16);

    let task = engine
        .start(|text: &String| text.clone(), "testValue".to_string())
        .unwrap();

    let started = Instant::now();
    let result = task.wait_timeout(Duration::from_secs(1));
    assert_eq!(result.as_deref(), Some("testValue"));
    assert!(started.elapsed() < Duration::from_secs(1));

    engine.shutdown();
}

#[test]
fn on_complete_transform() {
    let engine = engine_with(4, 16);
    let buffer = Arc::new(Mutex::new(String::new()));

    let task = engine
        .make_task(
            |buffer: &Arc<Mutex<String>>| {
                *buffer.lock() = "testValue".to_string();
                buffer.clone()
            },
            buffer.clone(),
        )
        .unwrap()
        .on_complete(|result: &Arc<Mutex<String>>| {
            *result.lock() = "valueTest".to_string();
        });

    task.run().unwrap();
    assert!(task.wait_timeout(Duration::from_secs(5)).is_some());

    // The completion subscriber has run by the time wait returns.
    assert_eq!(*buffer.lock(), "valueTest");

    engine.shutdown();
}

#[test]
fn exhausting_workers() {
    // 4 workers, one of which hosts the scheduler.
    let engine = engine_with(4, 16);
    let completed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let completed = completed.clone();
        let task = engine
            .start(
                move |value: &&'static str| {
                    completed.fetch_add(1, Ordering::SeqCst);
                    *value
                },
                "actual",
            )
            .unwrap();
        tasks.push(task);
    }

    let last = tasks.last().unwrap();
    assert_eq!(last.wait(), Some("actual"));
    assert!(eventually(Duration::from_secs(10), || {
        completed.load(Ordering::SeqCst) == 16
    }));

    engine.shutdown();
}

#[test]
fn priority_preemption() {
    let engine = engine_with(4, 16);
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_a = order.clone();
    let slow = engine
        .make_task(
            move |_: &()| {
                order_a.lock().push('A');
            },
            (),
        )
        .unwrap()
        .with_priority(5)
        .with_delay(Duration::from_millis(100));
    slow.run().unwrap();

    let order_b = order.clone();
    let urgent = engine
        .make_task(
            move |_: &()| {
                order_b.lock().push('B');
            },
            (),
        )
        .unwrap()
        .with_priority(0);
    urgent.run().unwrap();

    assert!(eventually(Duration::from_secs(5), || order.lock().len() == 2));
    assert_eq!(*order.lock(), vec!['B', 'A']);

    engine.shutdown();
}

#[test]
fn periodic_repetition() {
    let engine = engine_with(4, 16);
    let counter = Arc::new(AtomicUsize::new(0));

    let task = engine
        .make_task(
            {
                let counter = counter.clone();
                move |_: &()| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
            (),
        )
        .unwrap()
        .with_interval(Duration::from_millis(10), 3);
    let id = task.id();
    task.run().unwrap();

    assert!(task.wait_timeout(Duration::from_secs(5)).is_some());
    assert!(eventually(Duration::from_secs(5), || {
        counter.load(Ordering::SeqCst) == 3
    }));

    // No further iterations happen after the count is exhausted.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(task.completions(), 3);

    // The id stayed with the task across iterations and is free again now.
    assert!(eventually(Duration::from_secs(1), || engine.live_tasks() == 0));
    let next = engine.make_task(|_: &()| (), ()).unwrap();
    assert_eq!(next.id(), id);

    engine.shutdown();
}

#[test]
fn cancel_on_timeout() {
    let engine = Engine::new(
        EngineConfig::default()
            .with_pool_size(4)
            .with_id_capacity(1)
            .with_await_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let task = engine
        .start(
            |_: &()| {
                std::thread::sleep(Duration::from_secs(10));
            },
            (),
        )
        .unwrap();
    let cancelled_id = task.id();

    // Let the scheduler hand the task to a worker before awaiting.
    assert!(eventually(Duration::from_secs(2), || task.is_running()));

    assert_eq!(task.wait(), None);
    assert!(task.is_cancelled());
    assert!(!task.is_running());

    // The id is immediately reacquirable even with capacity 1.
    let follow_up = engine.make_task(|_: &()| (), ()).unwrap();
    assert_eq!(follow_up.id(), cancelled_id);

    engine.shutdown();
}

#[test]
fn id_exhaustion_is_recoverable() {
    let engine = engine_with(2, 2);

    let first = engine.make_task(|_: &()| (), ()).unwrap();
    let second = engine.make_task(|_: &()| (), ()).unwrap();
    assert!(matches!(
        engine.make_task(|_: &()| (), ()),
        Err(EngineError::Unavailable)
    ));

    first.release();
    let replacement = engine.make_task(|_: &()| (), ()).unwrap();
    assert_eq!(replacement.id(), first.id());

    let _ = second;
    engine.shutdown();
}

#[test]
fn run_with_args_replaces_stored_arguments() {
    let engine = engine_with(4, 16);

    let task = engine
        .make_task(|text: &String| text.to_uppercase(), "stored".to_string())
        .unwrap();
    task.run_with_args("override".to_string()).unwrap();

    assert_eq!(
        task.wait_timeout(Duration::from_secs(5)).as_deref(),
        Some("OVERRIDE")
    );

    engine.shutdown();
}

#[test]
fn completion_subscriber_observes_done_flag() {
    let engine = engine_with(4, 16);
    let observed_done = Arc::new(AtomicBool::new(false));

    let task = engine.make_task(|_: &()| 7u32, ()).unwrap();
    let probe = task.clone();
    let observed = observed_done.clone();
    let task = task.on_complete(move |_| {
        observed.store(probe.is_done(), Ordering::SeqCst);
    });

    task.run().unwrap();
    assert_eq!(task.wait_timeout(Duration::from_secs(5)), Some(7));
    assert!(observed_done.load(Ordering::SeqCst));

    engine.shutdown();
}

#[test]
fn wait_is_bounded() {
    let engine = engine_with(2, 4);

    // Never submitted: wait must give up on its own.
    let task = engine.make_task(|_: &()| (), ()).unwrap();
    let started = Instant::now();
    assert_eq!(task.wait_timeout(Duration::from_millis(100)), None);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");

    engine.shutdown();
}

#[test]
fn manual_task_is_retained() {
    let engine = engine_with(4, 1);

    let task = engine
        .make_task(|_: &()| "kept".to_string(), ())
        .unwrap()
        .as_manual();
    assert_eq!(task.release_policy(), ReleasePolicy::Manual);
    task.run().unwrap();

    assert_eq!(task.wait_timeout(Duration::from_secs(5)).as_deref(), Some("kept"));

    // Still live after completion: the single id stays reserved.
    assert_eq!(engine.live_tasks(), 1);
    assert!(matches!(
        engine.make_task(|_: &()| (), ()),
        Err(EngineError::Unavailable)
    ));

    // A manual task can be re-run with fresh arguments.
    task.run().unwrap();
    assert!(eventually(Duration::from_secs(5), || task.completions() == 2));

    task.release();
    assert_eq!(engine.live_tasks(), 0);
    assert!(engine.make_task(|_: &()| (), ()).is_ok());

    engine.shutdown();
}

#[test]
fn equal_priorities_run_in_submission_order() {
    let engine = engine_with(2, 32);
    let order = Arc::new(Mutex::new(Vec::new()));

    // A single executor worker serializes execution; equal priorities
    // must then follow submission order.
    for index in 0..8 {
        let order = order.clone();
        engine
            .start(
                move |_: &()| {
                    order.lock().push(index);
                },
                (),
            )
            .unwrap();
    }

    assert!(eventually(Duration::from_secs(10), || order.lock().len() == 8));
    assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());

    engine.shutdown();
}

#[test]
fn cancelled_task_does_not_block_the_pool() {
    let engine = engine_with(3, 8);
    let release = Arc::new(AtomicBool::new(false));

    let release_clone = release.clone();
    let stuck = engine
        .start(
            move |_: &()| {
                while !release_clone.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
            },
            (),
        )
        .unwrap();
    assert!(eventually(Duration::from_secs(2), || stuck.is_running()));

    assert!(stuck.cancel());

    // The rebuilt worker picks up new tasks while the orphan still spins.
    let after = engine.start(|n: &i32| n + 1, 1).unwrap();
    assert_eq!(after.wait_timeout(Duration::from_secs(5)), Some(2));

    release.store(true, Ordering::SeqCst);
    engine.shutdown();
}
