//! Smoke test for the umbrella re-exports.

use std::time::Duration;

use horizon_foundry::prelude::*;

#[test]
fn prelude_covers_the_common_path() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let engine = Engine::new(
        EngineConfig::default()
            .with_pool_size(3)
            .with_id_capacity(8),
    )
    .unwrap();

    let task: Task<u32, u32> = engine.start(|n: &u32| n * 2, 8).unwrap();
    let id: TaskId = task.id();
    assert!(id.as_usize() < 8);
    assert_eq!(task.release_policy(), ReleasePolicy::Default);
    assert_eq!(task.wait_timeout(Duration::from_secs(5)), Some(16));

    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
    assert!(!cancellation_requested());

    engine.shutdown();
}
