//! Scenario 6 (`SPEC_FULL.md` §8): two users' jobs run concurrently on
//! separate processor partitions. The agent lock is per-user, so one user's
//! in-flight job must never block another user's job from starting.

mod support;

use opqueue::jobs::{EnqueueOptions, JobState, OperationType, Queue};
use serde_json::json;
use std::time::Duration;
use support::{fast_processor_config, ControllableHandler, Harness};

#[tokio::test]
async fn two_users_jobs_run_concurrently_without_blocking_each_other() {
    let mut harness = Harness::new(Duration::from_secs(60));
    let handler = ControllableHandler::hanging();
    harness.register(OperationType::SubmitOrder, handler.clone());

    let config = fast_processor_config();
    let worker_a = harness.spawn_processor(config);
    let worker_b = harness.spawn_processor(config);

    let u1_job = harness
        .queue
        .enqueue("u1", OperationType::SubmitOrder, json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let u2_job = harness
        .queue
        .enqueue("u2", OperationType::SubmitOrder, json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    // Both should start within a short window; if the lock were accidentally
    // scoped globally instead of per-user, the second would never start
    // while the first (a hanging handler) holds it. Poll the shared attempt
    // counter rather than `Notify` since two near-simultaneous `notify_one`
    // calls with no waiter yet registered would otherwise coalesce into one.
    tokio::time::timeout(Duration::from_millis(500), async {
        while handler.attempt_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both users' jobs should start concurrently, not serialize behind one lock");

    assert_eq!(harness.lock.holder_of("u1"), Some(u1_job));
    assert_eq!(harness.lock.holder_of("u2"), Some(u2_job));

    let u1_state = harness.queue.get(u1_job).await.unwrap().unwrap().state;
    let u2_state = harness.queue.get(u2_job).await.unwrap().unwrap().state;
    assert!(matches!(u1_state, JobState::Active { .. }), "{u1_state:?}");
    assert!(matches!(u2_state, JobState::Active { .. }), "{u2_state:?}");

    worker_a.abort();
    worker_b.abort();
}
