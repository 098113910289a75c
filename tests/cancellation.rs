//! Scenario: REST-initiated cancellation and graceful shutdown draining
//! (`SPEC_FULL.md` §4.3 step 4, §4.6). Exercises the job-id-keyed
//! cancellation path that's distinct from `AgentLock`'s preemption callback,
//! so a cancelled job is never misclassified as a preempted one.

mod support;

use opqueue::jobs::{
    EnqueueOptions, JobShutdownCoordinator, JobState, OperationType, Queue, SyncKind,
};
use serde_json::json;
use std::time::Duration;
use support::{fast_processor_config, ControllableHandler, Harness};

#[tokio::test]
async fn rest_initiated_cancel_fails_the_job_without_misclassifying_as_preemption() {
    let mut harness = Harness::new(Duration::from_secs(60));
    let handler = ControllableHandler::hanging();
    harness.register(OperationType::Sync(SyncKind::Orders), handler.clone());
    let worker = harness.spawn_processor(fast_processor_config());

    let job_id = harness
        .queue
        .enqueue("u1", OperationType::Sync(SyncKind::Orders), json!({}), EnqueueOptions::default())
        .await
        .expect("enqueue sync job");

    handler.started.notified().await;
    assert_eq!(harness.lock.holder_of("u1"), Some(job_id));

    assert!(harness.cancellation.cancel_job(&job_id), "job must be registered for cancellation once active");

    let mut job = None;
    for _ in 0..2000 {
        if let Some(candidate) = harness.queue.get(job_id).await.unwrap() {
            if candidate.state.is_terminal() {
                job = Some(candidate);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let job = job.expect("job never reached a terminal state after cancellation");

    assert!(
        matches!(job.state, JobState::Failed { ref error, .. } if error == "cancelled"),
        "a REST cancel must fail the job as cancelled, not requeue it as preempted: {:?}",
        job.state
    );
    assert_eq!(harness.lock.holder_of("u1"), None, "lock must be released after the cancelled job finishes");

    worker.abort();
}

#[tokio::test]
async fn cancelling_an_unknown_job_id_is_a_noop() {
    let harness = Harness::new(Duration::from_secs(60));
    let bogus = opqueue::jobs::JobId::new();
    assert!(!harness.cancellation.cancel_job(&bogus));
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_an_in_flight_job_before_reporting_graceful() {
    let shutdown = JobShutdownCoordinator::new();
    let mut harness = Harness::with_cancellation(Duration::from_secs(60), shutdown.cancellation_manager().clone());
    let handler = ControllableHandler::hanging();
    harness.register(OperationType::Sync(SyncKind::Orders), handler.clone());
    let worker = harness.spawn_processor(fast_processor_config());

    let job_id = harness
        .queue
        .enqueue("u1", OperationType::Sync(SyncKind::Orders), json!({}), EnqueueOptions::default())
        .await
        .expect("enqueue sync job");

    handler.started.notified().await;
    assert_eq!(shutdown.cancellation_manager().active_count(), 1, "run_one must register the in-flight job");

    let result = shutdown.shutdown(Duration::from_secs(5)).await;
    assert!(result.is_graceful(), "shutdown should drain the registered job within its grace period: {result:?}");

    let job = harness.queue.get(job_id).await.unwrap().expect("job still exists");
    assert!(
        matches!(job.state, JobState::Failed { ref error, .. } if error == "cancelled"),
        "a shutdown-driven cancellation must still resolve the job to a terminal state: {:?}",
        job.state
    );

    worker.abort();
}
