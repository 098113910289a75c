//! Scenario 5 and the WS re-attach round-trip law (`SPEC_FULL.md` §8): a
//! client that disconnects and reattaches with `resumeAfter=t` receives every
//! buffered, replayable event with `timestamp > t`, in order, and none of the
//! progress events (which are never buffered).

mod support;

use opqueue::jobs::{EnqueueOptions, JobState, OperationType, Queue, SyncKind};
use opqueue::realtime::EventKind;
use serde_json::json;
use std::time::Duration;
use support::{fast_processor_config, ControllableHandler, Harness};

#[tokio::test]
async fn reattach_with_resume_after_replays_only_later_events_and_skips_progress() {
    let mut harness = Harness::new(Duration::from_secs(60));
    let handler = ControllableHandler::succeeding();
    harness.register(OperationType::Sync(SyncKind::Orders), handler.clone());
    let worker = harness.spawn_processor(fast_processor_config());

    let first_job = harness
        .queue
        .enqueue("u1", OperationType::Sync(SyncKind::Orders), json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    wait_for_completion(&harness, first_job).await;

    // Give the queue's dedup token release (on terminal ack) a moment, then
    // mark the boundary strictly after the first job's events.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let boundary = chrono::Utc::now();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second_job = harness
        .queue
        .enqueue("u1", OperationType::Sync(SyncKind::Orders), json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    wait_for_completion(&harness, second_job).await;
    // Let the progress-report task publish before we inspect the buffer.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (_conn, replay) = harness.hub.attach("u1", Some(boundary));

    assert!(!replay.is_empty(), "replay should contain the second job's lifecycle events");
    for event in &replay {
        assert!(event.timestamp > boundary, "resumeAfter is exclusive: no event at or before the boundary");
        assert_ne!(event.kind, EventKind::JobProgress, "progress events are never replayed");
    }

    let kinds: Vec<EventKind> = replay.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::JobStarted));
    assert_eq!(kinds.last(), Some(&EventKind::JobCompleted));
    for window in replay.windows(2) {
        assert!(window[0].timestamp <= window[1].timestamp, "replayed events must stay in timestamp order");
    }

    worker.abort();
}

async fn wait_for_completion(harness: &Harness, job_id: opqueue::jobs::JobId) {
    for _ in 0..500 {
        if let Some(job) = harness.queue.get(job_id).await.unwrap() {
            if matches!(job.state, JobState::Completed { .. }) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never completed");
}
