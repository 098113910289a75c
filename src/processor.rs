//! The `Operation Processor` (`SPEC_FULL.md` §4.3): the main execution loop
//! tying the queue, agent lock, handler registry, and realtime hub together.

use crate::agent_lock::{AcquireResult, AgentLock};
use crate::handlers::{HandlerRegistry, Progress, ProgressReporter};
use crate::jobs::{
    AckOutcome, CancelReason, CombinedCancellation, HandlerPolicy, JobCancellationManager,
    JobEnvelope, Queue,
};
use crate::realtime::{EventKind, LifecycleEvent, RealtimeHub};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

/// Tunables for the preemption and lease-renewal protocol, sourced from
/// `SPEC_FULL.md` §6 env config.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub preemption_deadline: Duration,
    pub preemption_poll_interval: Duration,
    pub lease_duration: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            preemption_deadline: Duration::from_secs(30),
            preemption_poll_interval: Duration::from_millis(500),
            lease_duration: Duration::from_secs(600),
        }
    }
}

/// One logical worker over a `Queue`. Run several concurrently (one per
/// partition) to get cross-user parallelism while staying single-flow per
/// user (`SPEC_FULL.md` §5).
pub struct Processor {
    queue: Arc<dyn Queue>,
    lock: AgentLock,
    registry: HandlerRegistry,
    hub: RealtimeHub,
    config: ProcessorConfig,
    /// Job-id-keyed cancellation, distinct from `AgentLock`'s user-id-keyed
    /// preemption callback. A REST-initiated cancel or a shutdown drain goes
    /// through here, tagged `CancelReason::UserCancelled`, so it can never be
    /// misreported as a preemption.
    cancellation: JobCancellationManager,
}

impl Processor {
    #[must_use]
    pub fn new(
        queue: Arc<dyn Queue>,
        lock: AgentLock,
        registry: HandlerRegistry,
        hub: RealtimeHub,
        config: ProcessorConfig,
        cancellation: JobCancellationManager,
    ) -> Self {
        Self { queue, lock, registry, hub, config, cancellation }
    }

    /// Run the loop until `shutdown` fires. Each iteration leases exactly one
    /// job and drives it to completion before leasing the next.
    pub async fn run(&self, shutdown: crate::jobs::CancellationToken) {
        loop {
            let lease_fut = self.queue.lease();
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("processor shutting down, no further leases");
                    return;
                }
                result = lease_fut => {
                    match result {
                        Ok((job, token)) => self.run_one(job, token).await,
                        Err(err) => {
                            warn!(error = %err, "lease failed, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    }

    #[instrument(skip(self, job, token), fields(job_id = %job.id, user_id = %job.user_id, operation = %job.operation))]
    async fn run_one(&self, job: JobEnvelope, token: crate::jobs::LeaseToken) {
        let Some(handler) = self.registry.get(job.operation) else {
            warn!("no handler registered for operation type");
            let _ = self
                .queue
                .ack(token, AckOutcome::FailedPermanent("no handler registered".into()))
                .await;
            return;
        };

        let priority = job.priority;
        let user_id = job.user_id.clone();
        let combined = CombinedCancellation::new();

        // Preemption protocol (§4.3 steps 2-3).
        loop {
            let on_cancel = {
                let combined = combined.clone();
                Arc::new(move || combined.trigger(CancelReason::Preempted))
            };
            match self.lock.acquire(&user_id, job.id, priority, on_cancel) {
                AcquireResult::Acquired => break,
                AcquireResult::Busy(_incumbent) => {
                    let _ = self
                        .queue
                        .ack(token, AckOutcome::FailedRetry {
                            error: "agent lock busy".into(),
                            delay: Some(Duration::from_millis(500)),
                        })
                        .await;
                    return;
                }
                AcquireResult::Preemptable(_incumbent) => {
                    self.lock.request_cancel(&user_id);
                    let deadline = tokio::time::Instant::now() + self.config.preemption_deadline;
                    let mut acquired = false;
                    while tokio::time::Instant::now() < deadline {
                        tokio::time::sleep(self.config.preemption_poll_interval).await;
                        if let AcquireResult::Acquired =
                            self.lock.acquire(&user_id, job.id, priority, {
                                let combined = combined.clone();
                                Arc::new(move || combined.trigger(CancelReason::Preempted))
                            })
                        {
                            acquired = true;
                            break;
                        }
                    }
                    if acquired {
                        break;
                    }
                    let _ = self
                        .queue
                        .ack(token, AckOutcome::FailedRetry {
                            error: "preemption deadline exceeded".into(),
                            delay: Some(Duration::from_millis(500)),
                        })
                        .await;
                    return;
                }
            }
        }

        // Register the job-id-keyed cancellation path (§4.3 step 4): a REST
        // cancel or a shutdown drain trips this, not the preemption callback
        // above, so it's always classified as `CancelReason::UserCancelled`.
        let cancel_trigger: Arc<dyn Fn() + Send + Sync> = {
            let combined = combined.clone();
            Arc::new(move || combined.trigger(CancelReason::UserCancelled))
        };
        self.cancellation.register(job.id, cancel_trigger);

        let policy = HandlerPolicy::for_type(job.operation, job.idempotency_key.is_some());

        // Timeout trigger.
        {
            let combined = combined.clone();
            let timeout = policy.handler_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                combined.trigger(CancelReason::TimedOut);
            });
        }

        // Lease renewal, runs until the handler finishes.
        let renew_handle = {
            let queue = self.queue.clone();
            let interval = self.config.lease_duration / 2;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if queue.renew_lease(token).await.is_err() {
                        break;
                    }
                }
            })
        };

        self.hub.publish(LifecycleEvent::new(
            user_id.clone(),
            job.id,
            EventKind::JobStarted,
            serde_json::json!({ "operation": job.operation.to_string(), "attempt": job.attempts + 1 }),
        ));

        let (progress_tx, mut progress_rx) = mpsc::channel::<Progress>(32);
        let reporter = ProgressReporter::new(job.id, progress_tx);
        let hub = self.hub.clone();
        let progress_user = user_id.clone();
        let progress_job = job.id;
        let progress_task = tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                hub.publish(LifecycleEvent::new(
                    progress_user.clone(),
                    progress_job,
                    EventKind::JobProgress,
                    serde_json::json!({ "phase": update.phase, "pct": update.pct, "message": update.message }),
                ));
            }
        });

        let cancel_token = combined.token().clone();
        let outcome = tokio::select! {
            result = handler.execute(&user_id, &job.payload, reporter, cancel_token) => {
                Outcome::Finished(result)
            }
            () = combined.token().cancelled() => {
                Outcome::Cancelled(combined.reason().unwrap_or(CancelReason::UserCancelled))
            }
        };

        renew_handle.abort();
        progress_task.abort();

        let ack_outcome = match outcome {
            Outcome::Finished(Ok(_value)) => {
                self.hub.publish(LifecycleEvent::new(
                    user_id.clone(),
                    job.id,
                    EventKind::JobCompleted,
                    serde_json::json!({}),
                ));
                AckOutcome::Completed
            }
            Outcome::Finished(Err(err)) => {
                self.hub.publish(LifecycleEvent::new(
                    user_id.clone(),
                    job.id,
                    EventKind::JobFailed,
                    serde_json::json!({ "error": err.to_string() }),
                ));
                if err.is_retryable() && job.attempts_remaining() {
                    AckOutcome::FailedRetry { error: err.to_string(), delay: None }
                } else {
                    AckOutcome::FailedPermanent(err.to_string())
                }
            }
            Outcome::Cancelled(CancelReason::Preempted) => AckOutcome::RequeuedPreempted,
            Outcome::Cancelled(CancelReason::TimedOut) => {
                self.hub.publish(LifecycleEvent::new(
                    user_id.clone(),
                    job.id,
                    EventKind::JobFailed,
                    serde_json::json!({ "error": "timeout" }),
                ));
                AckOutcome::FailedPermanent("timeout".into())
            }
            Outcome::Cancelled(CancelReason::UserCancelled | CancelReason::LeaseStalled) => {
                self.hub.publish(LifecycleEvent::new(
                    user_id.clone(),
                    job.id,
                    EventKind::JobFailed,
                    serde_json::json!({ "error": "cancelled" }),
                ));
                AckOutcome::FailedPermanent("cancelled".into())
            }
        };

        if let Err(err) = self.queue.ack(token, ack_outcome).await {
            warn!(error = %err, "failed to ack job outcome");
        }
        self.lock.release(&user_id, job.id);
        self.cancellation.unregister(&job.id);
    }
}

enum Outcome {
    Finished(crate::jobs::HandlerResult<serde_json::Value>),
    Cancelled(CancelReason),
}
