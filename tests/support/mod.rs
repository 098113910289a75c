//! Shared test doubles and harness, grounded in the teacher's convention of
//! swapping concrete collaborators for controllable fakes in integration
//! tests (see `acton-htmx/tests/htmx_responders.rs`'s `test_app()` helper).
//! The ERP driver and local data store are opaque collaborators outside this
//! crate's scope, so handlers here stand in for `handlers::operations`'s
//! concrete implementations.

use async_trait::async_trait;
use opqueue::agent_lock::AgentLock;
use opqueue::handlers::{Handler, HandlerRegistry, ProgressReporter};
use opqueue::jobs::{
    CancellationToken, HandlerError, HandlerResult, InMemoryQueue, JobCancellationManager,
    OperationType, Queue,
};
use opqueue::processor::{Processor, ProcessorConfig};
use opqueue::realtime::{RealtimeHub, RealtimeHubConfig};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A handler whose behavior is dictated by the test. Notifies `started` on
/// every invocation so a test can synchronize on "the processor picked this
/// job up" without polling.
pub struct ControllableHandler {
    pub attempts: AtomicU32,
    pub started: Notify,
    fail_transient_times: u32,
    hang: bool,
}

impl ControllableHandler {
    #[must_use]
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self { attempts: AtomicU32::new(0), started: Notify::new(), fail_transient_times: 0, hang: false })
    }

    #[must_use]
    pub fn failing_then_succeeding(times: u32) -> Arc<Self> {
        Arc::new(Self { attempts: AtomicU32::new(0), started: Notify::new(), fail_transient_times: times, hang: false })
    }

    #[must_use]
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self { attempts: AtomicU32::new(0), started: Notify::new(), fail_transient_times: 0, hang: true })
    }

    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for ControllableHandler {
    async fn execute(
        &self,
        _user_id: &str,
        _payload: &serde_json::Value,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> HandlerResult<serde_json::Value> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        progress.report("running", 0, "started").await;
        self.started.notify_one();

        if self.hang {
            loop {
                if cancel.is_cancelled() {
                    return Err(HandlerError::Permanent("wound down on cancellation".into()));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        if attempt <= self.fail_transient_times {
            return Err(HandlerError::Transient(format!("induced failure on attempt {attempt}")));
        }

        Ok(json!({ "attempt": attempt }))
    }
}

/// Wires a queue, agent lock, realtime hub, and handler registry together the
/// way `main.rs` does, minus the HTTP surface, so scenario tests can drive
/// the execution pipeline directly.
pub struct Harness {
    pub queue: Arc<InMemoryQueue>,
    pub lock: AgentLock,
    pub hub: RealtimeHub,
    pub registry: HandlerRegistry,
    pub cancellation: JobCancellationManager,
}

impl Harness {
    #[must_use]
    pub fn new(lease_duration: Duration) -> Self {
        Self::with_cancellation(lease_duration, JobCancellationManager::new())
    }

    /// Like `new`, but shares an externally owned cancellation manager (e.g.
    /// one also held by a `JobShutdownCoordinator` under test).
    #[must_use]
    pub fn with_cancellation(lease_duration: Duration, cancellation: JobCancellationManager) -> Self {
        Self {
            queue: Arc::new(InMemoryQueue::new(lease_duration)),
            lock: AgentLock::new(),
            hub: RealtimeHub::new(RealtimeHubConfig {
                buffer_size: 50,
                buffer_ttl: Duration::from_secs(60),
                heartbeat_interval: Duration::from_secs(30),
            }),
            registry: HandlerRegistry::new(),
            cancellation,
        }
    }

    pub fn register(&mut self, op: OperationType, handler: Arc<dyn Handler>) {
        self.registry.register(op, handler);
    }

    /// Spawn a processor partition over this harness's shared queue/lock/hub.
    /// Runs until the returned handle is aborted; callers that don't need
    /// orderly shutdown can just drop or abort it at the end of the test.
    #[must_use]
    pub fn spawn_processor(&self, config: ProcessorConfig) -> tokio::task::JoinHandle<()> {
        let queue: Arc<dyn Queue> = self.queue.clone();
        let processor = Processor::new(
            queue,
            self.lock.clone(),
            self.registry.clone(),
            self.hub.clone(),
            config,
            self.cancellation.clone(),
        );
        let never_shuts_down = CancellationToken::new();
        tokio::spawn(async move { processor.run(never_shuts_down).await })
    }
}

#[must_use]
pub fn fast_processor_config() -> ProcessorConfig {
    ProcessorConfig {
        preemption_deadline: Duration::from_millis(200),
        preemption_poll_interval: Duration::from_millis(5),
        lease_duration: Duration::from_secs(10),
    }
}
