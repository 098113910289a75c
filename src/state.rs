//! Shared application state, grounded on the teacher's `ActonHtmxState`
//! (`state/mod.rs`): one `Clone`-able struct built once at startup and handed
//! to the router, minus the acton-reactive `AgentHandle`s and `sqlx::PgPool`
//! the teacher wired in for its own domain.

use crate::agent_lock::AgentLock;
use crate::auth::VerifyToken;
use crate::config::OperationQueueConfig;
use crate::handlers::HandlerRegistry;
use crate::http::rest::SharedSyncIntervals;
use crate::jobs::{JobCancellationManager, Queue};
use crate::realtime::RealtimeHub;
use axum::extract::FromRef;
use std::sync::Arc;

/// Everything an HTTP or WebSocket handler needs, cloned cheaply (every
/// field is itself an `Arc` or `Arc`-backed handle).
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn Queue>,
    pub lock: AgentLock,
    pub registry: HandlerRegistry,
    pub hub: RealtimeHub,
    pub verifier: VerifyToken,
    pub config: Arc<OperationQueueConfig>,
    pub sync_intervals: SharedSyncIntervals,
    /// Shared with every `Processor` partition so a REST-initiated cancel
    /// reaches the job regardless of which partition leased it.
    pub cancellation: JobCancellationManager,
}

impl AppState {
    #[must_use]
    pub fn new(
        queue: Arc<dyn Queue>,
        lock: AgentLock,
        registry: HandlerRegistry,
        hub: RealtimeHub,
        config: OperationQueueConfig,
        cancellation: JobCancellationManager,
    ) -> Self {
        let verifier = VerifyToken::from_hmac_secret(&config.jwt_secret);
        Self {
            queue,
            lock,
            registry,
            hub,
            verifier,
            config: Arc::new(config),
            sync_intervals: SharedSyncIntervals::default(),
            cancellation,
        }
    }
}

impl FromRef<AppState> for VerifyToken {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

impl FromRef<AppState> for SharedSyncIntervals {
    fn from_ref(state: &AppState) -> Self {
        state.sync_intervals.clone()
    }
}
