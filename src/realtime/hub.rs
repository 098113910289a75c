//! The `Real-Time Hub` (`SPEC_FULL.md` §4.5): per-user fan-out with replay
//! and drop-on-overflow back-pressure, grounded in the sharded
//! `Arc<RwLock<HashMap<...>>>` shape of the teacher's `rate_limit` middleware.

use super::event::{EventKind, LifecycleEvent, WireEvent};
use super::ring_buffer::RingBuffer;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-connection outbound queue depth before a slow consumer is dropped.
const CONNECTION_QUEUE_DEPTH: usize = 64;

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(0);

/// A handle a WebSocket task uses to receive events and detect its own
/// disconnect.
pub struct Connection {
    pub id: u64,
    pub user_id: String,
    pub receiver: mpsc::Receiver<WireEvent>,
}

struct Subscriber {
    sender: mpsc::Sender<WireEvent>,
}

struct PerUserState {
    buffer: RingBuffer,
    subscribers: HashMap<u64, Subscriber>,
}

/// Configuration for the hub's ring buffers.
#[derive(Debug, Clone, Copy)]
pub struct RealtimeHubConfig {
    pub buffer_size: usize,
    pub buffer_ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RealtimeHubConfig {
    fn default() -> Self {
        Self {
            buffer_size: 200,
            buffer_ttl: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Fan-out hub shared across all HTTP/WS handlers.
#[derive(Clone)]
pub struct RealtimeHub {
    config: RealtimeHubConfig,
    users: Arc<RwLock<HashMap<String, PerUserState>>>,
}

impl RealtimeHub {
    #[must_use]
    pub fn new(config: RealtimeHubConfig) -> Self {
        Self { config, users: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Register a new connection for `user_id`. If `resume_after` is given,
    /// the caller should first drain `replay` before forwarding live events
    /// from the returned `Connection`.
    pub fn attach(&self, user_id: &str, resume_after: Option<DateTime<Utc>>) -> (Connection, Vec<WireEvent>) {
        let id = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE_DEPTH);

        let mut users = self.users.write();
        let state = users.entry(user_id.to_string()).or_insert_with(|| PerUserState {
            buffer: RingBuffer::new(self.config.buffer_size, self.config.buffer_ttl),
            subscribers: HashMap::new(),
        });
        let replay = state.buffer.since(resume_after).iter().map(WireEvent::from).collect();
        state.subscribers.insert(id, Subscriber { sender: tx });
        debug!(%user_id, connection_id = id, "attached realtime connection");

        (Connection { id, user_id: user_id.to_string(), receiver: rx }, replay)
    }

    /// Remove a connection. Idempotent.
    pub fn detach(&self, user_id: &str, connection_id: u64) {
        if let Some(state) = self.users.write().get_mut(user_id) {
            state.subscribers.remove(&connection_id);
        }
    }

    /// Publish an event: append to the user's ring buffer (if replayable) and
    /// push to every live subscriber. Slow subscribers whose queue is full
    /// are dropped rather than allowed to back the publisher up.
    pub fn publish(&self, event: LifecycleEvent) {
        let wire = WireEvent::from(&event);
        let mut users = self.users.write();
        let state = users.entry(event.user_id.clone()).or_insert_with(|| PerUserState {
            buffer: RingBuffer::new(self.config.buffer_size, self.config.buffer_ttl),
            subscribers: HashMap::new(),
        });

        let mut dead = Vec::new();
        for (&id, subscriber) in &state.subscribers {
            match subscriber.sender.try_send(wire.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(user_id = %event.user_id, connection_id = id, "dropping slow realtime connection");
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            state.subscribers.remove(&id);
        }
        state.buffer.push(event);
    }

    /// Broadcast to every connected user, regardless of which user owns a job.
    pub fn broadcast_all(&self, kind: EventKind, payload: serde_json::Value) {
        let user_ids: Vec<String> = self.users.read().keys().cloned().collect();
        for user_id in user_ids {
            self.publish(LifecycleEvent::new(user_id, crate::jobs::JobId::new(), kind, payload.clone()));
        }
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    /// Number of users with at least one live connection or buffered
    /// history. Exposed for the admin monitoring snapshot.
    #[must_use]
    pub fn tracked_user_count(&self) -> usize {
        self.users.read().len()
    }
}
