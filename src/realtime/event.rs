//! Lifecycle events broadcast by the `Real-Time Hub` (`SPEC_FULL.md` §3, §4.5).

use crate::jobs::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of a lifecycle event. `Progress` is transient (never buffered for
/// replay); the rest are durable within the ring buffer's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
}

impl EventKind {
    /// Progress updates are high-frequency and not worth replaying after a
    /// reconnect; everything else is.
    #[must_use]
    pub const fn is_replayable(self) -> bool {
        !matches!(self, Self::JobProgress)
    }
}

/// A single lifecycle notification for one job, delivered to every connected
/// client for that job's user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub user_id: String,
    pub job_id: JobId,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl LifecycleEvent {
    #[must_use]
    pub fn new(user_id: impl Into<String>, job_id: JobId, kind: EventKind, payload: serde_json::Value) -> Self {
        Self { user_id: user_id.into(), job_id, kind, timestamp: Utc::now(), payload }
    }
}

/// Wire envelope sent over the WebSocket, matching the `{ type, payload,
/// timestamp }` shape of `SPEC_FULL.md` §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl From<&LifecycleEvent> for WireEvent {
    fn from(event: &LifecycleEvent) -> Self {
        Self { kind: event.kind, payload: event.payload.clone(), timestamp: event.timestamp }
    }
}
