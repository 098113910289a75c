//! Error taxonomy for the queue and handler layers (`SPEC_FULL.md` §7).

use thiserror::Error;

/// Result type for handler execution.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Error returned by a handler's `execute`. Handlers classify their own
/// failures into retryable vs non-retryable; the processor never guesses.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient failure (network blip, ERP hiccup, partial batch). Retried
    /// if attempts remain.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Business-rule rejection or malformed input discovered in flight.
    /// Never retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Handler reported its own serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HandlerError {
    /// Whether the processor should schedule a retry, given attempts remain.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors surfaced by the `Queue` component.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backing store (redis) is unreachable or returned an error.
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    /// Payload failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Referenced job does not exist.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Lease token did not match the job's current holder (stale lease).
    #[error("lease mismatch for job {0}")]
    LeaseMismatch(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Errors surfaced by the `AgentLock` component.
#[derive(Debug, Error)]
pub enum AgentLockError {
    /// The lock is held by a job the caller is not entitled to preempt.
    #[error("agent lock busy, held by job {0}")]
    Busy(String),

    /// Preemption was requested but the deadline elapsed before acquisition.
    #[error("preemption deadline exceeded waiting for user {0}")]
    PreemptionTimeout(String),
}

/// Errors surfaced by the `RealtimeHub` component.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Token failed verification at WebSocket handshake.
    #[error("invalid or expired token")]
    Unauthorized,

    /// Connection's outbound queue overflowed and was dropped.
    #[error("connection back-pressure exceeded, dropped")]
    BackPressure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_permanent_is_not() {
        assert!(HandlerError::Transient("x".into()).is_retryable());
        assert!(!HandlerError::Permanent("x".into()).is_retryable());
    }
}
