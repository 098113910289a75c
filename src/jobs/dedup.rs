//! Deduplication token acquisition (`SPEC_FULL.md` §4.1, §9).
//!
//! Simple mode holds the token for as long as the owning job is non-terminal;
//! release happens explicitly when the job reaches a terminal state. Throttle
//! mode is a plain TTL: redis enforces expiry, no explicit release needed.

use super::job::JobId;
use super::JobState;
use crate::jobs::error::QueueError;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A dedup key identifies the `(operation, userId[, idempotencyKey])` tuple
/// that must be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(pub String);

impl DedupKey {
    /// Simple-mode key: `sync-orders:user-42`.
    #[must_use]
    pub fn simple(op_key: &str, user_id: &str) -> Self {
        Self(format!("{op_key}:{user_id}"))
    }

    /// Throttle-mode key: `submit-order:user-42:idem-abc`.
    #[must_use]
    pub fn throttled(op_key: &str, user_id: &str, idempotency_key: &str) -> Self {
        Self(format!("{op_key}:{user_id}:{idempotency_key}"))
    }
}

/// Outcome of attempting to acquire a dedup token.
#[derive(Debug, Clone)]
pub enum DedupOutcome {
    /// No conflicting token existed; the caller's job is the new holder.
    Acquired,
    /// A live token already points at an existing job; coalesce onto it.
    Coalesced(JobId),
}

/// Acquires and releases dedup tokens. Implemented against redis for
/// production and an in-memory map for tests.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Attempt to acquire `key` for `holder`. `ttl = None` means simple mode
    /// (release must be called explicitly); `Some(ttl)` means throttle mode.
    async fn acquire(
        &self,
        key: &DedupKey,
        holder: JobId,
        ttl: Option<Duration>,
    ) -> Result<DedupOutcome, QueueError>;

    /// Release a simple-mode token. No-op for throttle-mode keys (they expire
    /// on their own).
    async fn release(&self, key: &DedupKey) -> Result<(), QueueError>;
}

/// Redis-backed dedup store using `SET NX` for atomic acquisition.
pub struct RedisDedupStore {
    pool: deadpool_redis::Pool,
    key_prefix: String,
}

impl RedisDedupStore {
    #[must_use]
    pub fn new(pool: deadpool_redis::Pool, key_prefix: impl Into<String>) -> Self {
        Self { pool, key_prefix: key_prefix.into() }
    }

    fn redis_key(&self, key: &DedupKey) -> String {
        format!("{}:dedup:{}", self.key_prefix, key.0)
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn acquire(
        &self,
        key: &DedupKey,
        holder: JobId,
        ttl: Option<Duration>,
    ) -> Result<DedupOutcome, QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let redis_key = self.redis_key(key);
        let holder_str = holder.to_string();

        let set: bool = match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(&redis_key)
                    .arg(&holder_str)
                    .arg("NX")
                    .arg("PX")
                    .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
                    .query_async::<_, Option<String>>(&mut *conn)
                    .await
                    .map_err(QueueError::from)?
                    .is_some()
            }
            None => conn
                .set_nx::<_, _, bool>(&redis_key, &holder_str)
                .await
                .map_err(QueueError::from)?,
        };

        if set {
            Ok(DedupOutcome::Acquired)
        } else {
            let existing: Option<String> = conn.get(&redis_key).await.map_err(QueueError::from)?;
            let existing_id = existing
                .and_then(|s| uuid::Uuid::parse_str(&s).ok())
                .map(JobId::from)
                .unwrap_or(holder);
            Ok(DedupOutcome::Coalesced(existing_id))
        }
    }

    async fn release(&self, key: &DedupKey) -> Result<(), QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let _: () = conn.del(self.redis_key(key)).await.map_err(QueueError::from)?;
        Ok(())
    }
}

/// In-memory dedup store for unit tests and the `InMemoryQueue` fake.
#[derive(Default)]
pub struct InMemoryDedupStore {
    tokens: Arc<Mutex<HashMap<String, (JobId, Option<tokio::time::Instant>)>>>,
}

impl InMemoryDedupStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Release the dedup token once a job (simple mode) reaches a terminal
    /// state; called by the queue's `Ack` path.
    pub async fn release_if_terminal(&self, key: &DedupKey, state: &JobState) {
        if state.is_terminal() {
            let _ = self.release(key).await;
        }
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn acquire(
        &self,
        key: &DedupKey,
        holder: JobId,
        ttl: Option<Duration>,
    ) -> Result<DedupOutcome, QueueError> {
        let mut tokens = self.tokens.lock().await;
        let now = tokio::time::Instant::now();
        if let Some((existing, expires_at)) = tokens.get(&key.0) {
            let expired = expires_at.is_some_and(|exp| now >= exp);
            if !expired {
                return Ok(DedupOutcome::Coalesced(*existing));
            }
        }
        tokens.insert(key.0.clone(), (holder, ttl.map(|d| now + d)));
        Ok(DedupOutcome::Acquired)
    }

    async fn release(&self, key: &DedupKey) -> Result<(), QueueError> {
        self.tokens.lock().await.remove(&key.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simple_mode_coalesces_until_released() {
        let store = InMemoryDedupStore::new();
        let key = DedupKey::simple("sync-orders", "user-1");
        let first = JobId::new();
        let second = JobId::new();

        match store.acquire(&key, first, None).await.unwrap() {
            DedupOutcome::Acquired => {}
            DedupOutcome::Coalesced(_) => panic!("expected first acquire to succeed"),
        }

        match store.acquire(&key, second, None).await.unwrap() {
            DedupOutcome::Coalesced(id) => assert_eq!(id, first),
            DedupOutcome::Acquired => panic!("expected coalesce while first is live"),
        }

        store.release(&key).await.unwrap();
        match store.acquire(&key, second, None).await.unwrap() {
            DedupOutcome::Acquired => {}
            DedupOutcome::Coalesced(_) => panic!("expected acquire after release"),
        }
    }

    #[tokio::test]
    async fn throttle_mode_expires_after_ttl() {
        let store = InMemoryDedupStore::new();
        let key = DedupKey::throttled("submit-order", "user-1", "idem-1");
        let first = JobId::new();

        store.acquire(&key, first, Some(Duration::from_millis(20))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        match store.acquire(&key, JobId::new(), Some(Duration::from_millis(20))).await.unwrap() {
            DedupOutcome::Acquired => {}
            DedupOutcome::Coalesced(_) => panic!("expected ttl expiry to allow reacquire"),
        }
    }
}
