//! The `Queue` component (`SPEC_FULL.md` §4.1): durable, ordered, at-least-once
//! delivery with atomic dedup and delayed retry.
//!
//! Key layout for [`RedisQueue`], grounded in the teacher's
//! `jobs/agent/redis_agent.rs` (`job:{id}`, `queue:pending`, `queue:dlq`)
//! generalized to per-user partitioning:
//!
//! - `job:{id}` — JSON-encoded [`JobEnvelope`], TTL 7 days after terminal.
//! - `queue:pending:{user}` — sorted set, member = job id, score = priority-then-age.
//! - `queue:users` — set of user ids with at least one pending/delayed job.
//! - `lease:{id}` — lease token + deadline, `SET PX`.

use super::dedup::{DedupKey, DedupOutcome, DedupStore, InMemoryDedupStore, RedisDedupStore};
use super::job::{JobEnvelope, JobId, OperationType, PriorityTier};
use super::policy::HandlerPolicy;
use super::status::JobState;
use super::error::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Options accepted at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub idempotency_key: Option<String>,
    pub priority_override: Option<PriorityTier>,
}

/// Opaque proof of an exclusive lease on a job, returned by `lease()` and
/// required by `renew_lease()`/`ack()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseToken {
    pub job_id: JobId,
    token: Uuid,
}

/// Terminal or retry disposition passed to `ack()`.
#[derive(Debug, Clone)]
pub enum AckOutcome {
    Completed,
    FailedPermanent(String),
    /// `None` delay lets the queue compute it from the job's backoff policy.
    FailedRetry { error: String, delay: Option<Duration> },
    /// Preemption: requeue without incrementing `attempts`.
    RequeuedPreempted,
}

/// The queue's public contract. Implemented by [`RedisQueue`] for production
/// and [`InMemoryQueue`] for tests.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(
        &self,
        user_id: &str,
        operation: OperationType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError>;

    /// Block until a job is available anywhere, then lease it.
    async fn lease(&self) -> Result<(JobEnvelope, LeaseToken), QueueError>;

    async fn renew_lease(&self, token: LeaseToken) -> Result<(), QueueError>;

    async fn ack(&self, token: LeaseToken, outcome: AckOutcome) -> Result<(), QueueError>;

    /// Request cancellation of a job. If pending/delayed it is removed
    /// outright; if active, the caller is expected to separately signal the
    /// running handler (the processor wires this through `CombinedCancellation`).
    async fn cancel(&self, job_id: JobId) -> Result<bool, QueueError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobEnvelope>, QueueError>;
}

fn priority_rank(tier: PriorityTier) -> i64 {
    match tier {
        PriorityTier::Write => 2,
        PriorityTier::Download => 1,
        PriorityTier::Background => 0,
    }
}

// ---------------------------------------------------------------------
// In-memory implementation (tests, and the teacher's `JobQueue` heap shape)
// ---------------------------------------------------------------------

#[derive(Debug)]
struct HeapEntry {
    priority_rank: i64,
    created_at: chrono::DateTime<Utc>,
    job_id: JobId,
    due_at: chrono::DateTime<Utc>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap: higher priority first, then older first.
        self.priority_rank
            .cmp(&other.priority_rank)
            .then_with(|| other.created_at.cmp(&self.created_at))
    }
}

struct InMemoryInner {
    jobs: HashMap<JobId, JobEnvelope>,
    heap: BinaryHeap<HeapEntry>,
    leases: HashMap<JobId, (Uuid, chrono::DateTime<Utc>)>,
    dedup_keys: HashMap<JobId, DedupKey>,
}

/// `HashMap`-backed fake used in unit and integration tests, matching the
/// teacher's `testing` module convention of swapping the backing store.
pub struct InMemoryQueue {
    inner: Arc<Mutex<InMemoryInner>>,
    dedup: InMemoryDedupStore,
    notify: Notify,
    lease_duration: Duration,
}

impl InMemoryQueue {
    #[must_use]
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryInner {
                jobs: HashMap::new(),
                heap: BinaryHeap::new(),
                leases: HashMap::new(),
                dedup_keys: HashMap::new(),
            })),
            dedup: InMemoryDedupStore::new(),
            notify: Notify::new(),
            lease_duration,
        }
    }

    async fn push_pending(&self, job: &JobEnvelope, due_at: chrono::DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.heap.push(HeapEntry {
            priority_rank: priority_rank(job.priority),
            created_at: job.created_at,
            job_id: job.id,
            due_at,
        });
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(
        &self,
        user_id: &str,
        operation: OperationType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let policy = HandlerPolicy::for_type(operation, options.idempotency_key.is_some());

        let dedup_key = match policy.dedup_mode {
            super::policy::DedupMode::None => None,
            super::policy::DedupMode::Simple => {
                Some(DedupKey::simple(operation.key(), user_id))
            }
            super::policy::DedupMode::Throttle { .. } => options
                .idempotency_key
                .as_deref()
                .map(|k| DedupKey::throttled(operation.key(), user_id, k)),
        };

        let candidate_id = JobId::new();
        if let Some(ref key) = dedup_key {
            let ttl = match policy.dedup_mode {
                super::policy::DedupMode::Throttle { ttl } => Some(ttl),
                _ => None,
            };
            match self.dedup.acquire(key, candidate_id, ttl).await? {
                DedupOutcome::Coalesced(existing) => {
                    debug!(job_id = %existing, "enqueue coalesced onto existing dedup token");
                    return Ok(existing);
                }
                DedupOutcome::Acquired => {}
            }
        }

        let now = Utc::now();
        let job = JobEnvelope {
            id: candidate_id,
            user_id: user_id.to_string(),
            operation,
            payload,
            idempotency_key: options.idempotency_key,
            created_at: now,
            priority: options.priority_override.unwrap_or_else(|| operation.priority_tier()),
            attempts: 0,
            max_attempts: policy.max_attempts,
            backoff: policy.backoff,
            last_error: None,
            state: JobState::Pending,
        };

        {
            let mut inner = self.inner.lock().await;
            if let Some(key) = dedup_key {
                inner.dedup_keys.insert(candidate_id, key);
            }
            inner.jobs.insert(candidate_id, job.clone());
        }
        self.push_pending(&job, now).await;
        self.notify.notify_one();
        info!(job_id = %candidate_id, %user_id, operation = %operation, "enqueued job");
        Ok(candidate_id)
    }

    async fn lease(&self) -> Result<(JobEnvelope, LeaseToken), QueueError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                let now = Utc::now();
                let mut deferred = Vec::new();
                let mut found = None;
                while let Some(entry) = inner.heap.pop() {
                    if entry.due_at > now {
                        deferred.push(entry);
                        continue;
                    }
                    if !inner.jobs.contains_key(&entry.job_id) {
                        continue;
                    }
                    found = Some(entry);
                    break;
                }
                for entry in deferred {
                    inner.heap.push(entry);
                }
                if let Some(entry) = found {
                    let token = Uuid::new_v4();
                    let deadline = now + chrono::Duration::from_std(self.lease_duration).unwrap_or_default();
                    inner.leases.insert(entry.job_id, (token, deadline));
                    let job = inner.jobs.get_mut(&entry.job_id).expect("job present");
                    job.state = JobState::Active { leased_at: now };
                    let job = job.clone();
                    return Ok((job.clone(), LeaseToken { job_id: job.id, token }));
                }
            }
            // Mirrors `RedisQueue::lease`'s 200ms poll fallback: a delayed job
            // becoming due has nothing else to notify us, so don't rely on
            // `notify` alone or a due retry would sleep forever.
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    async fn renew_lease(&self, token: LeaseToken) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.leases.get_mut(&token.job_id) {
            Some((held, deadline)) if *held == token.token => {
                *deadline = Utc::now() + chrono::Duration::from_std(self.lease_duration).unwrap_or_default();
                Ok(())
            }
            Some(_) => Err(QueueError::LeaseMismatch(token.job_id.to_string())),
            None => Err(QueueError::NotFound(token.job_id.to_string())),
        }
    }

    async fn ack(&self, token: LeaseToken, outcome: AckOutcome) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let held = inner
            .leases
            .get(&token.job_id)
            .copied()
            .ok_or_else(|| QueueError::NotFound(token.job_id.to_string()))?;
        if held.0 != token.token {
            return Err(QueueError::LeaseMismatch(token.job_id.to_string()));
        }
        inner.leases.remove(&token.job_id);

        let dedup_key = inner.dedup_keys.get(&token.job_id).cloned();
        let job = inner
            .jobs
            .get_mut(&token.job_id)
            .ok_or_else(|| QueueError::NotFound(token.job_id.to_string()))?;

        let now = Utc::now();
        match outcome {
            AckOutcome::Completed => {
                job.state = JobState::Completed { completed_at: now };
            }
            AckOutcome::FailedPermanent(err) => {
                job.attempts += 1;
                job.last_error = Some(err.clone());
                job.state = JobState::Failed { failed_at: now, attempts: job.attempts, error: err };
            }
            AckOutcome::FailedRetry { error, delay } => {
                job.attempts += 1;
                job.last_error = Some(error.clone());
                if job.attempts >= job.max_attempts {
                    job.state = JobState::Failed { failed_at: now, attempts: job.attempts, error };
                } else {
                    let delay = delay.unwrap_or_else(|| job.backoff.delay_for_attempt(job.attempts));
                    let due_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                    job.state = JobState::Delayed { due_at };
                    let snapshot = job.clone();
                    drop(inner);
                    self.push_pending(&snapshot, due_at).await;
                    self.notify.notify_one();
                    return Ok(());
                }
            }
            AckOutcome::RequeuedPreempted => {
                job.state = JobState::PreemptedRequeued { preempted_at: now };
                let snapshot = job.clone();
                drop(inner);
                self.push_pending(&snapshot, now).await;
                self.notify.notify_one();
                return Ok(());
            }
        }

        let terminal_state = job.state.clone();
        let job_snapshot = job.clone();
        drop(inner);
        if let Some(key) = dedup_key {
            self.dedup.release_if_terminal(&key, &terminal_state).await;
        }
        let _ = job_snapshot;
        Ok(())
    }

    async fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get(&job_id).map(|j| j.state.clone()) {
            Some(state) if !state.is_terminal() && !state.is_active() => {
                inner.jobs.remove(&job_id);
                Ok(true)
            }
            Some(_) => {
                // Active jobs are cancelled via the processor's cancellation
                // source; the queue only marks intent here.
                warn!(%job_id, "cancel requested for active/terminal job; no-op at queue layer");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobEnvelope>, QueueError> {
        Ok(self.inner.lock().await.jobs.get(&job_id).cloned())
    }
}

// ---------------------------------------------------------------------
// Redis-backed implementation
// ---------------------------------------------------------------------

/// Production queue backed by redis, grounded in the teacher's
/// `redis_agent.rs` key conventions.
pub struct RedisQueue {
    pool: deadpool_redis::Pool,
    dedup: RedisDedupStore,
    lease_duration: Duration,
    key_prefix: String,
}

impl RedisQueue {
    #[must_use]
    pub fn new(pool: deadpool_redis::Pool, lease_duration: Duration, key_prefix: impl Into<String>) -> Self {
        let key_prefix = key_prefix.into();
        Self {
            dedup: RedisDedupStore::new(pool.clone(), key_prefix.clone()),
            pool,
            lease_duration,
            key_prefix,
        }
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    fn pending_key(&self, user_id: &str) -> String {
        format!("{}:queue:pending:{}", self.key_prefix, user_id)
    }

    fn users_key(&self) -> String {
        format!("{}:queue:users", self.key_prefix)
    }

    fn lease_key(&self, id: JobId) -> String {
        format!("{}:lease:{}", self.key_prefix, id)
    }

    fn score_for(job: &JobEnvelope) -> f64 {
        // Higher priority sorts lower (ZPOPMIN pops smallest); within a tier,
        // older jobs (smaller timestamp) sort lower too.
        let tier_component = f64::from(2 - priority_rank(job.priority)) * 1e15;
        tier_component + job.created_at.timestamp_millis() as f64
    }

    /// Score for a not-yet-due `Delayed` job, keyed by `due_at` rather than
    /// `created_at`. Re-inserting with `score_for` would keep sorting the job
    /// by how long ago it was created, not by when it becomes eligible,
    /// which churns it back to the front of the same tier on every lease
    /// scan until it's actually due.
    fn delayed_score_for(job: &JobEnvelope, due_at: DateTime<Utc>) -> f64 {
        let tier_component = f64::from(2 - priority_rank(job.priority)) * 1e15;
        tier_component + due_at.timestamp_millis() as f64
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(
        &self,
        user_id: &str,
        operation: OperationType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let policy = HandlerPolicy::for_type(operation, options.idempotency_key.is_some());

        let dedup_key = match policy.dedup_mode {
            super::policy::DedupMode::None => None,
            super::policy::DedupMode::Simple => Some(DedupKey::simple(operation.key(), user_id)),
            super::policy::DedupMode::Throttle { .. } => options
                .idempotency_key
                .as_deref()
                .map(|k| DedupKey::throttled(operation.key(), user_id, k)),
        };

        let candidate_id = JobId::new();
        if let Some(ref key) = dedup_key {
            let ttl = match policy.dedup_mode {
                super::policy::DedupMode::Throttle { ttl } => Some(ttl),
                _ => None,
            };
            if let DedupOutcome::Coalesced(existing) = self.dedup.acquire(key, candidate_id, ttl).await? {
                return Ok(existing);
            }
        }

        let job = JobEnvelope {
            id: candidate_id,
            user_id: user_id.to_string(),
            operation,
            payload,
            idempotency_key: options.idempotency_key,
            created_at: Utc::now(),
            priority: options.priority_override.unwrap_or_else(|| operation.priority_tier()),
            attempts: 0,
            max_attempts: policy.max_attempts,
            backoff: policy.backoff,
            last_error: None,
            state: JobState::Pending,
        };

        let mut conn = self.pool.get().await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let body = serde_json::to_string(&job)?;
        let _: () = conn
            .set_ex(self.job_key(candidate_id), body, 7 * 24 * 3600)
            .await
            .map_err(QueueError::from)?;
        let _: () = conn
            .zadd(self.pending_key(user_id), candidate_id.to_string(), Self::score_for(&job))
            .await
            .map_err(QueueError::from)?;
        let _: () = conn.sadd(self.users_key(), user_id).await.map_err(QueueError::from)?;
        info!(job_id = %candidate_id, %user_id, operation = %operation, "enqueued job to redis");
        Ok(candidate_id)
    }

    async fn lease(&self) -> Result<(JobEnvelope, LeaseToken), QueueError> {
        loop {
            let mut conn = self.pool.get().await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
            let users: Vec<String> = conn.smembers(self.users_key()).await.map_err(QueueError::from)?;
            let now = Utc::now();

            for user_id in users {
                let popped: Vec<(String, f64)> = conn
                    .zpopmin(self.pending_key(&user_id), 1)
                    .await
                    .map_err(QueueError::from)?;
                let Some((id_str, _score)) = popped.into_iter().next() else { continue };
                let Ok(job_id) = Uuid::parse_str(&id_str).map(JobId::from) else { continue };

                let raw: Option<String> = conn.get(self.job_key(job_id)).await.map_err(QueueError::from)?;
                let Some(raw) = raw else { continue };
                let mut job: JobEnvelope = serde_json::from_str(&raw)?;

                if let JobState::Delayed { due_at } = job.state {
                    if due_at > now {
                        // Not due yet; put it back and keep scanning other users.
                        let _: () = conn
                            .zadd(self.pending_key(&user_id), id_str, Self::delayed_score_for(&job, due_at))
                            .await
                            .map_err(QueueError::from)?;
                        continue;
                    }
                }

                let token = Uuid::new_v4();
                job.state = JobState::Active { leased_at: now };
                let body = serde_json::to_string(&job)?;
                let _: () = conn.set_ex(self.job_key(job_id), body, 7 * 24 * 3600).await.map_err(QueueError::from)?;
                let lease_ms = u64::try_from(self.lease_duration.as_millis()).unwrap_or(u64::MAX);
                let _: () = conn
                    .set_ex(self.lease_key(job_id), token.to_string(), lease_ms / 1000 + 1)
                    .await
                    .map_err(QueueError::from)?;
                return Ok((job, LeaseToken { job_id, token }));
            }

            drop(conn);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn renew_lease(&self, token: LeaseToken) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let held: Option<String> = conn.get(self.lease_key(token.job_id)).await.map_err(QueueError::from)?;
        if held.as_deref() != Some(token.token.to_string().as_str()) {
            return Err(QueueError::LeaseMismatch(token.job_id.to_string()));
        }
        let lease_ms = u64::try_from(self.lease_duration.as_millis()).unwrap_or(u64::MAX);
        let _: () = conn
            .set_ex(self.lease_key(token.job_id), token.token.to_string(), lease_ms / 1000 + 1)
            .await
            .map_err(QueueError::from)?;
        Ok(())
    }

    async fn ack(&self, token: LeaseToken, outcome: AckOutcome) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let held: Option<String> = conn.get(self.lease_key(token.job_id)).await.map_err(QueueError::from)?;
        if held.as_deref() != Some(token.token.to_string().as_str()) {
            return Err(QueueError::LeaseMismatch(token.job_id.to_string()));
        }
        let _: () = conn.del(self.lease_key(token.job_id)).await.map_err(QueueError::from)?;

        let raw: Option<String> = conn.get(self.job_key(token.job_id)).await.map_err(QueueError::from)?;
        let Some(raw) = raw else { return Err(QueueError::NotFound(token.job_id.to_string())) };
        let mut job: JobEnvelope = serde_json::from_str(&raw)?;
        let now = Utc::now();

        let dedup_key = match HandlerPolicy::for_type(job.operation, job.idempotency_key.is_some()).dedup_mode {
            super::policy::DedupMode::None => None,
            super::policy::DedupMode::Simple => Some(DedupKey::simple(job.operation.key(), &job.user_id)),
            super::policy::DedupMode::Throttle { .. } => job
                .idempotency_key
                .as_deref()
                .map(|k| DedupKey::throttled(job.operation.key(), &job.user_id, k)),
        };

        match outcome {
            AckOutcome::Completed => {
                job.state = JobState::Completed { completed_at: now };
            }
            AckOutcome::FailedPermanent(err) => {
                job.attempts += 1;
                job.last_error = Some(err.clone());
                job.state = JobState::Failed { failed_at: now, attempts: job.attempts, error: err };
            }
            AckOutcome::FailedRetry { error, delay } => {
                job.attempts += 1;
                job.last_error = Some(error.clone());
                if job.attempts >= job.max_attempts {
                    job.state = JobState::Failed { failed_at: now, attempts: job.attempts, error };
                } else {
                    let delay = delay.unwrap_or_else(|| job.backoff.delay_for_attempt(job.attempts));
                    let due_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                    job.state = JobState::Delayed { due_at };
                    let body = serde_json::to_string(&job)?;
                    let _: () = conn.set_ex(self.job_key(token.job_id), body, 7 * 24 * 3600).await.map_err(QueueError::from)?;
                    let score = Self::score_for(&job);
                    let _: () = conn
                        .zadd(self.pending_key(&job.user_id), token.job_id.to_string(), score)
                        .await
                        .map_err(QueueError::from)?;
                    return Ok(());
                }
            }
            AckOutcome::RequeuedPreempted => {
                job.state = JobState::PreemptedRequeued { preempted_at: now };
                let body = serde_json::to_string(&job)?;
                let _: () = conn.set_ex(self.job_key(token.job_id), body, 7 * 24 * 3600).await.map_err(QueueError::from)?;
                let score = Self::score_for(&job);
                let _: () = conn
                    .zadd(self.pending_key(&job.user_id), token.job_id.to_string(), score)
                    .await
                    .map_err(QueueError::from)?;
                return Ok(());
            }
        }

        let body = serde_json::to_string(&job)?;
        let _: () = conn.set_ex(self.job_key(token.job_id), body, 7 * 24 * 3600).await.map_err(QueueError::from)?;
        if let Some(key) = dedup_key {
            self.dedup.release_if_terminal(&key, &job.state).await;
        }
        Ok(())
    }

    async fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut conn = self.pool.get().await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let raw: Option<String> = conn.get(self.job_key(job_id)).await.map_err(QueueError::from)?;
        let Some(raw) = raw else { return Ok(false) };
        let job: JobEnvelope = serde_json::from_str(&raw)?;
        if job.state.is_terminal() || job.state.is_active() {
            return Ok(false);
        }
        let _: () = conn.zrem(self.pending_key(&job.user_id), job_id.to_string()).await.map_err(QueueError::from)?;
        let _: () = conn.del(self.job_key(job_id)).await.map_err(QueueError::from)?;
        Ok(true)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobEnvelope>, QueueError> {
        let mut conn = self.pool.get().await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let raw: Option<String> = conn.get(self.job_key(job_id)).await.map_err(QueueError::from)?;
        raw.map(|r| serde_json::from_str(&r).map_err(QueueError::from)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{DownloadKind, SyncKind};

    fn queue() -> InMemoryQueue {
        InMemoryQueue::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn enqueue_then_lease_returns_the_job() {
        let q = queue();
        let id = q
            .enqueue("u1", OperationType::DownloadPdf(DownloadKind::Orders), serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let (job, token) = q.lease().await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(token.job_id, id);
        assert!(job.state.is_active());
    }

    #[tokio::test]
    async fn higher_priority_is_leased_first() {
        let q = queue();
        let _bg = q
            .enqueue("u1", OperationType::Sync(SyncKind::Orders), serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let write = q
            .enqueue("u1", OperationType::SubmitOrder, serde_json::json!({}), EnqueueOptions { idempotency_key: Some("k1".into()), ..Default::default() })
            .await
            .unwrap();
        let (job, _token) = q.lease().await.unwrap();
        assert_eq!(job.id, write);
    }

    #[tokio::test]
    async fn failed_retry_reschedules_and_counts_attempt() {
        let q = queue();
        let id = q
            .enqueue("u1", OperationType::Sync(SyncKind::Orders), serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let (_job, token) = q.lease().await.unwrap();
        q.ack(token, AckOutcome::FailedRetry { error: "transient".into(), delay: Some(Duration::from_millis(1)) })
            .await
            .unwrap();
        let job = q.get(id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert!(matches!(job.state, JobState::Delayed { .. }));
    }

    #[tokio::test]
    async fn preempted_requeue_does_not_increment_attempts() {
        let q = queue();
        let id = q
            .enqueue("u1", OperationType::Sync(SyncKind::Orders), serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let (_job, token) = q.lease().await.unwrap();
        q.ack(token, AckOutcome::RequeuedPreempted).await.unwrap();
        let job = q.get(id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 0);
        assert!(matches!(job.state, JobState::PreemptedRequeued { .. }));
    }

    #[tokio::test]
    async fn dedup_coalesces_simple_mode_syncs() {
        let q = queue();
        let first = q
            .enqueue("u1", OperationType::Sync(SyncKind::Orders), serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let second = q
            .enqueue("u1", OperationType::Sync(SyncKind::Orders), serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
