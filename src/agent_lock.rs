//! The `Agent Lock` component (`SPEC_FULL.md` §4.2): per-user exclusive
//! ownership of the browser automation seat, with priority-based preemption.

use crate::jobs::{JobId, PriorityTier};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The current holder of a user's agent lock.
#[derive(Debug, Clone)]
struct Holder {
    job_id: JobId,
    priority: PriorityTier,
    /// Signalled by `request_cancel` so the processor running this holder's
    /// handler can wind it down.
    cancel: Arc<dyn Fn() + Send + Sync>,
}

/// Outcome of attempting to acquire a user's agent lock.
#[derive(Debug, Clone, Copy)]
pub enum AcquireResult {
    Acquired,
    /// Held by a job at the same or higher priority tier; do not preempt.
    Busy(JobId),
    /// Held by a strictly lower-priority job; the caller may request preemption.
    Preemptable(JobId),
}

/// Per-user exclusive lock. One instance is shared across all processor
/// partitions.
#[derive(Clone)]
pub struct AgentLock {
    holders: Arc<RwLock<HashMap<String, Holder>>>,
}

impl AgentLock {
    #[must_use]
    pub fn new() -> Self {
        Self { holders: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Attempt to acquire the lock for `user_id` on behalf of `job_id`.
    /// `on_cancel_requested` is stored and invoked if a higher-priority job
    /// later calls `request_cancel`.
    pub fn acquire(
        &self,
        user_id: &str,
        job_id: JobId,
        priority: PriorityTier,
        on_cancel_requested: Arc<dyn Fn() + Send + Sync>,
    ) -> AcquireResult {
        let mut holders = self.holders.write();
        match holders.get(user_id) {
            None => {
                holders.insert(
                    user_id.to_string(),
                    Holder { job_id, priority, cancel: on_cancel_requested },
                );
                debug!(%user_id, %job_id, "agent lock acquired");
                AcquireResult::Acquired
            }
            Some(incumbent) if incumbent.job_id == job_id => AcquireResult::Acquired,
            Some(incumbent) if priority > incumbent.priority => {
                AcquireResult::Preemptable(incumbent.job_id)
            }
            Some(incumbent) => AcquireResult::Busy(incumbent.job_id),
        }
    }

    /// Invoke the incumbent's cancellation callback. Idempotent: calling it
    /// repeatedly while the same job holds the lock has no additional effect
    /// beyond what the callback itself guards against.
    pub fn request_cancel(&self, user_id: &str) {
        if let Some(holder) = self.holders.read().get(user_id) {
            info!(%user_id, job_id = %holder.job_id, "requesting preemption of incumbent");
            (holder.cancel)();
        }
    }

    /// Release the lock, but only if `job_id` is the current holder. A stale
    /// release (e.g. from a job that already lost a preemption race) is a
    /// no-op so it cannot clobber a new holder.
    pub fn release(&self, user_id: &str, job_id: JobId) {
        let mut holders = self.holders.write();
        if holders.get(user_id).is_some_and(|h| h.job_id == job_id) {
            holders.remove(user_id);
            debug!(%user_id, %job_id, "agent lock released");
        }
    }

    /// Whether any user currently holds a lock for this job id. Exposed for
    /// tests and admin introspection.
    #[must_use]
    pub fn holder_of(&self, user_id: &str) -> Option<JobId> {
        self.holders.read().get(user_id).map(|h| h.job_id)
    }

    /// Number of users currently holding an agent lock. Exposed for the
    /// admin monitoring snapshot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.holders.read().len()
    }
}

impl Default for AgentLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Fn() + Send + Sync> {
        Arc::new(|| {})
    }

    #[test]
    fn first_acquire_succeeds() {
        let lock = AgentLock::new();
        let job = JobId::new();
        assert!(matches!(
            lock.acquire("u1", job, PriorityTier::Write, noop()),
            AcquireResult::Acquired
        ));
        assert_eq!(lock.holder_of("u1"), Some(job));
    }

    #[test]
    fn same_tier_is_busy_not_preemptable() {
        let lock = AgentLock::new();
        let first = JobId::new();
        let second = JobId::new();
        lock.acquire("u1", first, PriorityTier::Background, noop());
        assert!(matches!(
            lock.acquire("u1", second, PriorityTier::Background, noop()),
            AcquireResult::Busy(_)
        ));
    }

    #[test]
    fn higher_tier_is_preemptable() {
        let lock = AgentLock::new();
        let bg_job = JobId::new();
        let write_job = JobId::new();
        lock.acquire("u1", bg_job, PriorityTier::Background, noop());
        assert!(matches!(
            lock.acquire("u1", write_job, PriorityTier::Write, noop()),
            AcquireResult::Preemptable(incumbent) if incumbent == bg_job
        ));
    }

    #[test]
    fn request_cancel_invokes_incumbent_callback() {
        let lock = AgentLock::new();
        let job = JobId::new();
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = called.clone();
        lock.acquire("u1", job, PriorityTier::Background, Arc::new(move || {
            called_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        lock.request_cancel("u1");
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn stale_release_does_not_clobber_new_holder() {
        let lock = AgentLock::new();
        let first = JobId::new();
        let second = JobId::new();
        lock.acquire("u1", first, PriorityTier::Background, noop());
        lock.release("u1", first);
        lock.acquire("u1", second, PriorityTier::Background, noop());
        lock.release("u1", first);
        assert_eq!(lock.holder_of("u1"), Some(second));
    }
}
