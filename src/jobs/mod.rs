//! The operation queue's job model: the durable job envelope, its state
//! machine, per-type policy, deduplication, cancellation, and the `Queue`
//! trait itself (`SPEC_FULL.md` §3, §4.1).

mod cancellation;
mod dedup;
mod error;
mod job;
mod policy;
mod queue;
mod schedule;
mod status;

pub use cancellation::{
    CancelReason, CancellationToken, CombinedCancellation, JobCancellationManager,
    JobShutdownCoordinator, ShutdownResult,
};
pub use dedup::{DedupKey, DedupOutcome, DedupStore, InMemoryDedupStore, RedisDedupStore};
pub use error::{AgentLockError, HandlerError, HandlerResult, QueueError, RealtimeError};
pub use job::{
    Backoff, DownloadKind, JobEnvelope, JobId, OperationType, PriorityTier, SyncKind,
    UnknownOperationType,
};
pub use policy::{DedupMode, HandlerPolicy};
pub use queue::{AckOutcome, EnqueueOptions, InMemoryQueue, LeaseToken, Queue, RedisQueue};
pub use schedule::JobSchedule;
pub use status::JobState;
