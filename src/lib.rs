//! opqueue: a durable, priority-ordered operation queue for ERP browser
//! automation, with per-user exclusive agent locks, priority preemption, and
//! a real-time event hub for progress and completion notifications.
//!
//! # Architecture
//!
//! - [`jobs`] — the durable job envelope, its state machine, per-type
//!   policy, deduplication, cancellation, and the [`jobs::Queue`] trait.
//! - [`agent_lock`] — per-user exclusive ownership of the automation seat,
//!   with priority-based preemption.
//! - [`processor`] — the main execution loop tying queue, lock, handler
//!   registry, and realtime hub together.
//! - [`handlers`] — the operation-type-to-handler registry and the concrete
//!   handlers for writes, downloads, and syncs.
//! - [`realtime`] — per-user WebSocket fan-out with bounded replay.
//! - [`http`] — the REST and WebSocket surface.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use opqueue::config::OperationQueueConfig;
//! use opqueue::state::AppState;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = OperationQueueConfig::load()?;
//! // ... build Queue/AgentLock/HandlerRegistry/RealtimeHub, then AppState::new(...)
//! # Ok(())
//! # }
//! ```

pub mod agent_lock;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod jobs;
pub mod observability;
pub mod processor;
pub mod realtime;
pub mod state;

/// Convenience re-exports for building a binary around this crate.
pub mod prelude {
    pub use crate::agent_lock::AgentLock;
    pub use crate::auth::{Authenticated, AuthenticatedAdmin, Claims, VerifyToken};
    pub use crate::config::OperationQueueConfig;
    pub use crate::error::ApiError;
    pub use crate::handlers::{Handler, HandlerRegistry, Progress, ProgressReporter};
    pub use crate::jobs::{
        HandlerPolicy, InMemoryQueue, JobEnvelope, JobId, OperationType, Queue, RedisQueue,
    };
    pub use crate::processor::{Processor, ProcessorConfig};
    pub use crate::realtime::{RealtimeHub, RealtimeHubConfig};
    pub use crate::state::AppState;
}
