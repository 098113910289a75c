//! The `Handler Registry` (`SPEC_FULL.md` §4.4): maps operation type to the
//! function that does the actual work, plus the progress/cancellation
//! contract every handler must obey.

pub mod operations;

use crate::jobs::{CancellationToken, HandlerResult, JobId, OperationType};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A progress update a handler may emit at meaningful phase boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub phase: String,
    pub pct: u8,
    pub message: String,
}

/// Handed to a handler so it can report progress without knowing about the
/// realtime hub directly. The processor drains this channel and republishes
/// as `JobProgress` lifecycle events.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    tx: mpsc::Sender<Progress>,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(job_id: JobId, tx: mpsc::Sender<Progress>) -> Self {
        Self { job_id, tx }
    }

    /// Report progress. Never blocks the handler indefinitely: a full channel
    /// (the processor fell behind) silently drops the update, since progress
    /// is inherently non-replayable and best-effort.
    pub async fn report(&self, phase: impl Into<String>, pct: u8, message: impl Into<String>) {
        let progress = Progress { phase: phase.into(), pct, message: message.into() };
        if self.tx.try_send(progress).is_err() {
            tracing::debug!(job_id = %self.job_id, "progress channel full, dropping update");
        }
    }
}

/// The obligations described in `SPEC_FULL.md` §4.4: handlers must classify
/// their own errors into retryable vs non-retryable (encoded in
/// `HandlerError`), probe cancellation periodically, and report progress at
/// phase boundaries. External collaborators (the ERP automation driver, the
/// local database) are opaque and handler-supplied; this crate's core does
/// not depend on their concrete types.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the operation described by `payload` for `user_id`. Must
    /// return promptly after `cancel.is_cancelled()` becomes true.
    async fn execute(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> HandlerResult<serde_json::Value>;
}

/// Maps operation type to its handler implementation. Built once at startup
/// and shared across all processor partitions.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<OperationType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, operation: OperationType, handler: Arc<dyn Handler>) {
        self.handlers.insert(operation, handler);
    }

    #[must_use]
    pub fn get(&self, operation: OperationType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&operation).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::DownloadKind;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn execute(
            &self,
            _user_id: &str,
            _payload: &serde_json::Value,
            _progress: ProgressReporter,
            _cancel: CancellationToken,
        ) -> HandlerResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn registry_looks_up_by_operation_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(OperationType::DownloadPdf(DownloadKind::Orders), Arc::new(Noop));
        assert!(registry.get(OperationType::DownloadPdf(DownloadKind::Orders)).is_some());
        assert!(registry.get(OperationType::SubmitOrder).is_none());
    }
}
