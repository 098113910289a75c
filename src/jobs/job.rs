//! The job envelope and the closed set of operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<JobId> for Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Priority tier used both for scheduling order and for preemption decisions
/// in the agent lock. Ordered so that `Write > Download > Background`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    /// Scheduled background syncs. Lowest tier; always preemptable.
    Background,
    /// Interactive downloads triggered by a user action.
    Download,
    /// Order submission, customer writes, remote sends. Highest tier.
    Write,
}

/// The closed set of operation types the queue accepts. Each variant carries
/// whatever distinguishes multiple operations of the same shape (for example
/// which document a download targets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    /// Submit a sales order to the ERP.
    SubmitOrder,
    /// Create a new customer record in the ERP.
    CreateCustomer,
    /// Forward an already-prepared payload to the remote system.
    SendToRemote,
    /// Download and parse a PDF report of the given kind.
    DownloadPdf(DownloadKind),
    /// Refresh local data of the given kind from the ERP.
    Sync(SyncKind),
}

impl OperationType {
    /// The priority tier this operation type schedules at.
    #[must_use]
    pub const fn priority_tier(self) -> PriorityTier {
        match self {
            Self::SubmitOrder | Self::CreateCustomer | Self::SendToRemote => PriorityTier::Write,
            Self::DownloadPdf(_) => PriorityTier::Download,
            Self::Sync(_) => PriorityTier::Background,
        }
    }

    /// A stable string key, used for dedup ids, redis key segments, and
    /// metrics labels.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::SubmitOrder => "submit-order",
            Self::CreateCustomer => "create-customer",
            Self::SendToRemote => "send-to-remote",
            Self::DownloadPdf(DownloadKind::Orders) => "download-pdf-orders",
            Self::DownloadPdf(DownloadKind::Customers) => "download-pdf-customers",
            Self::DownloadPdf(DownloadKind::Products) => "download-pdf-products",
            Self::DownloadPdf(DownloadKind::Prices) => "download-pdf-prices",
            Self::DownloadPdf(DownloadKind::Ddt) => "download-pdf-ddt",
            Self::DownloadPdf(DownloadKind::Invoices) => "download-pdf-invoices",
            Self::Sync(SyncKind::Orders) => "sync-orders",
            Self::Sync(SyncKind::Customers) => "sync-customers",
            Self::Sync(SyncKind::Products) => "sync-products",
            Self::Sync(SyncKind::Prices) => "sync-prices",
            Self::Sync(SyncKind::Ddt) => "sync-ddt",
            Self::Sync(SyncKind::Invoices) => "sync-invoices",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Error returned by [`OperationType::from_str`] for an unrecognized path segment.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown operation type: {0}")]
pub struct UnknownOperationType(pub String);

impl std::str::FromStr for OperationType {
    type Err = UnknownOperationType;

    /// Inverse of [`OperationType::key`], used to parse the `{type}` path
    /// segment of `POST /api/operations/{type}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit-order" => Ok(Self::SubmitOrder),
            "create-customer" => Ok(Self::CreateCustomer),
            "send-to-remote" => Ok(Self::SendToRemote),
            "download-pdf-orders" => Ok(Self::DownloadPdf(DownloadKind::Orders)),
            "download-pdf-customers" => Ok(Self::DownloadPdf(DownloadKind::Customers)),
            "download-pdf-products" => Ok(Self::DownloadPdf(DownloadKind::Products)),
            "download-pdf-prices" => Ok(Self::DownloadPdf(DownloadKind::Prices)),
            "download-pdf-ddt" => Ok(Self::DownloadPdf(DownloadKind::Ddt)),
            "download-pdf-invoices" => Ok(Self::DownloadPdf(DownloadKind::Invoices)),
            "sync-orders" => Ok(Self::Sync(SyncKind::Orders)),
            "sync-customers" => Ok(Self::Sync(SyncKind::Customers)),
            "sync-products" => Ok(Self::Sync(SyncKind::Products)),
            "sync-prices" => Ok(Self::Sync(SyncKind::Prices)),
            "sync-ddt" => Ok(Self::Sync(SyncKind::Ddt)),
            "sync-invoices" => Ok(Self::Sync(SyncKind::Invoices)),
            other => Err(UnknownOperationType(other.to_string())),
        }
    }
}

/// Document kind for `download-pdf-*` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadKind {
    Orders,
    Customers,
    Products,
    Prices,
    Ddt,
    Invoices,
}

/// Data kind for `sync-*` background operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncKind {
    Orders,
    Customers,
    Products,
    Prices,
    Ddt,
    Invoices,
}

/// Backoff policy attached to a job at enqueue time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Backoff {
    /// Base delay before the first retry.
    pub base_ms: u64,
    /// Ceiling on the computed delay.
    pub max_ms: u64,
}

impl Backoff {
    /// Compute the delay before retry number `attempt` (1-indexed), doubling
    /// each time and capped at `max_ms`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let scaled = self.base_ms.saturating_mul(1u64 << attempt.min(16));
        std::time::Duration::from_millis(scaled.min(self.max_ms))
    }
}

/// The durable unit of work owned end-to-end by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: JobId,
    pub user_id: String,
    pub operation: OperationType,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub priority: PriorityTier,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub last_error: Option<String>,
    pub state: super::JobState,
}

impl JobEnvelope {
    /// Whether another attempt may still be made after a retryable failure.
    #[must_use]
    pub const fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_creation_is_unique() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn job_id_display_is_uuid() {
        let id = JobId::new();
        let display = format!("{id}");
        assert!(Uuid::parse_str(&display).is_ok());
    }

    #[test]
    fn priority_tiers_order_write_highest() {
        assert!(PriorityTier::Write > PriorityTier::Download);
        assert!(PriorityTier::Download > PriorityTier::Background);
    }

    #[test]
    fn operation_priority_tiers_match_table() {
        assert_eq!(OperationType::SubmitOrder.priority_tier(), PriorityTier::Write);
        assert_eq!(
            OperationType::DownloadPdf(DownloadKind::Orders).priority_tier(),
            PriorityTier::Download
        );
        assert_eq!(
            OperationType::Sync(SyncKind::Orders).priority_tier(),
            PriorityTier::Background
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = Backoff { base_ms: 100, max_ms: 1_000 };
        assert_eq!(backoff.delay_for_attempt(0).as_millis(), 100);
        assert_eq!(backoff.delay_for_attempt(1).as_millis(), 200);
        assert_eq!(backoff.delay_for_attempt(10).as_millis(), 1_000);
    }
}
