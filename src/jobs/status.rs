//! Job state tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a job, per the state machine in `SPEC_FULL.md` §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum JobState {
    /// Queued, not yet due (e.g. waiting out a retry delay or scheduled interval).
    Delayed {
        /// When the job becomes eligible for lease.
        due_at: DateTime<Utc>,
    },

    /// Queued and immediately eligible for lease.
    Pending,

    /// Leased by a processor and currently executing.
    Active {
        /// When the lease was acquired.
        leased_at: DateTime<Utc>,
    },

    /// Finished successfully.
    Completed {
        completed_at: DateTime<Utc>,
    },

    /// Finished unsuccessfully, with no further retries.
    Failed {
        failed_at: DateTime<Utc>,
        attempts: u32,
        error: String,
    },

    /// Evicted by a higher-priority job; returned to the head of the queue
    /// without counting as an attempt.
    PreemptedRequeued {
        preempted_at: DateTime<Utc>,
    },
}

impl JobState {
    /// Completed or permanently failed; no further processing will occur.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Currently holding a lease.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Eligible for immediate lease (not delayed, not terminal, not active).
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Human-readable, stable name for logging and REST responses.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Delayed { .. } => "delayed",
            Self::Pending => "pending",
            Self::Active { .. } => "active",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::PreemptedRequeued { .. } => "preempted-requeued",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(JobState::Completed { completed_at: Utc::now() }.is_terminal());
        assert!(JobState::Failed {
            failed_at: Utc::now(),
            attempts: 3,
            error: "boom".into()
        }
        .is_terminal());
        assert!(!JobState::PreemptedRequeued { preempted_at: Utc::now() }.is_terminal());
    }

    #[test]
    fn names_match_spec_kebab_case() {
        assert_eq!(JobState::Pending.name(), "pending");
        assert_eq!(
            JobState::PreemptedRequeued { preempted_at: Utc::now() }.name(),
            "preempted-requeued"
        );
    }
}
