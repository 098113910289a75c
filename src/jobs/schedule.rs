//! Scheduling for background `sync-*` operations (`SPEC_FULL.md` §6, admin
//! `/api/sync/intervals`).

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::QueueError;

/// How a recurring operation is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSchedule {
    /// A cron expression (6 fields: sec min hour day month day-of-week).
    Cron {
        expression: String,
        #[serde(skip)]
        schedule: Option<Box<CronSchedule>>,
    },

    /// A fixed interval in minutes, bounded to 5..=1440 per `SPEC_FULL.md` §6.
    Interval { minutes: u32 },
}

impl JobSchedule {
    /// Build a cron-based schedule.
    ///
    /// # Errors
    /// Returns an error if the cron expression doesn't parse.
    pub fn cron(expression: &str) -> Result<Self, QueueError> {
        let schedule = CronSchedule::from_str(expression)
            .map_err(|e| QueueError::Unavailable(format!("invalid cron expression: {e}")))?;
        Ok(Self::Cron { expression: expression.to_string(), schedule: Some(Box::new(schedule)) })
    }

    /// Build a fixed-interval schedule, clamped to the admin-configurable
    /// range of 5 to 1440 minutes.
    #[must_use]
    pub fn every_minutes(minutes: u32) -> Self {
        Self::Interval { minutes: minutes.clamp(5, 1440) }
    }

    /// Next time this schedule should fire, given the last firing (or now).
    #[must_use]
    pub fn next_execution(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { schedule, .. } => schedule.as_ref()?.after(&from).next(),
            Self::Interval { minutes } => Some(from + Duration::minutes(i64::from(*minutes))),
        }
    }

    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Cron { expression, .. } => format!("cron: {expression}"),
            Self::Interval { minutes } => format!("every {minutes}m"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_parses_and_advances() {
        let schedule = JobSchedule::cron("0 0 0 * * *").unwrap();
        let now = Utc::now();
        let next = schedule.next_execution(now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn interval_clamps_to_admin_range() {
        assert!(matches!(JobSchedule::every_minutes(1), JobSchedule::Interval { minutes: 5 }));
        assert!(matches!(JobSchedule::every_minutes(10_000), JobSchedule::Interval { minutes: 1440 }));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        assert!(JobSchedule::cron("not a cron").is_err());
    }
}
