//! Renewal sweep outcome model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-account outcome of one renewal sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    AutoRenewed,
    RenewalFailed,
    Skipped,
    AutoRenewDisabled,
}

impl SweepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepOutcome::AutoRenewed => "auto_renewed",
            SweepOutcome::RenewalFailed => "renewal_failed",
            SweepOutcome::Skipped => "skipped",
            SweepOutcome::AutoRenewDisabled => "auto_renew_disabled",
        }
    }
}

/// Error captured for one account without aborting the rest of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepAccountError {
    pub account_id: Uuid,
    pub message: String,
}

/// Aggregate result of one sweep invocation; the externally observable,
/// monitorable contract of the batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub run_date: NaiveDate,
    pub performed: bool,
    pub auto_renewed: i32,
    pub renewal_failed: i32,
    pub skipped: i32,
    pub auto_renew_disabled: i32,
    pub marked_expired: i32,
    pub errors: Vec<SweepAccountError>,
}

impl SweepSummary {
    pub fn new(run_date: NaiveDate, marked_expired: i32) -> Self {
        Self {
            run_date,
            performed: true,
            auto_renewed: 0,
            renewal_failed: 0,
            skipped: 0,
            auto_renew_disabled: 0,
            marked_expired,
            errors: Vec::new(),
        }
    }

    /// Summary for a run outside the billing anniversary: nothing happened.
    pub fn no_op(run_date: NaiveDate) -> Self {
        Self {
            performed: false,
            ..Self::new(run_date, 0)
        }
    }

    pub fn record(&mut self, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::AutoRenewed => self.auto_renewed += 1,
            SweepOutcome::RenewalFailed => self.renewal_failed += 1,
            SweepOutcome::Skipped => self.skipped += 1,
            SweepOutcome::AutoRenewDisabled => self.auto_renew_disabled += 1,
        }
    }

    pub fn record_error(&mut self, account_id: Uuid, message: String) {
        self.errors.push(SweepAccountError {
            account_id,
            message,
        });
    }

    pub fn accounts_processed(&self) -> i32 {
        self.auto_renewed
            + self.renewal_failed
            + self.skipped
            + self.auto_renew_disabled
            + self.errors.len() as i32
    }
}

/// Persisted audit row for one sweep invocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SweepRun {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: DateTime<Utc>,
    pub auto_renewed: i32,
    pub renewal_failed: i32,
    pub skipped: i32,
    pub auto_renew_disabled: i32,
    pub marked_expired: i32,
    pub errors: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_outcomes() {
        let date = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let mut summary = SweepSummary::new(date, 3);

        summary.record(SweepOutcome::AutoRenewed);
        summary.record(SweepOutcome::AutoRenewed);
        summary.record(SweepOutcome::Skipped);
        summary.record(SweepOutcome::RenewalFailed);
        summary.record(SweepOutcome::AutoRenewDisabled);
        summary.record_error(Uuid::new_v4(), "boom".to_string());

        assert_eq!(summary.auto_renewed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.renewal_failed, 1);
        assert_eq!(summary.auto_renew_disabled, 1);
        assert_eq!(summary.marked_expired, 3);
        assert_eq!(summary.accounts_processed(), 6);
    }

    #[test]
    fn no_op_summary_is_empty() {
        let date = NaiveDate::from_ymd_opt(2025, 4, 15).unwrap();
        let summary = SweepSummary::no_op(date);

        assert!(!summary.performed);
        assert_eq!(summary.accounts_processed(), 0);
        assert_eq!(summary.marked_expired, 0);
    }
}
