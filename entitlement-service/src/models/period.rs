//! Billing-period ledger model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Period status. A period is created active and becomes expired once its
/// coverage window elapses; there is no paused or cancelled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Active,
    Expired,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Active => "active",
            PeriodStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "expired" => PeriodStatus::Expired,
            _ => PeriodStatus::Active,
        }
    }
}

/// How a period was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    OneTime,
    AutoRenew,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::OneTime => "one_time",
            PaymentMethod::AutoRenew => "auto_renew",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "auto_renew" => PaymentMethod::AutoRenew,
            _ => PaymentMethod::OneTime,
        }
    }
}

/// One paid coverage interval with its own quota budget.
///
/// `start_date..=end_date` is inclusive. `quota_used` only ever grows and
/// is bounded by `quota_total` both here and by a storage-level CHECK.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingPeriod {
    pub period_id: Uuid,
    pub account_id: Uuid,
    pub plan_name: String,
    pub amount_paid: Decimal,
    pub quota_total: i64,
    pub quota_used: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub payment_method: String,
    pub payment_status: String,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl BillingPeriod {
    pub fn quota_remaining(&self) -> i64 {
        self.quota_total - self.quota_used
    }

    /// Whether this period covers `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.status == PeriodStatus::Active.as_str()
            && self.start_date <= date
            && date <= self.end_date
    }
}

/// A current period about to lapse without renewal, with the owner's
/// contact details, as surfaced to the reminder step.
#[derive(Debug, Clone, FromRow)]
pub struct LapsingPeriod {
    pub account_id: Uuid,
    pub email: String,
    pub plan_name: String,
    pub end_date: NaiveDate,
}

/// Input for creating a billing period.
#[derive(Debug, Clone)]
pub struct CreatePeriod {
    pub account_id: Uuid,
    pub plan_name: String,
    pub amount_paid: Decimal,
    pub quota_total: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub payment_method: PaymentMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(status: &str, start: NaiveDate, end: NaiveDate) -> BillingPeriod {
        BillingPeriod {
            period_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            plan_name: "Tutor Teachers".to_string(),
            amount_paid: Decimal::new(33000, 2),
            quota_total: 1800,
            quota_used: 0,
            start_date: start,
            end_date: end,
            payment_method: PaymentMethod::AutoRenew.as_str().to_string(),
            payment_status: "paid".to_string(),
            status: status.to_string(),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn covers_is_inclusive_on_both_ends() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        let p = period("active", start, end);

        assert!(p.covers(start));
        assert!(p.covers(end));
        assert!(!p.covers(start.pred_opt().unwrap()));
        assert!(!p.covers(end.succ_opt().unwrap()));
    }

    #[test]
    fn expired_period_covers_nothing() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        let p = period("expired", start, end);

        assert!(!p.covers(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()));
    }
}
