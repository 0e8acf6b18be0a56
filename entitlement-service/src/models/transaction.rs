//! Renewal transaction model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of one renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "succeeded" => TransactionStatus::Succeeded,
            _ => TransactionStatus::Failed,
        }
    }
}

/// Immutable record of one renewal attempt, success or failure.
///
/// A failed attempt carries `new_end_date == previous_end_date`: the
/// entitlement was not extended.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionRecord {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub period_id: Option<Uuid>,
    pub plan_name: String,
    pub amount: Decimal,
    pub previous_end_date: NaiveDate,
    pub new_end_date: NaiveDate,
    pub status: String,
    pub gateway_transaction_id: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for persisting a renewal attempt.
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub account_id: Uuid,
    pub period_id: Option<Uuid>,
    pub plan_name: String,
    pub amount: Decimal,
    pub previous_end_date: NaiveDate,
    pub new_end_date: NaiveDate,
    pub status: TransactionStatus,
    pub gateway_transaction_id: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}
