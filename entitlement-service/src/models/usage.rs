//! Usage log model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Immutable record of one quota deduction. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageLogEntry {
    pub log_id: Uuid,
    pub period_id: Uuid,
    pub account_id: Uuid,
    pub points_used: i64,
    pub quota_before: i64,
    pub quota_after: i64,
    pub student_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
    pub feature: String,
    pub created_utc: DateTime<Utc>,
}

/// Feature context attached to a deduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageContext {
    pub student_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
    pub feature: String,
}
