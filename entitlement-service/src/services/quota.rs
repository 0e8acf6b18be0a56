//! Metered usage quota accounting.
//!
//! Deductions are a single guarded UPDATE against the account's current
//! period: the quota bound is re-checked inside the statement itself, so
//! concurrent deductions can never push `quota_used` past `quota_total`.

use crate::calendar;
use crate::models::{UsageContext, UsageLogEntry};
use crate::services::database::Database;
use crate::services::metrics::{
    record_quota_deduction, record_quota_rejection, DB_QUERY_DURATION,
};
use chrono::{FixedOffset, NaiveDate};
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("no active billing period covers today")]
    NoActivePeriod,
    #[error("insufficient quota: requested {requested}, remaining {remaining}")]
    InsufficientQuota { requested: i64, remaining: i64 },
    #[error("units must be a positive integer, got {0}")]
    InvalidUnits(i64),
    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::NoActivePeriod => {
                AppError::NotFound(anyhow::anyhow!("No active billing period covers today"))
            }
            QuotaError::InsufficientQuota {
                requested,
                remaining,
            } => AppError::Conflict(anyhow::anyhow!(
                "Insufficient quota: requested {}, remaining {}",
                requested,
                remaining
            )),
            QuotaError::InvalidUnits(units) => AppError::BadRequest(anyhow::anyhow!(
                "Units must be a positive integer, got {}",
                units
            )),
            QuotaError::Storage(inner) => inner,
        }
    }
}

/// Result of a non-mutating quota check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuotaCheck {
    pub period_id: Uuid,
    pub allowed: bool,
    pub remaining: i64,
}

/// Result of a successful deduction.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuotaDeduction {
    pub period_id: Uuid,
    pub quota_total: i64,
    pub quota_used: i64,
    pub remaining: i64,
    pub log_id: Uuid,
}

#[derive(Clone)]
pub struct QuotaService {
    db: Database,
    billing_offset: FixedOffset,
}

impl QuotaService {
    pub fn new(db: Database, billing_offset: FixedOffset) -> Self {
        Self { db, billing_offset }
    }

    /// Whether `units` could be deducted right now, without deducting.
    /// Advisory only; the answer can be stale by the time a deduction runs.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn check(&self, account_id: Uuid, units: i64) -> Result<QuotaCheck, QuotaError> {
        let today = calendar::today_in(&self.billing_offset);
        self.check_as_of(account_id, units, today).await
    }

    pub async fn check_as_of(
        &self,
        account_id: Uuid,
        units: i64,
        today: NaiveDate,
    ) -> Result<QuotaCheck, QuotaError> {
        if units < 1 {
            return Err(QuotaError::InvalidUnits(units));
        }

        let period = self
            .db
            .current_period(account_id, today)
            .await?
            .ok_or(QuotaError::NoActivePeriod)?;

        let remaining = period.quota_remaining();
        Ok(QuotaCheck {
            period_id: period.period_id,
            allowed: units <= remaining,
            remaining,
        })
    }

    /// Atomically deduct `units` from the account's current period and
    /// append a usage log entry, all in one transaction.
    #[instrument(skip(self, context), fields(account_id = %account_id, units = units))]
    pub async fn deduct(
        &self,
        account_id: Uuid,
        units: i64,
        context: &UsageContext,
    ) -> Result<QuotaDeduction, QuotaError> {
        let today = calendar::today_in(&self.billing_offset);
        self.deduct_as_of(account_id, units, context, today).await
    }

    pub async fn deduct_as_of(
        &self,
        account_id: Uuid,
        units: i64,
        context: &UsageContext,
        today: NaiveDate,
    ) -> Result<QuotaDeduction, QuotaError> {
        if units < 1 {
            record_quota_rejection("invalid_units");
            return Err(QuotaError::InvalidUnits(units));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["deduct_quota"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // The WHERE clause carries the full admission test. Zero rows means
        // either no valid current period or not enough quota left; which one
        // is resolved after the fact.
        let updated: Option<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            UPDATE billing_periods bp
            SET quota_used = bp.quota_used + $3
            FROM accounts a
            WHERE a.account_id = $1
              AND bp.period_id = a.current_period_id
              AND bp.status = 'active'
              AND bp.start_date <= $2
              AND bp.end_date >= $2
              AND bp.quota_used + $3 <= bp.quota_total
            RETURNING bp.period_id, bp.quota_total, bp.quota_used
            "#,
        )
        .bind(account_id)
        .bind(today)
        .bind(units)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Quota deduction failed: {}", e)))?;

        let Some((period_id, quota_total, quota_used)) = updated else {
            tx.rollback().await.ok();
            timer.observe_duration();

            return match self.db.current_period(account_id, today).await? {
                None => {
                    record_quota_rejection("no_active_period");
                    Err(QuotaError::NoActivePeriod)
                }
                Some(period) => {
                    record_quota_rejection("insufficient_quota");
                    Err(QuotaError::InsufficientQuota {
                        requested: units,
                        remaining: period.quota_remaining(),
                    })
                }
            };
        };

        let log_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO usage_log (log_id, period_id, account_id, points_used, quota_before, quota_after, student_id, assignment_id, feature)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(log_id)
        .bind(period_id)
        .bind(account_id)
        .bind(units)
        .bind(quota_used - units)
        .bind(quota_used)
        .bind(context.student_id)
        .bind(context.assignment_id)
        .bind(&context.feature)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to append usage log: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit deduction: {}", e))
        })?;

        timer.observe_duration();
        record_quota_deduction(&context.feature);

        let remaining = quota_total - quota_used;
        info!(
            account_id = %account_id,
            period_id = %period_id,
            units = units,
            remaining = remaining,
            feature = %context.feature,
            "Quota deducted"
        );
        if remaining == 0 {
            warn!(account_id = %account_id, period_id = %period_id, "Quota exhausted");
        }

        Ok(QuotaDeduction {
            period_id,
            quota_total,
            quota_used,
            remaining,
            log_id,
        })
    }

    /// Usage log entries for an account's audit trail, newest first,
    /// cursor-paginated on `log_id`.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn list_usage(
        &self,
        account_id: Uuid,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<Vec<UsageLogEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_usage"])
            .start_timer();

        let page_size = page_size.clamp(1, 100);
        let entries = match page_token {
            Some(token) => {
                sqlx::query_as::<_, UsageLogEntry>(
                    r#"
                    SELECT log_id, period_id, account_id, points_used, quota_before, quota_after, student_id, assignment_id, feature, created_utc
                    FROM usage_log
                    WHERE account_id = $1
                      AND created_utc < (SELECT created_utc FROM usage_log WHERE log_id = $2)
                    ORDER BY created_utc DESC
                    LIMIT $3
                    "#,
                )
                .bind(account_id)
                .bind(token)
                .bind(page_size as i64)
                .fetch_all(self.db.pool())
                .await
            }
            None => {
                sqlx::query_as::<_, UsageLogEntry>(
                    r#"
                    SELECT log_id, period_id, account_id, points_used, quota_before, quota_after, student_id, assignment_id, feature, created_utc
                    FROM usage_log
                    WHERE account_id = $1
                    ORDER BY created_utc DESC
                    LIMIT $2
                    "#,
                )
                .bind(account_id)
                .bind(page_size as i64)
                .fetch_all(self.db.pool())
                .await
            }
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list usage: {}", e)))?;

        timer.observe_duration();

        Ok(entries)
    }
}
