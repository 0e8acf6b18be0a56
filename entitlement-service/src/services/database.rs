//! Database service for entitlement-service.

use crate::models::{
    Account, BillingPeriod, CreateAccount, CreatePeriod, CreateTransaction, LapsingPeriod,
    PeriodStatus, SweepRun, SweepSummary, TransactionRecord, TransactionStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "entitlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Create a new account.
    #[instrument(skip(self, input))]
    pub async fn create_account(&self, input: &CreateAccount) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account_id = Uuid::new_v4();
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (account_id, name, email, auto_renew, billing_key, card_last4)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING account_id, name, email, is_active, auto_renew, billing_key, card_last4, current_period_id, created_utc, updated_utc
            "#,
        )
        .bind(account_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(input.auto_renew)
        .bind(&input.billing_key)
        .bind(&input.card_last4)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)))?;

        timer.observe_duration();
        info!(account_id = %account.account_id, "Account created");

        Ok(account)
    }

    /// Get an account by ID.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, name, email, is_active, auto_renew, billing_key, card_last4, current_period_id, created_utc, updated_utc
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(account)
    }

    /// Accounts the renewal sweep must evaluate: active with auto-renew on.
    /// Credential presence is checked per account so that missing keys are
    /// reported as skipped rather than silently excluded.
    #[instrument(skip(self))]
    pub async fn list_renewal_candidates(&self) -> Result<Vec<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_renewal_candidates"])
            .start_timer();

        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, name, email, is_active, auto_renew, billing_key, card_last4, current_period_id, created_utc, updated_utc
            FROM accounts
            WHERE is_active = TRUE AND auto_renew = TRUE
            ORDER BY account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list renewal candidates: {}", e))
        })?;

        timer.observe_duration();

        Ok(accounts)
    }

    /// Turn auto-renewal off for an account whose billing chain is broken.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn disable_auto_renew(&self, account_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["disable_auto_renew"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE accounts
            SET auto_renew = FALSE, updated_utc = now()
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to disable auto-renew: {}", e))
        })?;

        timer.observe_duration();
        info!(account_id = %account_id, "Auto-renew disabled");

        Ok(())
    }

    // =========================================================================
    // Billing Period Operations
    // =========================================================================

    /// Create a billing period and point the account at it, transactionally.
    #[instrument(skip(self, input), fields(account_id = %input.account_id))]
    pub async fn create_period(&self, input: &CreatePeriod) -> Result<BillingPeriod, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_period"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let period = insert_period(&mut tx, input).await?;
        set_current_period(&mut tx, input.account_id, period.period_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit period creation: {}", e))
        })?;

        timer.observe_duration();
        info!(
            period_id = %period.period_id,
            account_id = %period.account_id,
            start_date = %period.start_date,
            end_date = %period.end_date,
            "Billing period created"
        );

        Ok(period)
    }

    /// Persist everything a successful renewal produces in one transaction:
    /// the new period, the account pointer (and rotated billing key, if
    /// any), and the succeeded transaction record. A crash between gateway
    /// approval and this commit loses nothing partially.
    #[instrument(skip(self, period, rotated_billing_key), fields(account_id = %period.account_id))]
    pub async fn record_successful_renewal(
        &self,
        period: &CreatePeriod,
        previous_end_date: NaiveDate,
        gateway_transaction_id: &str,
        rotated_billing_key: Option<&str>,
    ) -> Result<(BillingPeriod, TransactionRecord), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_successful_renewal"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let new_period = insert_period(&mut tx, period).await?;
        set_current_period(&mut tx, period.account_id, new_period.period_id).await?;

        if let Some(key) = rotated_billing_key {
            sqlx::query(
                r#"
                UPDATE accounts
                SET billing_key = $2, updated_utc = now()
                WHERE account_id = $1
                "#,
            )
            .bind(period.account_id)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to rotate billing key: {}", e))
            })?;
            info!(account_id = %period.account_id, "Stored rotated billing key");
        }

        let record = insert_transaction(
            &mut tx,
            &CreateTransaction {
                account_id: period.account_id,
                period_id: Some(new_period.period_id),
                plan_name: period.plan_name.clone(),
                amount: period.amount_paid,
                previous_end_date,
                new_end_date: new_period.end_date,
                status: TransactionStatus::Succeeded,
                gateway_transaction_id: Some(gateway_transaction_id.to_string()),
                failure_code: None,
                failure_message: None,
            },
        )
        .await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit renewal: {}", e))
        })?;

        timer.observe_duration();

        Ok((new_period, record))
    }

    /// Resolve the account's current entitlement through its period pointer,
    /// validated against status and coverage window.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn current_period(
        &self,
        account_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["current_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(
            r#"
            SELECT bp.period_id, bp.account_id, bp.plan_name, bp.amount_paid, bp.quota_total, bp.quota_used, bp.start_date, bp.end_date, bp.payment_method, bp.payment_status, bp.status, bp.created_utc
            FROM billing_periods bp
            JOIN accounts a ON bp.period_id = a.current_period_id
            WHERE a.account_id = $1 AND bp.status = 'active' AND bp.end_date >= $2
            "#,
        )
        .bind(account_id)
        .bind(today)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get current period: {}", e)))?;

        timer.observe_duration();

        Ok(period)
    }

    /// Find a period starting exactly on `date` (the sweep's idempotency probe).
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn period_starting_on(
        &self,
        account_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["period_starting_on"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(
            r#"
            SELECT period_id, account_id, plan_name, amount_paid, quota_total, quota_used, start_date, end_date, payment_method, payment_status, status, created_utc
            FROM billing_periods
            WHERE account_id = $1 AND start_date = $2
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find period by start date: {}", e))
        })?;

        timer.observe_duration();

        Ok(period)
    }

    /// Find a period ending exactly on `date` (the sweep's continuity probe).
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn period_ending_on(
        &self,
        account_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["period_ending_on"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(
            r#"
            SELECT period_id, account_id, plan_name, amount_paid, quota_total, quota_used, start_date, end_date, payment_method, payment_status, status, created_utc
            FROM billing_periods
            WHERE account_id = $1 AND end_date = $2
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find period by end date: {}", e))
        })?;

        timer.observe_duration();

        Ok(period)
    }

    /// Mark every active period whose coverage window has elapsed as expired
    /// and drop account pointers to them. Idempotent and order-independent.
    #[instrument(skip(self))]
    pub async fn expire_periods(&self, today: NaiveDate) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_periods"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let expired: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE billing_periods
            SET status = 'expired'
            WHERE status = 'active' AND end_date < $1
            RETURNING period_id
            "#,
        )
        .bind(today)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to expire periods: {}", e)))?;

        if !expired.is_empty() {
            let ids: Vec<Uuid> = expired.iter().map(|(id,)| *id).collect();
            sqlx::query(
                r#"
                UPDATE accounts
                SET current_period_id = NULL, updated_utc = now()
                WHERE current_period_id = ANY($1)
                "#,
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear period pointers: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit expiration: {}", e))
        })?;

        timer.observe_duration();

        Ok(expired.len() as u64)
    }

    /// Current periods ending within `within_days` of `today` whose owner
    /// will not be auto-renewed (auto-renew off or no stored credential),
    /// with contact details for the reminder notice.
    #[instrument(skip(self))]
    pub async fn list_lapsing_periods(
        &self,
        today: NaiveDate,
        within_days: i64,
    ) -> Result<Vec<LapsingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_lapsing_periods"])
            .start_timer();

        let lapsing = sqlx::query_as::<_, LapsingPeriod>(
            r#"
            SELECT a.account_id, a.email, bp.plan_name, bp.end_date
            FROM billing_periods bp
            JOIN accounts a ON a.current_period_id = bp.period_id
            WHERE bp.status = 'active'
              AND bp.end_date >= $1
              AND bp.end_date <= $2
              AND a.is_active = TRUE
              AND (a.auto_renew = FALSE OR a.billing_key IS NULL)
            ORDER BY bp.end_date
            "#,
        )
        .bind(today)
        .bind(today + chrono::Duration::days(within_days))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list lapsing periods: {}", e))
        })?;

        timer.observe_duration();

        Ok(lapsing)
    }

    /// Accounts holding more than one currently-valid active period. The
    /// uniqueness rule is enforced by convention only, so violations are
    /// surfaced for alerting instead of being silently resolved.
    #[instrument(skip(self))]
    pub async fn active_period_conflicts(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<(Uuid, i64)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_period_conflicts"])
            .start_timer();

        let conflicts: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT account_id, COUNT(*)
            FROM billing_periods
            WHERE status = 'active' AND end_date >= $1
            GROUP BY account_id
            HAVING COUNT(*) > 1
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check period conflicts: {}", e))
        })?;

        timer.observe_duration();

        for (account_id, count) in &conflicts {
            warn!(
                account_id = %account_id,
                active_periods = count,
                "Account has more than one active billing period"
            );
        }

        Ok(conflicts)
    }

    // =========================================================================
    // Transaction Records
    // =========================================================================

    /// Persist a renewal attempt record.
    #[instrument(skip(self, input), fields(account_id = %input.account_id))]
    pub async fn create_transaction(
        &self,
        input: &CreateTransaction,
    ) -> Result<TransactionRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_transaction"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        let record = insert_transaction(&mut tx, input).await?;
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction record: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }

    /// List renewal transactions for an account, newest first.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        let records = sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT transaction_id, account_id, period_id, plan_name, amount, previous_end_date, new_end_date, status, gateway_transaction_id, failure_code, failure_message, created_utc
            FROM renewal_transactions
            WHERE account_id = $1
            ORDER BY created_utc DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e))
        })?;

        timer.observe_duration();

        Ok(records)
    }

    // =========================================================================
    // Sweep Runs
    // =========================================================================

    /// Persist the aggregate result of one sweep invocation for audit.
    #[instrument(skip(self, summary))]
    pub async fn record_sweep_run(
        &self,
        summary: &SweepSummary,
        started_utc: DateTime<Utc>,
    ) -> Result<SweepRun, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_sweep_run"])
            .start_timer();

        let run_id = Uuid::new_v4();
        let run = sqlx::query_as::<_, SweepRun>(
            r#"
            INSERT INTO sweep_runs (run_id, run_date, started_utc, completed_utc, auto_renewed, renewal_failed, skipped, auto_renew_disabled, marked_expired, errors)
            VALUES ($1, $2, $3, now(), $4, $5, $6, $7, $8, $9)
            RETURNING run_id, run_date, started_utc, completed_utc, auto_renewed, renewal_failed, skipped, auto_renew_disabled, marked_expired, errors
            "#,
        )
        .bind(run_id)
        .bind(summary.run_date)
        .bind(started_utc)
        .bind(summary.auto_renewed)
        .bind(summary.renewal_failed)
        .bind(summary.skipped)
        .bind(summary.auto_renew_disabled)
        .bind(summary.marked_expired)
        .bind(summary.errors.len() as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record sweep run: {}", e)))?;

        timer.observe_duration();

        Ok(run)
    }
}

async fn insert_period(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    input: &CreatePeriod,
) -> Result<BillingPeriod, AppError> {
    let period_id = Uuid::new_v4();
    sqlx::query_as::<_, BillingPeriod>(
        r#"
        INSERT INTO billing_periods (period_id, account_id, plan_name, amount_paid, quota_total, quota_used, start_date, end_date, payment_method, payment_status, status)
        VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, 'paid', $9)
        RETURNING period_id, account_id, plan_name, amount_paid, quota_total, quota_used, start_date, end_date, payment_method, payment_status, status, created_utc
        "#,
    )
    .bind(period_id)
    .bind(input.account_id)
    .bind(&input.plan_name)
    .bind(input.amount_paid)
    .bind(input.quota_total)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(input.payment_method.as_str())
    .bind(PeriodStatus::Active.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert period: {}", e)))
}

async fn set_current_period(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_id: Uuid,
    period_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE accounts
        SET current_period_id = $2, updated_utc = now()
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .bind(period_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to set current period: {}", e))
    })?;
    Ok(())
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    input: &CreateTransaction,
) -> Result<TransactionRecord, AppError> {
    let transaction_id = Uuid::new_v4();
    sqlx::query_as::<_, TransactionRecord>(
        r#"
        INSERT INTO renewal_transactions (transaction_id, account_id, period_id, plan_name, amount, previous_end_date, new_end_date, status, gateway_transaction_id, failure_code, failure_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING transaction_id, account_id, period_id, plan_name, amount, previous_end_date, new_end_date, status, gateway_transaction_id, failure_code, failure_message, created_utc
        "#,
    )
    .bind(transaction_id)
    .bind(input.account_id)
    .bind(input.period_id)
    .bind(&input.plan_name)
    .bind(input.amount)
    .bind(input.previous_end_date)
    .bind(input.new_end_date)
    .bind(input.status.as_str())
    .bind(&input.gateway_transaction_id)
    .bind(&input.failure_code)
    .bind(&input.failure_message)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert transaction: {}", e)))
}
