//! Renewal and expiration sweeps.
//!
//! The renewal sweep is invoked daily by an external scheduler and decides
//! internally whether today is the billing anniversary. Every decision is
//! re-derived from the ledger, so repeated invocations on the same day
//! converge without double-charging.

use chrono::{Duration, FixedOffset, NaiveDate, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::calendar;
use crate::models::{
    Account, CreatePeriod, CreateTransaction, PaymentMethod, Plan, SweepOutcome, SweepSummary,
    TransactionStatus,
};
use crate::services::database::Database;
use crate::services::gateway::{ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway};
use crate::services::metrics::{record_error, record_sweep_outcome};
use crate::services::notifier::Notifier;

/// How many days before a period lapses the reminder goes out.
const REMINDER_WINDOW_DAYS: i64 = 3;

#[derive(Clone)]
pub struct RenewalService {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
    billing_offset: FixedOffset,
}

impl RenewalService {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
        billing_offset: FixedOffset,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            billing_offset,
        }
    }

    /// Run the daily renewal sweep. Outside the billing anniversary this is
    /// a no-op; on the anniversary it expires lapsed periods, then walks
    /// every auto-renew candidate. Per-account failures are collected, never
    /// propagated, so one bad account cannot starve the rest.
    #[instrument(skip(self))]
    pub async fn run_renewal_sweep(
        &self,
        as_of: Option<NaiveDate>,
    ) -> Result<SweepSummary, AppError> {
        let started_utc = Utc::now();
        let today = as_of.unwrap_or_else(|| calendar::today_in(&self.billing_offset));

        // Reminders go out on every daily invocation, not just on the
        // anniversary; a failure here never blocks renewal work.
        if let Err(e) = self.send_lapse_reminders(today).await {
            warn!(error = %e, "Failed to send lapse reminders");
        }

        if !calendar::is_billing_anniversary(today) {
            info!(run_date = %today, "Not a billing anniversary, sweep is a no-op");
            return Ok(SweepSummary::no_op(today));
        }

        info!(run_date = %today, "Starting renewal sweep");

        let marked_expired = self.db.expire_periods(today).await?;
        self.db.active_period_conflicts(today).await?;

        let mut summary = SweepSummary::new(today, marked_expired as i32);
        let candidates = self.db.list_renewal_candidates().await?;
        info!(candidates = candidates.len(), "Evaluating renewal candidates");

        for account in &candidates {
            match self.process_account(account, today).await {
                Ok(outcome) => {
                    record_sweep_outcome(outcome.as_str());
                    summary.record(outcome);
                }
                Err(e) => {
                    record_error("sweep_account", "run_renewal_sweep");
                    error!(account_id = %account.account_id, error = %e, "Renewal failed for account");
                    summary.record_error(account.account_id, e.to_string());
                }
            }
        }

        if let Err(e) = self.db.record_sweep_run(&summary, started_utc).await {
            warn!(error = %e, "Failed to persist sweep run record");
        }

        info!(
            run_date = %today,
            auto_renewed = summary.auto_renewed,
            renewal_failed = summary.renewal_failed,
            skipped = summary.skipped,
            auto_renew_disabled = summary.auto_renew_disabled,
            marked_expired = summary.marked_expired,
            errors = summary.errors.len(),
            "Renewal sweep completed"
        );

        Ok(summary)
    }

    /// Expire lapsed periods without attempting any renewals. Safe to run
    /// any day, any number of times.
    #[instrument(skip(self))]
    pub async fn run_expiration_sweep(
        &self,
        as_of: Option<NaiveDate>,
    ) -> Result<SweepSummary, AppError> {
        let today = as_of.unwrap_or_else(|| calendar::today_in(&self.billing_offset));
        let marked_expired = self.db.expire_periods(today).await?;

        info!(run_date = %today, marked_expired = marked_expired, "Expiration sweep completed");

        Ok(SweepSummary::new(today, marked_expired as i32))
    }

    /// Remind accounts whose current period lapses within the reminder
    /// window and will not be auto-renewed (auto-renew off or no stored
    /// credential).
    #[instrument(skip(self))]
    async fn send_lapse_reminders(&self, today: NaiveDate) -> Result<(), AppError> {
        let lapsing = self
            .db
            .list_lapsing_periods(today, REMINDER_WINDOW_DAYS)
            .await?;

        for entry in &lapsing {
            let days_remaining = (entry.end_date - today).num_days();
            self.notifier
                .notify_renewal_reminder(
                    entry.account_id,
                    &entry.email,
                    &entry.plan_name,
                    entry.end_date,
                    days_remaining,
                )
                .await;
        }

        if !lapsing.is_empty() {
            info!(reminders = lapsing.len(), "Lapse reminders sent");
        }

        Ok(())
    }

    /// Decide and execute one account's renewal for `today`.
    #[instrument(skip(self, account), fields(account_id = %account.account_id))]
    async fn process_account(
        &self,
        account: &Account,
        today: NaiveDate,
    ) -> Result<SweepOutcome, AppError> {
        if !account.has_credential() {
            warn!(account_id = %account.account_id, "No stored billing key, skipping");
            return Ok(SweepOutcome::Skipped);
        }

        // Idempotency probe: a period already starting today means this
        // account was renewed by an earlier invocation of the same run.
        if self
            .db
            .period_starting_on(account.account_id, today)
            .await?
            .is_some()
        {
            info!(account_id = %account.account_id, "Period already starts today, skipping");
            return Ok(SweepOutcome::Skipped);
        }

        // Continuity probe: renew only off a period that ended yesterday.
        // Anything else means the chain is broken and charging would either
        // overlap or resurrect a long-lapsed subscription.
        let yesterday = today - Duration::days(1);
        let Some(prior) = self.db.period_ending_on(account.account_id, yesterday).await? else {
            // A period still covering today (including one ending today) is
            // simply not due yet; only a genuine gap in the chain demotes
            // the account out of auto-renewal.
            if self
                .db
                .current_period(account.account_id, today)
                .await?
                .is_some()
            {
                info!(account_id = %account.account_id, "Current period still valid, not due");
                return Ok(SweepOutcome::Skipped);
            }

            warn!(
                account_id = %account.account_id,
                "No period ended yesterday, disabling auto-renew"
            );
            self.db.disable_auto_renew(account.account_id).await?;
            return Ok(SweepOutcome::AutoRenewDisabled);
        };

        let Some(plan) = Plan::from_name(&prior.plan_name) else {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Unknown plan '{}' on period {}",
                prior.plan_name,
                prior.period_id
            )));
        };

        let billing_key = account
            .billing_key
            .clone()
            .unwrap_or_default();
        let request = ChargeRequest {
            billing_key,
            amount: plan.amount(),
            currency: "USD".to_string(),
            description: format!("{} renewal", plan.name()),
            reference: renewal_reference(account.account_id, today),
        };

        let new_start = prior.end_date + Duration::days(1);
        let new_end = calendar::last_day_of_month(new_start);

        match self.gateway.charge(&request).await {
            Ok(ChargeOutcome::Approved {
                transaction_id,
                rotated_billing_key,
            }) => {
                let (period, _) = self
                    .db
                    .record_successful_renewal(
                        &CreatePeriod {
                            account_id: account.account_id,
                            plan_name: plan.name().to_string(),
                            amount_paid: plan.amount(),
                            quota_total: plan.quota(),
                            start_date: new_start,
                            end_date: new_end,
                            payment_method: PaymentMethod::AutoRenew,
                        },
                        prior.end_date,
                        &transaction_id,
                        rotated_billing_key.as_deref(),
                    )
                    .await?;

                self.notifier
                    .notify_renewal_success(
                        account.account_id,
                        &account.email,
                        plan.name(),
                        period.end_date,
                    )
                    .await;

                Ok(SweepOutcome::AutoRenewed)
            }
            Ok(ChargeOutcome::Declined { code, message }) => {
                warn!(
                    account_id = %account.account_id,
                    code = %code,
                    "Renewal charge declined"
                );
                self.record_failed_attempt(account, &prior.plan_name, prior.end_date, code, message)
                    .await?;
                self.notifier
                    .notify_renewal_failure(account.account_id, &account.email, plan.name())
                    .await;

                Ok(SweepOutcome::RenewalFailed)
            }
            Err(gateway_err) => {
                // Transport faults are logged apart from declines: the
                // charge state is unknown and may need manual reconciliation
                // against the gateway dashboard.
                error!(
                    account_id = %account.account_id,
                    error = %gateway_err,
                    "Renewal charge did not complete"
                );
                let code = match &gateway_err {
                    GatewayError::Timeout(_) => "gateway_timeout",
                    GatewayError::Transport(_) => "gateway_transport",
                };
                self.record_failed_attempt(
                    account,
                    &prior.plan_name,
                    prior.end_date,
                    code.to_string(),
                    gateway_err.to_string(),
                )
                .await?;

                Ok(SweepOutcome::RenewalFailed)
            }
        }
    }

    async fn record_failed_attempt(
        &self,
        account: &Account,
        plan_name: &str,
        prior_end_date: NaiveDate,
        failure_code: String,
        failure_message: String,
    ) -> Result<(), AppError> {
        let amount = Plan::from_name(plan_name)
            .map(|p| p.amount())
            .unwrap_or_default();

        self.db
            .create_transaction(&CreateTransaction {
                account_id: account.account_id,
                period_id: None,
                plan_name: plan_name.to_string(),
                amount,
                previous_end_date: prior_end_date,
                // A failed attempt extends nothing.
                new_end_date: prior_end_date,
                status: TransactionStatus::Failed,
                gateway_transaction_id: None,
                failure_code: Some(failure_code),
                failure_message: Some(failure_message),
            })
            .await?;

        Ok(())
    }
}

/// Idempotency reference for a renewal attempt: one per account per day.
fn renewal_reference(account_id: Uuid, date: NaiveDate) -> String {
    format!("renewal-{}-{}", account_id, date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_stable_per_account_and_day() {
        let id = Uuid::parse_str("4b8c9a52-7b1e-4f5e-9a3d-2f6c8e1d0b7a").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        assert_eq!(
            renewal_reference(id, date),
            "renewal-4b8c9a52-7b1e-4f5e-9a3d-2f6c8e1d0b7a-2025-04-01"
        );
        assert_eq!(renewal_reference(id, date), renewal_reference(id, date));
    }
}
