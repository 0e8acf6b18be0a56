//! Best-effort delivery of renewal notifications.
//!
//! Notification failures never fail the renewal itself; the ledger is the
//! source of truth and the notifier only reports on it.

use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::NotifierConfig;
use crate::services::metrics::record_notification;

#[derive(Debug, Serialize)]
struct RenewalNotice<'a> {
    account_id: Uuid,
    email: &'a str,
    kind: &'a str,
    plan_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days_remaining: Option<i64>,
}

#[derive(Clone)]
pub struct Notifier {
    client: Client,
    url: Option<String>,
}

impl Notifier {
    pub fn new(config: &NotifierConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: config.url.clone(),
        }
    }

    /// Tell the account holder their subscription renewed.
    #[instrument(skip(self, email), fields(account_id = %account_id))]
    pub async fn notify_renewal_success(
        &self,
        account_id: Uuid,
        email: &str,
        plan_name: &str,
        new_end_date: NaiveDate,
    ) {
        self.deliver(
            "renewal_success",
            &RenewalNotice {
                account_id,
                email,
                kind: "renewal_success",
                plan_name,
                new_end_date: Some(new_end_date),
                end_date: None,
                days_remaining: None,
            },
        )
        .await;
    }

    /// Tell the account holder a renewal charge failed and action is needed.
    #[instrument(skip(self, email), fields(account_id = %account_id))]
    pub async fn notify_renewal_failure(&self, account_id: Uuid, email: &str, plan_name: &str) {
        self.deliver(
            "renewal_failure",
            &RenewalNotice {
                account_id,
                email,
                kind: "renewal_failure",
                plan_name,
                new_end_date: None,
                end_date: None,
                days_remaining: None,
            },
        )
        .await;
    }

    /// Remind the account holder their entitlement lapses soon.
    #[instrument(skip(self, email), fields(account_id = %account_id))]
    pub async fn notify_renewal_reminder(
        &self,
        account_id: Uuid,
        email: &str,
        plan_name: &str,
        end_date: NaiveDate,
        days_remaining: i64,
    ) {
        self.deliver(
            "renewal_reminder",
            &RenewalNotice {
                account_id,
                email,
                kind: "renewal_reminder",
                plan_name,
                new_end_date: None,
                end_date: Some(end_date),
                days_remaining: Some(days_remaining),
            },
        )
        .await;
    }

    async fn deliver(&self, kind: &str, notice: &RenewalNotice<'_>) {
        let Some(url) = &self.url else {
            record_notification(kind, "disabled");
            return;
        };

        let endpoint = format!("{}/notifications", url);
        match self.client.post(&endpoint).json(notice).send().await {
            Ok(response) if response.status().is_success() => {
                record_notification(kind, "delivered");
                info!(account_id = %notice.account_id, kind = kind, "Notification delivered");
            }
            Ok(response) => {
                record_notification(kind, "rejected");
                warn!(
                    account_id = %notice.account_id,
                    kind = kind,
                    status = %response.status(),
                    "Notification rejected"
                );
            }
            Err(e) => {
                record_notification(kind, "failed");
                warn!(
                    account_id = %notice.account_id,
                    kind = kind,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    }
}
