//! Account-scoped read endpoints: entitlement snapshot, usage history and
//! renewal transaction history.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::calendar;
use crate::models::{TransactionRecord, UsageLogEntry};
use crate::AppState;

/// Snapshot of what an account is entitled to right now.
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub account_id: Uuid,
    pub entitled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub quota_total: i64,
    pub quota_used: i64,
    pub quota_remaining: i64,
}

/// Current entitlement for an account. An account with no valid period
/// still resolves, with `entitled = false` and zeroed quota.
pub async fn get_entitlement(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<EntitlementResponse>, AppError> {
    let account = state
        .db
        .get_account(account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;

    let today = calendar::today_in(&state.billing_offset);
    let period = state.db.current_period(account.account_id, today).await?;

    let response = match period {
        Some(p) => EntitlementResponse {
            account_id,
            entitled: true,
            period_id: Some(p.period_id),
            plan_name: Some(p.plan_name.clone()),
            start_date: Some(p.start_date),
            end_date: Some(p.end_date),
            quota_total: p.quota_total,
            quota_used: p.quota_used,
            quota_remaining: p.quota_remaining(),
        },
        None => EntitlementResponse {
            account_id,
            entitled: false,
            period_id: None,
            plan_name: None,
            start_date: None,
            end_date: None,
            quota_total: 0,
            quota_used: 0,
            quota_remaining: 0,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ListUsageQuery {
    #[serde(default = "default_page_size")]
    pub page_size: i32,
    #[serde(default)]
    pub page_token: Option<Uuid>,
}

fn default_page_size() -> i32 {
    50
}

#[derive(Debug, Serialize)]
pub struct ListUsageResponse {
    pub entries: Vec<UsageLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<Uuid>,
}

/// Usage log for an account, newest first, cursor-paginated.
pub async fn list_usage(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<ListUsageQuery>,
) -> Result<Json<ListUsageResponse>, AppError> {
    let entries = state
        .quota
        .list_usage(account_id, query.page_size, query.page_token)
        .await?;

    let next_page_token = if entries.len() as i32 >= query.page_size.clamp(1, 100) {
        entries.last().map(|e| e.log_id)
    } else {
        None
    };

    Ok(Json(ListUsageResponse {
        entries,
        next_page_token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Renewal attempt history for an account, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Vec<TransactionRecord>>, AppError> {
    let records = state.db.list_transactions(account_id, query.limit).await?;
    Ok(Json(records))
}
