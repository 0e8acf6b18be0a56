//! Quota check and deduction endpoints.

use axum::{extract::State, Json};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::UsageContext;
use crate::services::{QuotaCheck, QuotaDeduction};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckQuotaRequest {
    pub account_id: Uuid,
    pub units: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeductQuotaRequest {
    pub account_id: Uuid,
    pub units: i64,
    #[serde(default)]
    pub student_id: Option<Uuid>,
    #[serde(default)]
    pub assignment_id: Option<Uuid>,
    pub feature: String,
}

/// Advisory check: would `units` fit in the current period's budget?
pub async fn check_quota(
    State(state): State<AppState>,
    Json(payload): Json<CheckQuotaRequest>,
) -> Result<Json<QuotaCheck>, AppError> {
    let check = state
        .quota
        .check(payload.account_id, payload.units)
        .await?;
    Ok(Json(check))
}

/// Deduct `units` from the account's current period, atomically.
pub async fn deduct_quota(
    State(state): State<AppState>,
    Json(payload): Json<DeductQuotaRequest>,
) -> Result<Json<QuotaDeduction>, AppError> {
    let context = UsageContext {
        student_id: payload.student_id,
        assignment_id: payload.assignment_id,
        feature: payload.feature,
    };

    let deduction = state
        .quota
        .deduct(payload.account_id, payload.units, &context)
        .await?;
    Ok(Json(deduction))
}
