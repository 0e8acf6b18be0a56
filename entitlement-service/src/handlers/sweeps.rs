//! Sweep trigger endpoints, invoked by the external scheduler.

use axum::{extract::State, Json};
use chrono::NaiveDate;
use serde::Deserialize;
use service_core::error::AppError;

use crate::models::SweepSummary;
use crate::AppState;

/// Optional request body pinning the evaluation date. Without it the sweep
/// evaluates "today" in the configured billing offset.
#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    pub as_of: Option<NaiveDate>,
}

/// Run the daily renewal sweep. Idempotent per day.
pub async fn trigger_renewal_sweep(
    State(state): State<AppState>,
    body: Option<Json<SweepRequest>>,
) -> Result<Json<SweepSummary>, AppError> {
    let as_of = body.and_then(|Json(req)| req.as_of);
    let summary = state.renewal.run_renewal_sweep(as_of).await?;
    Ok(Json(summary))
}

/// Expire lapsed periods without attempting renewals.
pub async fn trigger_expiration_sweep(
    State(state): State<AppState>,
    body: Option<Json<SweepRequest>>,
) -> Result<Json<SweepSummary>, AppError> {
    let as_of = body.and_then(|Json(req)| req.as_of);
    let summary = state.renewal.run_expiration_sweep(as_of).await?;
    Ok(Json(summary))
}
