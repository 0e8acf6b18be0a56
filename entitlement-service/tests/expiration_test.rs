//! Expiration sweep integration tests.

mod common;

use common::{date, TestApp};
use entitlement_service::models::Plan;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn expiration_sweep_marks_lapsed_periods() {
    let app = TestApp::spawn().await;

    let lapsed = app.seed_account(false, None).await;
    app.seed_period(
        lapsed.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    let current = app.seed_account(false, None).await;
    app.seed_period(
        current.account_id,
        Plan::TutorTeachers,
        date(2025, 4, 1),
        date(2025, 4, 30),
    )
    .await;

    let response = app
        .trigger_sweep("/sweeps/expiration", date(2025, 4, 10))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["marked_expired"], 1);

    // Lapsed account loses its pointer; the covered one keeps its period.
    let refreshed = app.db.get_account(lapsed.account_id).await.unwrap().unwrap();
    assert!(refreshed.current_period_id.is_none());
    let old = app
        .db
        .period_ending_on(lapsed.account_id, date(2025, 3, 31))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, "expired");

    let still_current = app
        .db
        .current_period(current.account_id, date(2025, 4, 10))
        .await
        .unwrap();
    assert!(still_current.is_some());
}

#[tokio::test]
async fn expiration_sweep_is_idempotent() {
    let app = TestApp::spawn().await;

    let account = app.seed_account(false, None).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    let first: Value = app
        .trigger_sweep("/sweeps/expiration", date(2025, 4, 10))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["marked_expired"], 1);

    let second: Value = app
        .trigger_sweep("/sweeps/expiration", date(2025, 4, 10))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["marked_expired"], 0);
}

#[tokio::test]
async fn period_ending_today_survives_expiration() {
    let app = TestApp::spawn().await;

    let account = app.seed_account(false, None).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    // Inclusive end date: the period is still good all of March 31.
    let summary: Value = app
        .trigger_sweep("/sweeps/expiration", date(2025, 3, 31))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(summary["marked_expired"], 0);

    let period = app
        .db
        .current_period(account.account_id, date(2025, 3, 31))
        .await
        .unwrap();
    assert!(period.is_some());
}
