//! Renewal sweep integration tests.

mod common;

use common::{date, TestApp};
use entitlement_service::models::Plan;
use reqwest::StatusCode;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_approval(gateway: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transaction_id": "txn_renewal_1",
            "status": "approved",
            "rotated_billing_key": "bk_rotated"
        })))
        .expect(expected_calls)
        .mount(gateway)
        .await;
}

async fn mount_decline(gateway: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "code": "card_declined",
            "message": "Insufficient funds"
        })))
        .expect(1)
        .mount(gateway)
        .await;
}

#[tokio::test]
async fn successful_renewal_creates_next_period() {
    let app = TestApp::spawn().await;
    mount_approval(&app.gateway, 1).await;

    let account = app.seed_account(true, Some("bk_original")).await;
    let prior = app
        .seed_period(
            account.account_id,
            Plan::TutorTeachers,
            date(2025, 3, 1),
            date(2025, 3, 31),
        )
        .await;

    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 1)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["performed"], true);
    assert_eq!(summary["auto_renewed"], 1);
    assert_eq!(summary["renewal_failed"], 0);
    assert_eq!(summary["marked_expired"], 1);

    // New period: fresh quota, full calendar month, auto_renew payment.
    let new_period = app
        .db
        .period_starting_on(account.account_id, date(2025, 4, 1))
        .await
        .unwrap()
        .expect("renewal should create a period starting today");
    assert_eq!(new_period.end_date, date(2025, 4, 30));
    assert_eq!(new_period.quota_used, 0);
    assert_eq!(new_period.quota_total, 1800);
    assert_eq!(new_period.payment_method, "auto_renew");
    assert_eq!(new_period.status, "active");

    // Pointer follows the new period; the prior one is expired history.
    let current = app
        .db
        .current_period(account.account_id, date(2025, 4, 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.period_id, new_period.period_id);
    assert_ne!(current.period_id, prior.period_id);

    // Rotated billing key replaced the stored credential.
    let refreshed = app
        .db
        .get_account(account.account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.billing_key.as_deref(), Some("bk_rotated"));

    // Succeeded transaction recorded with the window extension.
    let transactions: Value = app
        .client
        .get(format!(
            "{}/accounts/{}/transactions",
            app.address, account.account_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let records = transactions.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "succeeded");
    assert_eq!(records[0]["previous_end_date"], "2025-03-31");
    assert_eq!(records[0]["new_end_date"], "2025-04-30");
    assert_eq!(records[0]["gateway_transaction_id"], "txn_renewal_1");
}

#[tokio::test]
async fn declined_charge_records_failure_without_extension() {
    let app = TestApp::spawn().await;
    mount_decline(&app.gateway).await;

    let account = app.seed_account(true, Some("bk_original")).await;
    app.seed_period(
        account.account_id,
        Plan::SchoolTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 1)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["renewal_failed"], 1);
    assert_eq!(summary["auto_renewed"], 0);

    // No new period; the entitlement lapses.
    assert!(app
        .db
        .period_starting_on(account.account_id, date(2025, 4, 1))
        .await
        .unwrap()
        .is_none());
    assert!(app
        .db
        .current_period(account.account_id, date(2025, 4, 1))
        .await
        .unwrap()
        .is_none());

    // A decline does not demote the account out of auto-renewal.
    let refreshed = app
        .db
        .get_account(account.account_id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.auto_renew);

    let transactions: Value = app
        .client
        .get(format!(
            "{}/accounts/{}/transactions",
            app.address, account.account_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let records = transactions.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "failed");
    assert_eq!(records[0]["failure_code"], "card_declined");
    assert_eq!(records[0]["previous_end_date"], "2025-03-31");
    assert_eq!(records[0]["new_end_date"], "2025-03-31");
}

#[tokio::test]
async fn gateway_outage_records_failure_without_extension() {
    let app = TestApp::spawn().await;
    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let account = app.seed_account(true, Some("bk_original")).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 1)).await;
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["renewal_failed"], 1);

    assert!(app
        .db
        .period_starting_on(account.account_id, date(2025, 4, 1))
        .await
        .unwrap()
        .is_none());

    let transactions: Value = app
        .client
        .get(format!(
            "{}/accounts/{}/transactions",
            app.address, account.account_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(transactions[0]["status"], "failed");
    assert_eq!(transactions[0]["failure_code"], "gateway_transport");
}

#[tokio::test]
async fn missing_credential_is_skipped_without_charge() {
    let app = TestApp::spawn().await;
    mount_approval(&app.gateway, 0).await;

    let account = app.seed_account(true, None).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 1)).await;
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["auto_renewed"], 0);

    // Still eligible next month if a credential shows up.
    let refreshed = app
        .db
        .get_account(account.account_id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.auto_renew);
}

#[tokio::test]
async fn broken_chain_disables_auto_renew_without_charge() {
    let app = TestApp::spawn().await;
    mount_approval(&app.gateway, 0).await;

    let account = app.seed_account(true, Some("bk_original")).await;
    // Last period ended mid-March: a gap, not a chain into April 1.
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 2, 15),
        date(2025, 3, 15),
    )
    .await;

    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 1)).await;
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["auto_renew_disabled"], 1);
    assert_eq!(summary["auto_renewed"], 0);
    assert_eq!(summary["marked_expired"], 1);

    let refreshed = app
        .db
        .get_account(account.account_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!refreshed.auto_renew);
}

#[tokio::test]
async fn non_anniversary_run_is_a_no_op() {
    let app = TestApp::spawn().await;
    mount_approval(&app.gateway, 0).await;

    let account = app.seed_account(true, Some("bk_original")).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 15),
        date(2025, 4, 14),
    )
    .await;

    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 15)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["performed"], false);
    assert_eq!(summary["auto_renewed"], 0);
    assert_eq!(summary["skipped"], 0);
    assert_eq!(summary["marked_expired"], 0);
}

#[tokio::test]
async fn double_invocation_charges_exactly_once() {
    let app = TestApp::spawn().await;
    // The mock is satisfied by exactly one call across both invocations.
    mount_approval(&app.gateway, 1).await;

    let account = app.seed_account(true, Some("bk_original")).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    let first: Value = app
        .trigger_sweep("/sweeps/renewal", date(2025, 4, 1))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["auto_renewed"], 1);

    let second: Value = app
        .trigger_sweep("/sweeps/renewal", date(2025, 4, 1))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["auto_renewed"], 0);
    assert_eq!(second["skipped"], 1);

    // Exactly one April period exists.
    let transactions: Value = app
        .client
        .get(format!(
            "{}/accounts/{}/transactions",
            app.address, account.account_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(transactions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn period_ending_today_is_not_renewed_today() {
    let app = TestApp::spawn().await;
    mount_approval(&app.gateway, 0).await;

    let account = app.seed_account(true, Some("bk_original")).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 2),
        date(2025, 4, 1),
    )
    .await;

    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 1)).await;
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["auto_renewed"], 0);
    assert_eq!(summary["auto_renew_disabled"], 0);

    // Not due yet is not a broken chain: the account stays eligible.
    let refreshed = app
        .db
        .get_account(account.account_id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.auto_renew);
}

#[tokio::test]
async fn lapse_reminder_goes_to_non_renewing_accounts_only() {
    let app = TestApp::spawn().await;

    // Lapsing in 2 days with auto-renew off: gets the reminder.
    let lapsing = app.seed_account(false, None).await;
    app.seed_period(
        lapsing.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 18),
        date(2025, 4, 17),
    )
    .await;

    // Auto-renews, so no reminder even though it ends tomorrow.
    let renewing = app.seed_account(true, Some("bk_live_1")).await;
    app.seed_period(
        renewing.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 17),
        date(2025, 4, 16),
    )
    .await;

    // Lapsing but outside the reminder window.
    let distant = app.seed_account(false, None).await;
    app.seed_period(
        distant.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 26),
        date(2025, 4, 25),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/notifications"))
        .and(body_partial_json(json!({
            "kind": "renewal_reminder",
            "account_id": lapsing.account_id,
            "days_remaining": 2
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.gateway)
        .await;
    Mock::given(method("POST"))
        .and(path("/notifications"))
        .and(body_partial_json(json!({ "kind": "renewal_reminder" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.gateway)
        .await;

    // Mid-month daily invocation: renewal work is a no-op but reminders
    // still go out.
    let response = app.trigger_sweep("/sweeps/renewal", date(2025, 4, 15)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["performed"], false);
}

#[tokio::test]
async fn overlapping_active_periods_are_flagged() {
    let app = TestApp::spawn().await;

    let conflicted = app.seed_account(true, Some("bk_live_1")).await;
    app.seed_period(
        conflicted.account_id,
        Plan::TutorTeachers,
        date(2025, 4, 1),
        date(2025, 4, 30),
    )
    .await;
    app.seed_period(
        conflicted.account_id,
        Plan::TutorTeachers,
        date(2025, 4, 15),
        date(2025, 5, 14),
    )
    .await;

    let clean = app.seed_account(true, Some("bk_live_2")).await;
    app.seed_period(
        clean.account_id,
        Plan::TutorTeachers,
        date(2025, 4, 1),
        date(2025, 4, 30),
    )
    .await;

    let conflicts = app
        .db
        .active_period_conflicts(date(2025, 4, 20))
        .await
        .unwrap();
    assert_eq!(conflicts, vec![(conflicted.account_id, 2)]);
}

#[tokio::test]
async fn sweep_without_secret_is_rejected_before_any_work() {
    let app = TestApp::spawn().await;
    mount_approval(&app.gateway, 0).await;

    let account = app.seed_account(true, Some("bk_original")).await;
    app.seed_period(
        account.account_id,
        Plan::TutorTeachers,
        date(2025, 3, 1),
        date(2025, 3, 31),
    )
    .await;

    let missing = app
        .client
        .post(format!("{}/sweeps/renewal", app.address))
        .json(&json!({ "as_of": "2025-04-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .client
        .post(format!("{}/sweeps/renewal", app.address))
        .header("x-sweep-secret", "not-the-secret")
        .json(&json!({ "as_of": "2025-04-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    // No charge, no new period, prior period untouched.
    assert!(app
        .db
        .period_starting_on(account.account_id, date(2025, 4, 1))
        .await
        .unwrap()
        .is_none());
    let prior = app
        .db
        .period_ending_on(account.account_id, date(2025, 3, 31))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prior.status, "active");
}
