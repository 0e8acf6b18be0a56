//! Metrics module for entitlement-service.
//! Prometheus metrics for quota accounting, sweeps and gateway traffic.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "entitlement_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Quota deductions counter
pub static QUOTA_DEDUCTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Rejected quota operations counter
pub static QUOTA_REJECTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Sweep outcome counter
pub static SWEEP_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Gateway charge attempts counter
pub static GATEWAY_CHARGES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Notification delivery counter
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    QUOTA_DEDUCTIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_quota_deductions_total",
                "Total quota deductions by feature"
            ),
            &["feature"]
        )
        .expect("Failed to register QUOTA_DEDUCTIONS_TOTAL")
    });

    QUOTA_REJECTIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_quota_rejections_total",
                "Quota operations rejected by reason"
            ),
            &["reason"]
        )
        .expect("Failed to register QUOTA_REJECTIONS_TOTAL")
    });

    SWEEP_OUTCOMES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_sweep_outcomes_total",
                "Per-account renewal sweep outcomes"
            ),
            &["outcome"]
        )
        .expect("Failed to register SWEEP_OUTCOMES_TOTAL")
    });

    GATEWAY_CHARGES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_gateway_charges_total",
                "Payment gateway charge attempts by result"
            ),
            &["result"]
        )
        .expect("Failed to register GATEWAY_CHARGES_TOTAL")
    });

    NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_notifications_total",
                "Best-effort notification deliveries by kind and status"
            ),
            &["kind", "status"]
        )
        .expect("Failed to register NOTIFICATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_errors_total",
                "Total errors by type for alerting"
            ),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a successful quota deduction.
pub fn record_quota_deduction(feature: &str) {
    if let Some(counter) = QUOTA_DEDUCTIONS_TOTAL.get() {
        counter.with_label_values(&[feature]).inc();
    }
}

/// Record a rejected quota operation.
pub fn record_quota_rejection(reason: &str) {
    if let Some(counter) = QUOTA_REJECTIONS_TOTAL.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

/// Record a per-account sweep outcome.
pub fn record_sweep_outcome(outcome: &str) {
    if let Some(counter) = SWEEP_OUTCOMES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a gateway charge attempt result.
pub fn record_gateway_charge(result: &str) {
    if let Some(counter) = GATEWAY_CHARGES_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Record a notification delivery attempt.
pub fn record_notification(kind: &str, status: &str) {
    if let Some(counter) = NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[kind, status]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
