//! Entitlement service: billing-period ledger, metered usage quotas and
//! the idempotent renewal sweep.

pub mod calendar;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application, SWEEP_SECRET_HEADER};
