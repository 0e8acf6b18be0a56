//! Domain models for entitlement-service.

mod account;
mod period;
mod plan;
mod sweep;
mod transaction;
mod usage;

pub use account::{Account, CreateAccount};
pub use period::{BillingPeriod, CreatePeriod, LapsingPeriod, PaymentMethod, PeriodStatus};
pub use plan::Plan;
pub use sweep::{SweepAccountError, SweepOutcome, SweepRun, SweepSummary};
pub use transaction::{CreateTransaction, TransactionRecord, TransactionStatus};
pub use usage::{UsageContext, UsageLogEntry};
