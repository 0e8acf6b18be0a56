pub mod database;
pub mod gateway;
pub mod metrics;
pub mod notifier;
pub mod quota;
pub mod renewal;

pub use database::Database;
pub use gateway::{ChargeOutcome, ChargeRequest, GatewayError, HttpPaymentGateway, PaymentGateway};
pub use notifier::Notifier;
pub use quota::{QuotaCheck, QuotaDeduction, QuotaError, QuotaService};
pub use renewal::RenewalService;
