pub mod metrics;
pub mod shared_secret;
pub mod tracing;
