//! Configuration for entitlement-service.

use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::Config as CoreConfig;
use std::env;

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    pub common: CoreConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub sweep: SweepConfig,
    pub gateway: GatewayConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Shared secret required on the sweep trigger endpoints.
    pub shared_secret: Secret<String>,
    /// Fixed UTC offset the billing calendar is evaluated in, e.g. "+09:00".
    pub billing_utc_offset: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub key_id: String,
    pub key_secret: Secret<String>,
    /// Gateway calls must not hang the sweep; expiry is a transport failure.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Notification collaborator base URL; unset disables delivery.
    pub url: Option<String>,
}

impl EntitlementConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        // Port comes through the shared loader (APP__PORT or the optional
        // configuration file).
        let common = CoreConfig::load()?;

        let database_url =
            env::var("ENTITLEMENT_DATABASE_URL").expect("ENTITLEMENT_DATABASE_URL must be set");
        let max_connections = env::var("ENTITLEMENT_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("ENTITLEMENT_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let shared_secret =
            env::var("ENTITLEMENT_SWEEP_SECRET").expect("ENTITLEMENT_SWEEP_SECRET must be set");
        let billing_utc_offset =
            env::var("ENTITLEMENT_BILLING_UTC_OFFSET").unwrap_or_else(|_| "+09:00".to_string());

        let gateway_base_url = env::var("ENTITLEMENT_GATEWAY_URL")
            .unwrap_or_else(|_| "https://api.gateway.example.com".to_string());
        let gateway_key_id = env::var("ENTITLEMENT_GATEWAY_KEY_ID").unwrap_or_default();
        let gateway_key_secret = env::var("ENTITLEMENT_GATEWAY_KEY_SECRET").unwrap_or_default();
        let gateway_timeout_secs = env::var("ENTITLEMENT_GATEWAY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        let notifier_url = env::var("ENTITLEMENT_NOTIFICATION_URL").ok();

        let log_level = env::var("ENTITLEMENT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("ENTITLEMENT_OTLP_ENDPOINT").ok();

        Ok(Self {
            common,
            service_name: "entitlement-service".to_string(),
            log_level,
            otlp_endpoint,
            database: DatabaseConfig {
                url: database_url,
                max_connections,
                min_connections,
            },
            sweep: SweepConfig {
                shared_secret: Secret::new(shared_secret),
                billing_utc_offset,
            },
            gateway: GatewayConfig {
                api_base_url: gateway_base_url,
                key_id: gateway_key_id,
                key_secret: Secret::new(gateway_key_secret),
                timeout_secs: gateway_timeout_secs,
            },
            notifier: NotifierConfig { url: notifier_url },
        })
    }
}
