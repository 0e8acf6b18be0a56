//! Payment gateway adapter for charge-by-key renewals.
//!
//! The outcome type keeps business answers (approved, declined) apart from
//! transport faults (timeout, 5xx, malformed body). A decline is a final
//! verdict about the card; a transport fault says nothing about the card.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::services::metrics::record_gateway_charge;

/// Charge request sent to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub billing_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    /// Idempotency reference, unique per renewal attempt.
    pub reference: String,
}

/// Business-level answer from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved {
        transaction_id: String,
        /// Some gateways rotate the stored credential on every charge.
        rotated_billing_key: Option<String>,
    },
    Declined {
        code: String,
        message: String,
    },
}

/// Transport-level failure. The charge may or may not have happened.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request timed out after {0}s")]
    Timeout(u64),
    #[error("gateway transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct GatewayChargeResponse {
    transaction_id: String,
    status: String,
    #[serde(default)]
    rotated_billing_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorResponse {
    code: String,
    message: String,
}

/// HTTP client for the payment gateway's charge-by-key API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    api_base_url: String,
    key_id: String,
    key_secret: Secret<String>,
    timeout_secs: u64,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base_url: config.api_base_url.clone(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            timeout_secs: config.timeout_secs,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        let url = format!("{}/v1/charges", self.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                record_gateway_charge("transport_error");
                if e.is_timeout() {
                    error!(
                        reference = %request.reference,
                        timeout_secs = self.timeout_secs,
                        "Gateway charge timed out"
                    );
                    GatewayError::Timeout(self.timeout_secs)
                } else {
                    error!(reference = %request.reference, error = %e, "Gateway request failed");
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();

        if status.is_success() {
            let body: GatewayChargeResponse = response.json().await.map_err(|e| {
                record_gateway_charge("transport_error");
                GatewayError::Transport(format!("malformed success body: {}", e))
            })?;

            if body.status != "approved" {
                record_gateway_charge("transport_error");
                return Err(GatewayError::Transport(format!(
                    "unexpected charge status '{}'",
                    body.status
                )));
            }

            record_gateway_charge("approved");
            info!(
                reference = %request.reference,
                gateway_transaction_id = %body.transaction_id,
                "Gateway charge approved"
            );
            return Ok(ChargeOutcome::Approved {
                transaction_id: body.transaction_id,
                rotated_billing_key: body.rotated_billing_key,
            });
        }

        if status.is_client_error() {
            let body: GatewayErrorResponse = response.json().await.map_err(|e| {
                record_gateway_charge("transport_error");
                GatewayError::Transport(format!("malformed decline body: {}", e))
            })?;

            record_gateway_charge("declined");
            warn!(
                reference = %request.reference,
                code = %body.code,
                "Gateway charge declined"
            );
            return Ok(ChargeOutcome::Declined {
                code: body.code,
                message: body.message,
            });
        }

        record_gateway_charge("transport_error");
        let text = response.text().await.unwrap_or_default();
        error!(
            reference = %request.reference,
            status = %status,
            "Gateway returned server error"
        );
        Err(GatewayError::Transport(format!(
            "gateway returned {}: {}",
            status, text
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> HttpPaymentGateway {
        HttpPaymentGateway::new(&GatewayConfig {
            api_base_url: server.uri(),
            key_id: "key_test".to_string(),
            key_secret: Secret::new("secret_test".to_string()),
            timeout_secs: 5,
        })
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            billing_key: "bk_123".to_string(),
            amount: Decimal::new(33000, 2),
            currency: "USD".to_string(),
            description: "Tutor Teachers renewal".to_string(),
            reference: "renewal-abc".to_string(),
        }
    }

    #[tokio::test]
    async fn approved_charge_returns_transaction_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/charges"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transaction_id": "txn_001",
                "status": "approved",
                "rotated_billing_key": "bk_456"
            })))
            .mount(&server)
            .await;

        let outcome = gateway_for(&server).charge(&request()).await.unwrap();
        assert_eq!(
            outcome,
            ChargeOutcome::Approved {
                transaction_id: "txn_001".to_string(),
                rotated_billing_key: Some("bk_456".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn decline_is_a_business_outcome_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/charges"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "code": "card_declined",
                "message": "Insufficient funds"
            })))
            .mount(&server)
            .await;

        let outcome = gateway_for(&server).charge(&request()).await.unwrap();
        assert_eq!(
            outcome,
            ChargeOutcome::Declined {
                code: "card_declined".to_string(),
                message: "Insufficient funds".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn server_error_is_a_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/charges"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = gateway_for(&server).charge(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn malformed_success_body_is_a_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/charges"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = gateway_for(&server).charge(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
