use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::GatewayClient;
use crate::gateways::signature::verify_midtrans;
use crate::gateways::status::{is_known_midtrans_status, map_midtrans_status};
use crate::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, InboundNotification, NotificationEvent,
    NotificationVerification, StatusOutcome, TransactionStatus, REASON_INVALID_SIGNATURE,
};
use crate::gateways::utils::GatewayHttpClient;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const MIDTRANS_SANDBOX_URL: &str = "https://api.sandbox.midtrans.com";
pub const MIDTRANS_PRODUCTION_URL: &str = "https://api.midtrans.com";

const PAYMENT_METHODS: &[&str] = &[
    "credit_card",
    "bank_transfer",
    "echannel",
    "gopay",
    "shopeepay",
    "qris",
    "cstore",
];

#[derive(Debug, Clone)]
pub struct MidtransConfig {
    pub server_key: String,
    pub client_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for MidtransConfig {
    fn default() -> Self {
        Self {
            server_key: String::new(),
            client_key: None,
            base_url: MIDTRANS_SANDBOX_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl MidtransConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let server_key =
            std::env::var("MIDTRANS_SERVER_KEY").map_err(|_| GatewayError::ConfigError {
                message: "MIDTRANS_SERVER_KEY environment variable is required".to_string(),
            })?;

        let is_production = std::env::var("MIDTRANS_IS_PRODUCTION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let default_url = if is_production {
            MIDTRANS_PRODUCTION_URL
        } else {
            MIDTRANS_SANDBOX_URL
        };

        Ok(Self {
            client_key: std::env::var("MIDTRANS_CLIENT_KEY").ok(),
            base_url: std::env::var("MIDTRANS_BASE_URL")
                .unwrap_or_else(|_| default_url.to_string()),
            timeout_secs: std::env::var("MIDTRANS_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("MIDTRANS_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            server_key,
        })
    }

    /// Builds a config from stored credential secrets. `environment` selects
    /// the base URL unless the secrets carry an explicit `base_url`.
    pub fn from_settings(secrets: &JsonValue, environment: &str) -> GatewayResult<Self> {
        let server_key = secrets
            .get("server_key")
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .ok_or(GatewayError::ConfigError {
                message: "midtrans credential is missing server_key".to_string(),
            })?
            .to_string();

        let default_url = if environment == "production" {
            MIDTRANS_PRODUCTION_URL
        } else {
            MIDTRANS_SANDBOX_URL
        };

        Ok(Self {
            server_key,
            client_key: secrets
                .get("client_key")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            base_url: secrets
                .get("base_url")
                .and_then(|v| v.as_str())
                .unwrap_or(default_url)
                .to_string(),
            ..Self::default()
        })
    }
}

pub struct MidtransGateway {
    config: MidtransConfig,
    http: GatewayHttpClient,
}

impl MidtransGateway {
    pub fn new(config: MidtransConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(MidtransConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn map_status_logged(&self, raw: &str, order_id: Option<&str>) -> TransactionStatus {
        if !is_known_midtrans_status(raw) {
            warn!(
                gateway = "midtrans",
                raw_status = raw,
                order_id = order_id.unwrap_or("unknown"),
                "unrecognized gateway status, treating as pending"
            );
        }
        map_midtrans_status(raw)
    }

    fn outcome_from_status_body(&self, body: JsonValue) -> StatusOutcome {
        let order_id = body
            .get("order_id")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let raw_status = body
            .get("transaction_status")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let status = self.map_status_logged(raw_status, order_id.as_deref());

        StatusOutcome {
            gateway_reference: body
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            amount: body
                .get("gross_amount")
                .and_then(|v| v.as_str())
                .and_then(crate::gateways::types::parse_gross_amount),
            order_id,
            status,
            raw_response: body,
        }
    }
}

#[async_trait]
impl GatewayClient for MidtransGateway {
    async fn create_transaction(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        request.validate()?;
        if let Some(method) = request.payment_method.as_deref() {
            if !PAYMENT_METHODS.contains(&method) {
                return Err(GatewayError::ValidationError {
                    message: format!("payment method '{}' is not supported by midtrans", method),
                    field: Some("payment_method".to_string()),
                });
            }
        }

        let items: Vec<JsonValue> = request
            .effective_items()
            .iter()
            .map(|item| {
                serde_json::json!({
                    "id": item.id,
                    "name": item.name,
                    "price": item.price,
                    "quantity": item.quantity,
                })
            })
            .collect();

        let payload = serde_json::json!({
            "payment_type": request.payment_method.as_deref().unwrap_or("bank_transfer"),
            "transaction_details": {
                "order_id": request.order_id,
                "gross_amount": request.amount,
            },
            "item_details": items,
            "customer_details": {
                "first_name": request.customer.name,
                "email": request.customer.email,
                "phone": request.customer.phone,
            },
            "metadata": request.metadata,
        });

        let body: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/charge"),
                Some(&self.config.server_key),
                Some(&payload),
                &[
                    ("Accept", "application/json".to_string()),
                    ("Content-Type", "application/json".to_string()),
                ],
            )
            .await?;

        // Midtrans reports application-level rejection via status_code even
        // on HTTP 200 responses.
        let status_code = body
            .get("status_code")
            .and_then(|v| v.as_str())
            .unwrap_or("200");
        if !status_code.starts_with('2') {
            return Err(GatewayError::GatewayRejected {
                gateway: "midtrans".to_string(),
                message: body
                    .get("status_message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("charge rejected")
                    .to_string(),
                gateway_code: Some(status_code.to_string()),
                retryable: status_code.starts_with('5'),
            });
        }

        let raw_status = body
            .get("transaction_status")
            .and_then(|v| v.as_str())
            .unwrap_or("pending");
        let status = self.map_status_logged(raw_status, Some(&request.order_id));
        info!(order_id = %request.order_id, "midtrans transaction created");

        Ok(ChargeOutcome {
            order_id: request.order_id,
            gateway_reference: body
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            status,
            payment_url: body
                .get("redirect_url")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            expires_at: body
                .get("expiry_time")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            raw_response: body,
        })
    }

    async fn get_transaction_status(&self, order_id: &str) -> GatewayResult<StatusOutcome> {
        let body: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v2/{}/status", order_id)),
                Some(&self.config.server_key),
                None,
                &[("Accept", "application/json".to_string())],
            )
            .await?;
        Ok(self.outcome_from_status_body(body))
    }

    async fn cancel_transaction(&self, order_id: &str) -> GatewayResult<StatusOutcome> {
        let body: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/{}/cancel", order_id)),
                Some(&self.config.server_key),
                None,
                &[("Accept", "application/json".to_string())],
            )
            .await?;
        Ok(self.outcome_from_status_body(body))
    }

    fn verify_notification(
        &self,
        notification: &InboundNotification<'_>,
    ) -> GatewayResult<NotificationVerification> {
        let body: JsonValue = serde_json::from_slice(notification.payload).map_err(|e| {
            GatewayError::NotificationError {
                message: format!("invalid midtrans notification JSON: {}", e),
            }
        })?;

        let field = |name: &str| -> GatewayResult<String> {
            body.get(name)
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
                .ok_or(GatewayError::NotificationError {
                    message: format!("midtrans notification is missing {}", name),
                })
        };

        let order_id = field("order_id")?;
        let status_code = field("status_code")?;
        let gross_amount = field("gross_amount")?;
        let signature_key = field("signature_key")?;

        if verify_midtrans(
            &signature_key,
            &order_id,
            &status_code,
            &gross_amount,
            &self.config.server_key,
        ) {
            Ok(NotificationVerification::ok())
        } else {
            Ok(NotificationVerification::rejected(REASON_INVALID_SIGNATURE))
        }
    }

    fn parse_notification(&self, payload: &[u8]) -> GatewayResult<NotificationEvent> {
        let body: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::NotificationError {
                message: format!("invalid midtrans notification JSON: {}", e),
            })?;

        let order_id = body
            .get("order_id")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let raw_status = body
            .get("transaction_status")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let status = self.map_status_logged(raw_status, order_id.as_deref());

        Ok(NotificationEvent {
            gateway: GatewayName::Midtrans,
            gateway_reference: body
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            amount: body
                .get("gross_amount")
                .and_then(|v| v.as_str())
                .and_then(crate::gateways::types::parse_gross_amount),
            order_id,
            status,
            payload: body,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn name(&self) -> GatewayName {
        GatewayName::Midtrans
    }

    fn payment_methods(&self) -> &'static [&'static str] {
        PAYMENT_METHODS
    }

    fn required_config_fields(&self) -> &'static [&'static str] {
        &["server_key"]
    }

    fn validate_config(&self) -> GatewayResult<()> {
        if self.config.server_key.trim().is_empty() {
            return Err(GatewayError::ConfigError {
                message: "midtrans server_key is not configured".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::signature::midtrans_signature;
    use crate::gateways::types::NotificationHeaders;

    fn gateway() -> MidtransGateway {
        MidtransGateway::new(MidtransConfig {
            server_key: "SB-Mid-server-testkey".to_string(),
            client_key: None,
            base_url: MIDTRANS_SANDBOX_URL.to_string(),
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("gateway init should succeed")
    }

    fn signed_payload(server_key: &str) -> Vec<u8> {
        let signature = midtrans_signature("INDO-1-abcd1234", "200", "100000.00", server_key);
        serde_json::json!({
            "order_id": "INDO-1-abcd1234",
            "status_code": "200",
            "gross_amount": "100000.00",
            "transaction_status": "settlement",
            "transaction_id": "mid-txn-1",
            "signature_key": signature,
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_correctly_signed_notification() {
        let gateway = gateway();
        let payload = signed_payload("SB-Mid-server-testkey");
        let headers = NotificationHeaders::default();
        let result = gateway
            .verify_notification(&InboundNotification {
                payload: &payload,
                headers: &headers,
                request_target: "/webhooks/payment/midtrans",
            })
            .expect("verification should not error");
        assert!(result.valid);
    }

    #[test]
    fn rejects_notification_signed_with_wrong_key() {
        let gateway = gateway();
        let payload = signed_payload("some-other-key");
        let headers = NotificationHeaders::default();
        let result = gateway
            .verify_notification(&InboundNotification {
                payload: &payload,
                headers: &headers,
                request_target: "/webhooks/payment/midtrans",
            })
            .expect("verification should not error");
        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some(REASON_INVALID_SIGNATURE));
    }

    #[test]
    fn missing_signature_field_is_a_permanent_error() {
        let gateway = gateway();
        let payload = br#"{"order_id":"INDO-1-abcd1234","status_code":"200","gross_amount":"1"}"#;
        let headers = NotificationHeaders::default();
        let result = gateway.verify_notification(&InboundNotification {
            payload,
            headers: &headers,
            request_target: "/webhooks/payment/midtrans",
        });
        assert!(matches!(
            result,
            Err(GatewayError::NotificationError { .. })
        ));
    }

    #[test]
    fn parses_settlement_notification() {
        let gateway = gateway();
        let payload = signed_payload("SB-Mid-server-testkey");
        let event = gateway
            .parse_notification(&payload)
            .expect("parse should succeed");
        assert_eq!(event.gateway, GatewayName::Midtrans);
        assert_eq!(event.order_id.as_deref(), Some("INDO-1-abcd1234"));
        assert_eq!(event.status, TransactionStatus::Success);
        assert_eq!(event.amount, Some(100_000));
    }

    #[tokio::test]
    async fn rejects_unsupported_payment_method_locally() {
        let gateway = gateway();
        let err = gateway
            .create_transaction(ChargeRequest {
                order_id: "INDO-1-abcd1234".to_string(),
                amount: 50_000,
                customer: crate::gateways::types::CustomerDetails {
                    name: "Budi Santoso".to_string(),
                    email: "budi@example.com".to_string(),
                    phone: None,
                },
                payment_method: Some("paypal".to_string()),
                items: vec![],
                metadata: None,
            })
            .await
            .expect_err("unsupported method should fail before any network call");
        assert!(matches!(err, GatewayError::ValidationError { .. }));
    }

    #[test]
    fn settings_config_requires_server_key() {
        let err = MidtransConfig::from_settings(&serde_json::json!({}), "sandbox")
            .expect_err("missing server_key should fail");
        assert!(matches!(err, GatewayError::ConfigError { .. }));

        let cfg = MidtransConfig::from_settings(
            &serde_json::json!({"server_key": "sk", "client_key": "ck"}),
            "production",
        )
        .expect("config should build");
        assert_eq!(cfg.base_url, MIDTRANS_PRODUCTION_URL);
    }
}
