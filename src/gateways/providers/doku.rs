use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::GatewayClient;
use crate::gateways::signature::{doku_signature, verify_doku, DokuSignatureComponents};
use crate::gateways::status::{is_known_doku_status, map_doku_status};
use crate::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, InboundNotification, NotificationEvent,
    NotificationVerification, StatusOutcome, TransactionStatus, REASON_INVALID_CLIENT,
    REASON_INVALID_HEADERS, REASON_INVALID_SIGNATURE,
};
use crate::gateways::utils::GatewayHttpClient;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const DOKU_SANDBOX_URL: &str = "https://api-sandbox.doku.com";
pub const DOKU_PRODUCTION_URL: &str = "https://api.doku.com";

const PAYMENT_METHODS: &[&str] = &[
    "virtual_account",
    "credit_card",
    "qris",
    "e_wallet",
    "retail_outlet",
];

#[derive(Debug, Clone)]
pub struct DokuConfig {
    pub client_id: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for DokuConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            secret_key: String::new(),
            base_url: DOKU_SANDBOX_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl DokuConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let client_id = std::env::var("DOKU_CLIENT_ID").map_err(|_| GatewayError::ConfigError {
            message: "DOKU_CLIENT_ID environment variable is required".to_string(),
        })?;
        let secret_key =
            std::env::var("DOKU_SECRET_KEY").map_err(|_| GatewayError::ConfigError {
                message: "DOKU_SECRET_KEY environment variable is required".to_string(),
            })?;

        let is_production = std::env::var("DOKU_IS_PRODUCTION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let default_url = if is_production {
            DOKU_PRODUCTION_URL
        } else {
            DOKU_SANDBOX_URL
        };

        Ok(Self {
            base_url: std::env::var("DOKU_BASE_URL").unwrap_or_else(|_| default_url.to_string()),
            timeout_secs: std::env::var("DOKU_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("DOKU_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            client_id,
            secret_key,
        })
    }

    pub fn from_settings(secrets: &JsonValue, environment: &str) -> GatewayResult<Self> {
        let field = |name: &str| -> GatewayResult<String> {
            secrets
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.to_string())
                .ok_or(GatewayError::ConfigError {
                    message: format!("doku credential is missing {}", name),
                })
        };

        let default_url = if environment == "production" {
            DOKU_PRODUCTION_URL
        } else {
            DOKU_SANDBOX_URL
        };

        Ok(Self {
            client_id: field("client_id")?,
            secret_key: field("secret_key")?,
            base_url: secrets
                .get("base_url")
                .and_then(|v| v.as_str())
                .unwrap_or(default_url)
                .to_string(),
            ..Self::default()
        })
    }
}

pub struct DokuGateway {
    config: DokuConfig,
    http: GatewayHttpClient,
}

impl DokuGateway {
    pub fn new(config: DokuConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(DokuConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Headers for an outbound call, signed over the request target and
    /// serialized body per the gateway's header scheme.
    fn signed_headers(&self, request_target: &str, body: Option<&[u8]>) -> Vec<(&'static str, String)> {
        let request_id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let signature = doku_signature(
            &DokuSignatureComponents {
                client_id: &self.config.client_id,
                request_id: &request_id,
                request_timestamp: &timestamp,
                request_target,
                body,
            },
            &self.config.secret_key,
        );

        vec![
            ("Client-Id", self.config.client_id.clone()),
            ("Request-Id", request_id),
            ("Request-Timestamp", timestamp),
            ("Signature", signature),
            ("Content-Type", "application/json".to_string()),
        ]
    }

    fn map_status_logged(&self, raw: &str, order_id: Option<&str>) -> TransactionStatus {
        if !is_known_doku_status(raw) {
            warn!(
                gateway = "doku",
                raw_status = raw,
                order_id = order_id.unwrap_or("unknown"),
                "unrecognized gateway status, treating as pending"
            );
        }
        map_doku_status(raw)
    }

    fn outcome_from_status_body(&self, body: JsonValue) -> StatusOutcome {
        let order_id = body
            .pointer("/order/invoice_number")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let raw_status = body
            .pointer("/transaction/status")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let status = self.map_status_logged(raw_status, order_id.as_deref());

        StatusOutcome {
            gateway_reference: body
                .pointer("/transaction/id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            amount: extract_amount(&body),
            order_id,
            status,
            raw_response: body,
        }
    }
}

fn extract_amount(body: &JsonValue) -> Option<i64> {
    match body.pointer("/order/amount") {
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) => crate::gateways::types::parse_gross_amount(s),
        _ => None,
    }
}

#[async_trait]
impl GatewayClient for DokuGateway {
    async fn create_transaction(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        request.validate()?;
        if let Some(method) = request.payment_method.as_deref() {
            if !PAYMENT_METHODS.contains(&method) {
                return Err(GatewayError::ValidationError {
                    message: format!("payment method '{}' is not supported by doku", method),
                    field: Some("payment_method".to_string()),
                });
            }
        }

        let line_items: Vec<JsonValue> = request
            .effective_items()
            .iter()
            .map(|item| {
                serde_json::json!({
                    "name": item.name,
                    "price": item.price,
                    "quantity": item.quantity,
                })
            })
            .collect();

        let payload = serde_json::json!({
            "order": {
                "invoice_number": request.order_id,
                "amount": request.amount,
                "line_items": line_items,
            },
            "customer": {
                "name": request.customer.name,
                "email": request.customer.email,
                "phone": request.customer.phone,
            },
            "additional_info": request.metadata,
        });
        let body_bytes = serde_json::to_vec(&payload).map_err(|e| GatewayError::ValidationError {
            message: format!("failed to serialize charge payload: {}", e),
            field: None,
        })?;

        let path = "/checkout/v1/payment";
        let headers = self.signed_headers(path, Some(&body_bytes));

        let body: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                None,
                Some(&payload),
                &headers,
            )
            .await?;

        info!(order_id = %request.order_id, "doku transaction created");

        Ok(ChargeOutcome {
            order_id: request.order_id,
            gateway_reference: body
                .pointer("/response/payment/token_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            status: TransactionStatus::Pending,
            payment_url: body
                .pointer("/response/payment/url")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            expires_at: body
                .pointer("/response/payment/expired_date")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            raw_response: body,
        })
    }

    async fn get_transaction_status(&self, order_id: &str) -> GatewayResult<StatusOutcome> {
        let path = format!("/orders/v1/status/{}", order_id);
        let headers = self.signed_headers(&path, None);
        let body: JsonValue = self
            .http
            .request_json(reqwest::Method::GET, &self.endpoint(&path), None, None, &headers)
            .await?;
        Ok(self.outcome_from_status_body(body))
    }

    async fn cancel_transaction(&self, order_id: &str) -> GatewayResult<StatusOutcome> {
        let path = format!("/orders/v1/cancel/{}", order_id);
        let headers = self.signed_headers(&path, None);
        let body: JsonValue = self
            .http
            .request_json(reqwest::Method::POST, &self.endpoint(&path), None, None, &headers)
            .await?;
        Ok(self.outcome_from_status_body(body))
    }

    fn verify_notification(
        &self,
        notification: &InboundNotification<'_>,
    ) -> GatewayResult<NotificationVerification> {
        let headers = notification.headers;
        if !headers.has_doku_required() {
            return Ok(NotificationVerification::rejected(REASON_INVALID_HEADERS));
        }
        // has_doku_required guarantees these are present.
        let (client_id, request_id, request_timestamp, signature) = match (
            headers.client_id.as_deref(),
            headers.request_id.as_deref(),
            headers.request_timestamp.as_deref(),
            headers.signature.as_deref(),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Ok(NotificationVerification::rejected(REASON_INVALID_HEADERS)),
        };

        if client_id != self.config.client_id {
            return Ok(NotificationVerification::rejected(REASON_INVALID_CLIENT));
        }

        let components = DokuSignatureComponents {
            client_id,
            request_id,
            request_timestamp,
            request_target: notification.request_target,
            body: Some(notification.payload),
        };
        if verify_doku(signature, &components, &self.config.secret_key) {
            Ok(NotificationVerification::ok())
        } else {
            Ok(NotificationVerification::rejected(REASON_INVALID_SIGNATURE))
        }
    }

    fn parse_notification(&self, payload: &[u8]) -> GatewayResult<NotificationEvent> {
        let body: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::NotificationError {
                message: format!("invalid doku notification JSON: {}", e),
            })?;

        let order_id = body
            .pointer("/order/invoice_number")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let raw_status = body
            .pointer("/transaction/status")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let status = self.map_status_logged(raw_status, order_id.as_deref());

        Ok(NotificationEvent {
            gateway: GatewayName::Doku,
            gateway_reference: body
                .pointer("/transaction/id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            amount: extract_amount(&body),
            order_id,
            status,
            payload: body,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn name(&self) -> GatewayName {
        GatewayName::Doku
    }

    fn payment_methods(&self) -> &'static [&'static str] {
        PAYMENT_METHODS
    }

    fn required_config_fields(&self) -> &'static [&'static str] {
        &["client_id", "secret_key"]
    }

    fn validate_config(&self) -> GatewayResult<()> {
        for (field, value) in [
            ("client_id", &self.config.client_id),
            ("secret_key", &self.config.secret_key),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::ConfigError {
                    message: format!("doku {} is not configured", field),
                });
            }
        }
        Ok(())
    }
}
