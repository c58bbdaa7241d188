use crate::gateways::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Midtrans,
    Doku,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Midtrans => "midtrans",
            GatewayName::Doku => "doku",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "midtrans" => Ok(GatewayName::Midtrans),
            "doku" => Ok(GatewayName::Doku),
            _ => Err(GatewayError::ValidationError {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// Internal transaction state. The four non-pending states are terminal:
/// once recorded, a later webhook carrying the same state is a no-op.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Expired,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            "success" => Some(TransactionStatus::Success),
            "failed" => Some(TransactionStatus::Failed),
            "expired" => Some(TransactionStatus::Expired),
            "refunded" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    /// Price in minor currency units.
    pub price: i64,
    pub quantity: u32,
}

impl LineItem {
    /// The synthetic single-line item used when a charge request carries no
    /// explicit item list.
    pub fn water_credit(amount: i64) -> Self {
        Self {
            id: "water-credit".to_string(),
            name: "Water Credit".to_string(),
            price: amount,
            quantity: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub order_id: String,
    /// Amount in minor currency units, never floating point.
    pub amount: i64,
    pub customer: CustomerDetails,
    pub payment_method: Option<String>,
    pub items: Vec<LineItem>,
    pub metadata: Option<JsonValue>,
}

impl ChargeRequest {
    /// Local validation performed before any network call.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.amount <= 0 {
            return Err(GatewayError::ValidationError {
                message: format!("amount must be greater than zero, got {}", self.amount),
                field: Some("amount".to_string()),
            });
        }
        if self.customer.name.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "customer name is required".to_string(),
                field: Some("customer.name".to_string()),
            });
        }
        if self.customer.email.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "customer email is required".to_string(),
                field: Some("customer.email".to_string()),
            });
        }
        Ok(())
    }

    /// Item lines to send to the gateway; defaults to a single synthetic
    /// "Water Credit" line priced at the full amount.
    pub fn effective_items(&self) -> Vec<LineItem> {
        if self.items.is_empty() {
            vec![LineItem::water_credit(self.amount)]
        } else {
            self.items.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub order_id: String,
    pub gateway_reference: Option<String>,
    pub status: TransactionStatus,
    pub payment_url: Option<String>,
    pub expires_at: Option<String>,
    pub raw_response: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOutcome {
    pub order_id: Option<String>,
    pub gateway_reference: Option<String>,
    pub status: TransactionStatus,
    pub amount: Option<i64>,
    pub raw_response: JsonValue,
}

/// Signature-relevant HTTP headers on an inbound notification. Midtrans
/// carries its signature inside the JSON body; DOKU uses these headers.
#[derive(Debug, Clone, Default)]
pub struct NotificationHeaders {
    pub client_id: Option<String>,
    pub request_id: Option<String>,
    pub request_timestamp: Option<String>,
    pub signature: Option<String>,
}

impl NotificationHeaders {
    pub fn has_doku_required(&self) -> bool {
        self.client_id.is_some()
            && self.request_id.is_some()
            && self.request_timestamp.is_some()
            && self.signature.is_some()
    }
}

/// One inbound webhook delivery, byte-exact.
#[derive(Debug, Clone)]
pub struct InboundNotification<'a> {
    pub payload: &'a [u8],
    pub headers: &'a NotificationHeaders,
    /// Request path the notification was delivered to, e.g.
    /// `/webhooks/payment/doku`. Part of the DOKU canonical string.
    pub request_target: &'a str,
}

pub const REASON_INVALID_SIGNATURE: &str = "invalid_signature";
pub const REASON_INVALID_CLIENT: &str = "invalid_client";
pub const REASON_INVALID_HEADERS: &str = "invalid_headers";

/// Result of signature verification. A mismatch is an expected outcome, not
/// an error; the caller decides permanent-reject vs retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

impl NotificationVerification {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub gateway: GatewayName,
    pub order_id: Option<String>,
    pub gateway_reference: Option<String>,
    pub status: TransactionStatus,
    /// Amount in minor units when the gateway reports one.
    pub amount: Option<i64>,
    pub payload: JsonValue,
    pub received_at: String,
}

/// Builds an internal order id: `INDO-` prefix, unix timestamp, and a
/// UUID-derived suffix so concurrent creations cannot collide.
pub fn new_order_id() -> String {
    let ts = chrono::Utc::now().timestamp();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("INDO-{}-{}", ts, &suffix[..8])
}

/// Parses a gateway amount string like `"100000"` or `"100000.00"` into
/// minor units without going through floating point. Returns `None` when the
/// fractional part is non-zero or the string is not numeric.
pub fn parse_gross_amount(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if !fraction.is_empty() && fraction.bytes().any(|b| b != b'0') {
        return None;
    }
    if whole.is_empty() {
        return None;
    }
    whole.parse::<i64>().ok()
}
