use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::error::DatabaseError;
use crate::database::payment_repository::TransactionRecord;
use crate::gateways::error::GatewayError;
use crate::gateways::factory::GatewayFactory;
use crate::gateways::types::{
    GatewayName, InboundNotification, NotificationEvent, TransactionStatus,
};
use async_trait::async_trait;

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    /// Signature or header verification rejected the delivery. Resending
    /// the same payload fails the same check, so this is never retried.
    #[error("Notification rejected: {reason}")]
    Rejected { reason: String },
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),
    /// The local order row may not have committed yet when the gateway's
    /// callback arrives, so a missing order is a transient condition.
    #[error("Order not found: {0}")]
    OrderNotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Gateway configuration error: {0}")]
    GatewayConfig(String),
}

impl WebhookProcessorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookProcessorError::Rejected { .. } => false,
            WebhookProcessorError::MalformedPayload(_) => false,
            WebhookProcessorError::UnknownGateway(_) => false,
            WebhookProcessorError::OrderNotFound(_) => true,
            WebhookProcessorError::Database(e) => e.is_retryable(),
            WebhookProcessorError::GatewayConfig(_) => false,
        }
    }
}

/// Result of the atomic apply step inside the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The row was already terminal when the lock was taken; nothing changed.
    AlreadyTerminal(TransactionStatus),
}

/// Persistence seam for transaction records. The Postgres implementation
/// lives in the database module; tests substitute an in-memory store.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;

    /// Must be atomic: status update and balance mutation commit together
    /// or not at all, under mutual exclusion on the record row.
    async fn apply_terminal_status(
        &self,
        order_id: &str,
        status: TransactionStatus,
        gateway_transaction_id: Option<&str>,
        raw_payload: &JsonValue,
    ) -> Result<ApplyOutcome, DatabaseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The record moved to a terminal status and any side effect was applied.
    Applied {
        order_id: String,
        status: TransactionStatus,
    },
    /// The record was already terminal; idempotent no-op.
    Duplicate {
        order_id: String,
        status: TransactionStatus,
    },
    /// The notification carried a non-terminal status; nothing to apply.
    Unchanged { order_id: String },
}

pub struct WebhookProcessor<S: PaymentStore> {
    store: Arc<S>,
    factory: Arc<GatewayFactory>,
}

impl<S: PaymentStore> WebhookProcessor<S> {
    pub fn new(store: Arc<S>, factory: Arc<GatewayFactory>) -> Self {
        Self { store, factory }
    }

    /// Handles a fresh inbound webhook: verify, parse, then apply.
    pub async fn process_notification(
        &self,
        gateway_name: &str,
        notification: &InboundNotification<'_>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let gateway = GatewayName::from_str(gateway_name)
            .map_err(|_| WebhookProcessorError::UnknownGateway(gateway_name.to_string()))?;
        let client = self
            .factory
            .get_gateway(gateway.clone())
            .map_err(|e| WebhookProcessorError::GatewayConfig(e.to_string()))?;

        let verification = client
            .verify_notification(notification)
            .map_err(map_gateway_error)?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "invalid_signature".to_string());
            warn!(gateway = %gateway, reason = %reason, "webhook verification failed");
            return Err(WebhookProcessorError::Rejected { reason });
        }

        let event = client
            .parse_notification(notification.payload)
            .map_err(map_gateway_error)?;
        self.apply_event(&event).await
    }

    /// Replays a previously stored delivery. Retryable failures only occur
    /// after verification succeeded, so the signature is not re-checked.
    pub async fn process_replay(
        &self,
        gateway: GatewayName,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let client = self
            .factory
            .get_gateway(gateway)
            .map_err(|e| WebhookProcessorError::GatewayConfig(e.to_string()))?;
        let event = client.parse_notification(payload).map_err(map_gateway_error)?;
        self.apply_event(&event).await
    }

    async fn apply_event(
        &self,
        event: &NotificationEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let order_id = event.order_id.as_deref().ok_or_else(|| {
            WebhookProcessorError::MalformedPayload(
                "notification carries no order id".to_string(),
            )
        })?;

        let record = self
            .store
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| WebhookProcessorError::OrderNotFound(order_id.to_string()))?;

        let current = record.transaction_status();
        if current.is_terminal() {
            if current != event.status {
                warn!(
                    order_id = %order_id,
                    recorded = %current,
                    incoming = %event.status,
                    "webhook for terminal order carries a different status, ignoring"
                );
            }
            return Ok(WebhookOutcome::Duplicate {
                order_id: order_id.to_string(),
                status: current,
            });
        }

        if !event.status.is_terminal() {
            return Ok(WebhookOutcome::Unchanged {
                order_id: order_id.to_string(),
            });
        }

        let outcome = self
            .store
            .apply_terminal_status(
                order_id,
                event.status,
                event.gateway_reference.as_deref(),
                &event.payload,
            )
            .await?;

        match outcome {
            ApplyOutcome::Applied => {
                info!(order_id = %order_id, status = %event.status, "webhook applied");
                Ok(WebhookOutcome::Applied {
                    order_id: order_id.to_string(),
                    status: event.status,
                })
            }
            // Lost the race against a concurrent delivery; the other one won.
            ApplyOutcome::AlreadyTerminal(status) => Ok(WebhookOutcome::Duplicate {
                order_id: order_id.to_string(),
                status,
            }),
        }
    }
}

fn map_gateway_error(error: GatewayError) -> WebhookProcessorError {
    match error {
        GatewayError::NotificationError { message } => {
            WebhookProcessorError::MalformedPayload(message)
        }
        GatewayError::ConfigError { message } => WebhookProcessorError::GatewayConfig(message),
        other => WebhookProcessorError::GatewayConfig(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::factory::{GatewayFactory, GatewayFactoryConfig};
    use crate::gateways::providers::{DokuConfig, MidtransConfig};
    use crate::gateways::signature::midtrans_signature;
    use crate::gateways::types::NotificationHeaders;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    const SERVER_KEY: &str = "SB-Mid-server-testkey";

    struct MemoryStore {
        records: Mutex<HashMap<String, TransactionRecord>>,
        balances: Mutex<HashMap<Uuid, i64>>,
        credit_applications: AtomicUsize,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                balances: Mutex::new(HashMap::new()),
                credit_applications: AtomicUsize::new(0),
            }
        }

        async fn insert_pending(&self, order_id: &str, amount: i64) -> Uuid {
            let customer_id = Uuid::new_v4();
            let record = TransactionRecord {
                id: Uuid::new_v4(),
                order_id: order_id.to_string(),
                customer_id,
                gateway: "midtrans".to_string(),
                gateway_transaction_id: None,
                amount,
                status: "pending".to_string(),
                raw_payload: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            };
            self.records
                .lock()
                .await
                .insert(order_id.to_string(), record);
            customer_id
        }

        async fn balance(&self, customer_id: Uuid) -> i64 {
            *self.balances.lock().await.get(&customer_id).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl PaymentStore for MemoryStore {
        async fn find_by_order_id(
            &self,
            order_id: &str,
        ) -> Result<Option<TransactionRecord>, DatabaseError> {
            Ok(self.records.lock().await.get(order_id).cloned())
        }

        async fn apply_terminal_status(
            &self,
            order_id: &str,
            status: TransactionStatus,
            gateway_transaction_id: Option<&str>,
            raw_payload: &JsonValue,
        ) -> Result<ApplyOutcome, DatabaseError> {
            // Holding the map lock across the whole apply mirrors the row
            // lock the Postgres implementation takes.
            let mut records = self.records.lock().await;
            let record = records.get_mut(order_id).ok_or_else(|| {
                DatabaseError::new(crate::database::error::DatabaseErrorKind::NotFound {
                    entity: "Transaction".to_string(),
                    id: order_id.to_string(),
                })
            })?;

            let current = record.transaction_status();
            if current.is_terminal() {
                return Ok(ApplyOutcome::AlreadyTerminal(current));
            }

            record.status = status.as_str().to_string();
            if record.gateway_transaction_id.is_none() {
                record.gateway_transaction_id = gateway_transaction_id.map(|v| v.to_string());
            }
            record.raw_payload = Some(raw_payload.clone());

            match status {
                TransactionStatus::Success => {
                    *self.balances.lock().await.entry(record.customer_id).or_insert(0) +=
                        record.amount;
                    self.credit_applications.fetch_add(1, Ordering::SeqCst);
                }
                TransactionStatus::Refunded => {
                    *self.balances.lock().await.entry(record.customer_id).or_insert(0) -=
                        record.amount;
                }
                _ => {}
            }

            Ok(ApplyOutcome::Applied)
        }
    }

    fn factory() -> Arc<GatewayFactory> {
        Arc::new(GatewayFactory::with_config(GatewayFactoryConfig {
            default_gateway: GatewayName::Midtrans,
            enabled_gateways: vec![GatewayName::Midtrans, GatewayName::Doku],
            midtrans: Some(MidtransConfig {
                server_key: SERVER_KEY.to_string(),
                ..MidtransConfig::default()
            }),
            doku: Some(DokuConfig {
                client_id: "BRN-0001-123".to_string(),
                secret_key: "SK-doku-test".to_string(),
                ..DokuConfig::default()
            }),
        }))
    }

    fn settlement_payload(order_id: &str, amount: &str) -> Vec<u8> {
        let signature = midtrans_signature(order_id, "200", amount, SERVER_KEY);
        serde_json::json!({
            "order_id": order_id,
            "status_code": "200",
            "gross_amount": amount,
            "transaction_status": "settlement",
            "transaction_id": "mid-txn-1",
            "signature_key": signature,
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn settlement_applies_credit_once() {
        let store = Arc::new(MemoryStore::new());
        let customer_id = store.insert_pending("INDO-1-abcd1234", 100_000).await;
        let processor = WebhookProcessor::new(store.clone(), factory());

        let payload = settlement_payload("INDO-1-abcd1234", "100000.00");
        let headers = NotificationHeaders::default();
        let notification = InboundNotification {
            payload: &payload,
            headers: &headers,
            request_target: "/webhooks/payment/midtrans",
        };

        let outcome = processor
            .process_notification("midtrans", &notification)
            .await
            .expect("first delivery should apply");
        assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
        assert_eq!(store.balance(customer_id).await, 100_000);

        // Identical replay is a no-op.
        let outcome = processor
            .process_notification("midtrans", &notification)
            .await
            .expect("replay should be accepted");
        assert!(matches!(
            outcome,
            WebhookOutcome::Duplicate {
                status: TransactionStatus::Success,
                ..
            }
        ));
        assert_eq!(store.balance(customer_id).await, 100_000);
        assert_eq!(store.credit_applications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_signature_is_permanent() {
        let store = Arc::new(MemoryStore::new());
        store.insert_pending("INDO-1-abcd1234", 100_000).await;
        let processor = WebhookProcessor::new(store, factory());

        let signature = midtrans_signature("INDO-1-abcd1234", "200", "100000.00", "wrong-key");
        let payload = serde_json::json!({
            "order_id": "INDO-1-abcd1234",
            "status_code": "200",
            "gross_amount": "100000.00",
            "transaction_status": "settlement",
            "signature_key": signature,
        })
        .to_string()
        .into_bytes();
        let headers = NotificationHeaders::default();

        let err = processor
            .process_notification(
                "midtrans",
                &InboundNotification {
                    payload: &payload,
                    headers: &headers,
                    request_target: "/webhooks/payment/midtrans",
                },
            )
            .await
            .expect_err("bad signature should be rejected");
        assert!(matches!(err, WebhookProcessorError::Rejected { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_doku_headers_is_permanent() {
        let store = Arc::new(MemoryStore::new());
        let processor = WebhookProcessor::new(store, factory());

        let payload = serde_json::json!({
            "order": {"invoice_number": "INDO-1-abcd1234", "amount": 100000},
            "transaction": {"status": "SUCCESS"},
        })
        .to_string()
        .into_bytes();
        let headers = NotificationHeaders::default();

        let err = processor
            .process_notification(
                "doku",
                &InboundNotification {
                    payload: &payload,
                    headers: &headers,
                    request_target: "/webhooks/payment/doku",
                },
            )
            .await
            .expect_err("missing headers should be rejected");
        match &err {
            WebhookProcessorError::Rejected { reason } => assert_eq!(reason, "invalid_headers"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_order_is_retryable() {
        let store = Arc::new(MemoryStore::new());
        let processor = WebhookProcessor::new(store, factory());

        let payload = settlement_payload("INDO-9-zzzz9999", "5000");
        let headers = NotificationHeaders::default();
        let err = processor
            .process_notification(
                "midtrans",
                &InboundNotification {
                    payload: &payload,
                    headers: &headers,
                    request_target: "/webhooks/payment/midtrans",
                },
            )
            .await
            .expect_err("missing order should fail");
        assert!(matches!(err, WebhookProcessorError::OrderNotFound(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_gateway_is_permanent() {
        let store = Arc::new(MemoryStore::new());
        let processor = WebhookProcessor::new(store, factory());
        let headers = NotificationHeaders::default();
        let err = processor
            .process_notification(
                "stripe",
                &InboundNotification {
                    payload: b"{}",
                    headers: &headers,
                    request_target: "/webhooks/payment/stripe",
                },
            )
            .await
            .expect_err("unknown gateway should fail");
        assert!(matches!(err, WebhookProcessorError::UnknownGateway(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn pending_notification_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let customer_id = store.insert_pending("INDO-1-abcd1234", 100_000).await;
        let processor = WebhookProcessor::new(store.clone(), factory());

        let signature = midtrans_signature("INDO-1-abcd1234", "201", "100000.00", SERVER_KEY);
        let payload = serde_json::json!({
            "order_id": "INDO-1-abcd1234",
            "status_code": "201",
            "gross_amount": "100000.00",
            "transaction_status": "pending",
            "signature_key": signature,
        })
        .to_string()
        .into_bytes();
        let headers = NotificationHeaders::default();

        let outcome = processor
            .process_notification(
                "midtrans",
                &InboundNotification {
                    payload: &payload,
                    headers: &headers,
                    request_target: "/webhooks/payment/midtrans",
                },
            )
            .await
            .expect("pending notification should be accepted");
        assert!(matches!(outcome, WebhookOutcome::Unchanged { .. }));
        assert_eq!(store.balance(customer_id).await, 0);
    }

    #[tokio::test]
    async fn concurrent_deliveries_credit_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let customer_id = store.insert_pending("INDO-1-abcd1234", 100_000).await;
        let processor = Arc::new(WebhookProcessor::new(store.clone(), factory()));

        let payload = settlement_payload("INDO-1-abcd1234", "100000.00");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let processor = processor.clone();
            let payload = payload.clone();
            handles.push(tokio::spawn(async move {
                processor
                    .process_replay(GatewayName::Midtrans, &payload)
                    .await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            match handle.await.expect("task should not panic") {
                Ok(WebhookOutcome::Applied { .. }) => applied += 1,
                Ok(WebhookOutcome::Duplicate { .. }) => {}
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(store.balance(customer_id).await, 100_000);
        assert_eq!(store.credit_applications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refund_reverses_a_prior_credit() {
        let store = Arc::new(MemoryStore::new());
        let customer_id = store.insert_pending("INDO-1-abcd1234", 100_000).await;
        // Credit from an earlier settlement reported out of band.
        store.balances.lock().await.insert(customer_id, 100_000);
        let processor = WebhookProcessor::new(store.clone(), factory());

        let signature = midtrans_signature("INDO-1-abcd1234", "200", "100000.00", SERVER_KEY);
        let payload = serde_json::json!({
            "order_id": "INDO-1-abcd1234",
            "status_code": "200",
            "gross_amount": "100000.00",
            "transaction_status": "refund",
            "signature_key": signature,
        })
        .to_string()
        .into_bytes();

        let outcome = processor
            .process_replay(GatewayName::Midtrans, &payload)
            .await
            .expect("refund should apply");
        assert!(matches!(
            outcome,
            WebhookOutcome::Applied {
                status: TransactionStatus::Refunded,
                ..
            }
        ));
        assert_eq!(store.balance(customer_id).await, 0);
    }
}
