use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::error::DbResult;
use crate::database::webhook_retry_repository::{DeliveryAttempt, NewDeliveryAttempt, RetryStats};
use crate::gateways::types::GatewayName;
use crate::services::webhook_processor::{PaymentStore, WebhookProcessor};

/// Persistence seam for delivery attempts. The Postgres implementation
/// lives in the database module; tests substitute an in-memory store.
#[async_trait]
pub trait RetryStore: Send + Sync {
    async fn record_failure(&self, new: NewDeliveryAttempt) -> DbResult<DeliveryAttempt>;

    /// Claims due rows so overlapping scheduler runs never replay the same
    /// delivery concurrently.
    async fn claim_due(&self, limit: i64) -> DbResult<Vec<DeliveryAttempt>>;

    async fn complete(&self, id: Uuid) -> DbResult<()>;

    async fn reschedule(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        failure_reason: &str,
    ) -> DbResult<()>;

    async fn mark_dead(&self, id: Uuid) -> DbResult<()>;

    async fn stats(&self) -> DbResult<RetryStats>;

    async fn clear_all(&self) -> DbResult<u64>;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
    pub batch_size: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_delay_secs: 3600,
            max_attempts: 10,
            batch_size: 50,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_delay_secs: std::env::var("WEBHOOK_RETRY_BASE_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.base_delay_secs),
            max_delay_secs: std::env::var("WEBHOOK_RETRY_MAX_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_delay_secs),
            max_attempts: std::env::var("WEBHOOK_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            batch_size: std::env::var("WEBHOOK_RETRY_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_size),
        }
    }

    /// Exponential backoff with a hard cap: min(base * 2^(attempt-1), max).
    pub fn backoff_delay_secs(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_secs.saturating_mul(1u64 << exponent);
        delay.min(self.max_delay_secs)
    }
}

/// Counts from one `process_pending_retries` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryRunReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
}

impl RetryRunReport {
    pub fn had_failures(&self) -> bool {
        self.rescheduled > 0 || self.dead_lettered > 0
    }
}

pub struct WebhookRetryService<S: PaymentStore, R: RetryStore> {
    processor: Arc<WebhookProcessor<S>>,
    store: Arc<R>,
    config: RetryConfig,
}

impl<S: PaymentStore, R: RetryStore> WebhookRetryService<S, R> {
    pub fn new(processor: Arc<WebhookProcessor<S>>, store: Arc<R>, config: RetryConfig) -> Self {
        Self {
            processor,
            store,
            config,
        }
    }

    /// Persists a retryable delivery with attempt count 1 and the first
    /// backoff delay already applied.
    pub async fn record_failure(
        &self,
        gateway: GatewayName,
        payload: &[u8],
        order_id: Option<&str>,
        reason: &str,
    ) -> DbResult<DeliveryAttempt> {
        let next_retry_at =
            Utc::now() + ChronoDuration::seconds(self.config.backoff_delay_secs(1) as i64);
        let attempt = self
            .store
            .record_failure(NewDeliveryAttempt {
                order_id: order_id.map(|v| v.to_string()),
                gateway,
                payload: payload.to_vec(),
                failure_reason: reason.to_string(),
                next_retry_at,
            })
            .await?;

        info!(
            delivery_id = %attempt.id,
            gateway = %attempt.gateway,
            next_retry_at = %attempt.next_retry_at,
            "webhook delivery queued for retry"
        );
        Ok(attempt)
    }

    /// Replays every due delivery once. Finite unit of work, meant for a
    /// periodic trigger.
    pub async fn process_pending_retries(&self) -> DbResult<RetryRunReport> {
        let due = self.store.claim_due(self.config.batch_size).await?;
        let mut report = RetryRunReport {
            claimed: due.len(),
            ..RetryRunReport::default()
        };

        for attempt in due {
            let Some(gateway) = attempt.gateway_name() else {
                warn!(delivery_id = %attempt.id, gateway = %attempt.gateway,
                    "stored delivery names an unknown gateway, dead-lettering");
                self.store.mark_dead(attempt.id).await?;
                report.dead_lettered += 1;
                continue;
            };

            match self.processor.process_replay(gateway, &attempt.payload).await {
                Ok(_) => {
                    self.store.complete(attempt.id).await?;
                    report.succeeded += 1;
                }
                Err(e) if e.is_retryable() => {
                    let attempt_count = attempt.attempt_count + 1;
                    if attempt_count as u32 >= self.config.max_attempts {
                        warn!(
                            delivery_id = %attempt.id,
                            attempts = attempt_count,
                            "retry budget exhausted, dead-lettering"
                        );
                        self.store.mark_dead(attempt.id).await?;
                        report.dead_lettered += 1;
                    } else {
                        let delay =
                            self.config.backoff_delay_secs(attempt_count as u32) as i64;
                        self.store
                            .reschedule(
                                attempt.id,
                                attempt_count,
                                Utc::now() + ChronoDuration::seconds(delay),
                                &e.to_string(),
                            )
                            .await?;
                        report.rescheduled += 1;
                    }
                }
                Err(e) => {
                    // A permanent failure will fail the same way forever.
                    warn!(delivery_id = %attempt.id, error = %e,
                        "replay failed permanently, dead-lettering");
                    self.store.mark_dead(attempt.id).await?;
                    report.dead_lettered += 1;
                }
            }
        }

        info!(
            claimed = report.claimed,
            succeeded = report.succeeded,
            rescheduled = report.rescheduled,
            dead_lettered = report.dead_lettered,
            "retry run finished"
        );
        Ok(report)
    }

    pub async fn retry_stats(&self) -> DbResult<RetryStats> {
        self.store.stats().await
    }

    pub async fn clear_all_retries(&self) -> DbResult<u64> {
        self.store.clear_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseError;
    use crate::database::payment_repository::TransactionRecord;
    use crate::gateways::factory::{GatewayFactory, GatewayFactoryConfig};
    use crate::gateways::providers::MidtransConfig;
    use crate::gateways::signature::midtrans_signature;
    use crate::gateways::types::TransactionStatus;
    use crate::services::webhook_processor::{ApplyOutcome, PaymentStore};
    use serde_json::Value as JsonValue;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    const SERVER_KEY: &str = "SB-Mid-server-testkey";

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let config = RetryConfig {
            base_delay_secs: 60,
            max_delay_secs: 3600,
            max_attempts: 10,
            batch_size: 50,
        };

        let mut previous = 0;
        for attempt in 1..=12 {
            let delay = config.backoff_delay_secs(attempt);
            assert!(delay >= previous, "delay must be non-decreasing");
            assert!(delay <= 3600, "delay must respect the cap");
            previous = delay;
        }
        assert_eq!(config.backoff_delay_secs(1), 60);
        assert_eq!(config.backoff_delay_secs(2), 120);
        assert_eq!(config.backoff_delay_secs(7), 3600);
    }

    struct MemoryRetryStore {
        attempts: Mutex<HashMap<Uuid, DeliveryAttempt>>,
    }

    impl MemoryRetryStore {
        fn new() -> Self {
            Self {
                attempts: Mutex::new(HashMap::new()),
            }
        }

        async fn get(&self, id: Uuid) -> Option<DeliveryAttempt> {
            self.attempts.lock().await.get(&id).cloned()
        }
    }

    #[async_trait]
    impl RetryStore for MemoryRetryStore {
        async fn record_failure(&self, new: NewDeliveryAttempt) -> DbResult<DeliveryAttempt> {
            let attempt = DeliveryAttempt {
                id: Uuid::new_v4(),
                order_id: new.order_id,
                gateway: new.gateway.as_str().to_string(),
                payload: new.payload,
                failure_reason: new.failure_reason,
                attempt_count: 1,
                next_retry_at: new.next_retry_at,
                is_dead: false,
                claimed_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.attempts.lock().await.insert(attempt.id, attempt.clone());
            Ok(attempt)
        }

        async fn claim_due(&self, limit: i64) -> DbResult<Vec<DeliveryAttempt>> {
            let now = Utc::now();
            let mut attempts = self.attempts.lock().await;
            let mut due: Vec<DeliveryAttempt> = attempts
                .values()
                .filter(|a| !a.is_dead && a.next_retry_at <= now && a.claimed_at.is_none())
                .take(limit as usize)
                .cloned()
                .collect();
            due.sort_by_key(|a| a.next_retry_at);
            for attempt in &due {
                if let Some(stored) = attempts.get_mut(&attempt.id) {
                    stored.claimed_at = Some(now);
                }
            }
            Ok(due)
        }

        async fn complete(&self, id: Uuid) -> DbResult<()> {
            self.attempts.lock().await.remove(&id);
            Ok(())
        }

        async fn reschedule(
            &self,
            id: Uuid,
            attempt_count: i32,
            next_retry_at: DateTime<Utc>,
            failure_reason: &str,
        ) -> DbResult<()> {
            if let Some(attempt) = self.attempts.lock().await.get_mut(&id) {
                attempt.attempt_count = attempt_count;
                attempt.next_retry_at = next_retry_at;
                attempt.failure_reason = failure_reason.to_string();
                attempt.claimed_at = None;
            }
            Ok(())
        }

        async fn mark_dead(&self, id: Uuid) -> DbResult<()> {
            if let Some(attempt) = self.attempts.lock().await.get_mut(&id) {
                attempt.is_dead = true;
                attempt.claimed_at = None;
            }
            Ok(())
        }

        async fn stats(&self) -> DbResult<RetryStats> {
            let attempts = self.attempts.lock().await;
            let mut stats = RetryStats::default();
            for attempt in attempts.values() {
                if attempt.is_dead {
                    stats.total_dead += 1;
                } else {
                    stats.total_pending += 1;
                }
            }
            Ok(stats)
        }

        async fn clear_all(&self) -> DbResult<u64> {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.len() as u64;
            attempts.clear();
            Ok(count)
        }
    }

    struct MemoryPaymentStore {
        records: Mutex<HashMap<String, TransactionRecord>>,
    }

    impl MemoryPaymentStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
            }
        }

        async fn insert_pending(&self, order_id: &str, amount: i64) {
            let record = TransactionRecord {
                id: Uuid::new_v4(),
                order_id: order_id.to_string(),
                customer_id: Uuid::new_v4(),
                gateway: "midtrans".to_string(),
                gateway_transaction_id: None,
                amount,
                status: "pending".to_string(),
                raw_payload: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.records
                .lock()
                .await
                .insert(order_id.to_string(), record);
        }
    }

    #[async_trait]
    impl PaymentStore for MemoryPaymentStore {
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
            _gateway_transaction_id: Option<&str>,
            _raw_payload: &JsonValue,
        ) -> Result<ApplyOutcome, DatabaseError> {
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
            Ok(ApplyOutcome::Applied)
        }
    }

    fn factory() -> Arc<GatewayFactory> {
        Arc::new(GatewayFactory::with_config(GatewayFactoryConfig {
            default_gateway: GatewayName::Midtrans,
            enabled_gateways: vec![GatewayName::Midtrans],
            midtrans: Some(MidtransConfig {
                server_key: SERVER_KEY.to_string(),
                ..MidtransConfig::default()
            }),
            doku: None,
        }))
    }

    fn settlement_payload(order_id: &str) -> Vec<u8> {
        let signature = midtrans_signature(order_id, "200", "50000", SERVER_KEY);
        serde_json::json!({
            "order_id": order_id,
            "status_code": "200",
            "gross_amount": "50000",
            "transaction_status": "settlement",
            "signature_key": signature,
        })
        .to_string()
        .into_bytes()
    }

    fn service(
        payments: Arc<MemoryPaymentStore>,
        retries: Arc<MemoryRetryStore>,
        config: RetryConfig,
    ) -> WebhookRetryService<MemoryPaymentStore, MemoryRetryStore> {
        let processor = Arc::new(WebhookProcessor::new(payments, factory()));
        WebhookRetryService::new(processor, retries, config)
    }

    fn immediate_retry_config() -> RetryConfig {
        RetryConfig {
            base_delay_secs: 0,
            max_delay_secs: 0,
            max_attempts: 3,
            batch_size: 50,
        }
    }

    #[tokio::test]
    async fn replay_succeeds_once_the_order_exists() {
        let payments = Arc::new(MemoryPaymentStore::new());
        let retries = Arc::new(MemoryRetryStore::new());
        let service = service(payments.clone(), retries.clone(), immediate_retry_config());

        let payload = settlement_payload("INDO-1-abcd1234");
        let attempt = service
            .record_failure(
                GatewayName::Midtrans,
                &payload,
                Some("INDO-1-abcd1234"),
                "Order not found: INDO-1-abcd1234",
            )
            .await
            .expect("record_failure should persist");
        assert_eq!(attempt.attempt_count, 1);

        // Order still missing: the delivery is rescheduled.
        let report = service
            .process_pending_retries()
            .await
            .expect("run should complete");
        assert_eq!(report.claimed, 1);
        assert_eq!(report.rescheduled, 1);
        let stored = retries.get(attempt.id).await.expect("row should remain");
        assert_eq!(stored.attempt_count, 2);

        // Order committed in the meantime: replay succeeds and the row goes.
        payments.insert_pending("INDO-1-abcd1234", 50_000).await;
        let report = service
            .process_pending_retries()
            .await
            .expect("run should complete");
        assert_eq!(report.succeeded, 1);
        assert!(retries.get(attempt.id).await.is_none());
    }

    #[tokio::test]
    async fn exhausted_deliveries_are_dead_lettered() {
        let payments = Arc::new(MemoryPaymentStore::new());
        let retries = Arc::new(MemoryRetryStore::new());
        let service = service(payments, retries.clone(), immediate_retry_config());

        let payload = settlement_payload("INDO-9-zzzz9999");
        let attempt = service
            .record_failure(GatewayName::Midtrans, &payload, None, "Order not found")
            .await
            .expect("record_failure should persist");

        // max_attempts = 3: one reschedule, then dead on the next run.
        let report = service.process_pending_retries().await.expect("run 1");
        assert_eq!(report.rescheduled, 1);
        let report = service.process_pending_retries().await.expect("run 2");
        assert_eq!(report.dead_lettered, 1);

        let stored = retries.get(attempt.id).await.expect("row should remain");
        assert!(stored.is_dead);

        // Dead rows are excluded from later runs but visible in stats.
        let report = service.process_pending_retries().await.expect("run 3");
        assert_eq!(report.claimed, 0);
        let stats = service.retry_stats().await.expect("stats should load");
        assert_eq!(stats.total_dead, 1);
        assert_eq!(stats.total_pending, 0);
    }

    #[tokio::test]
    async fn permanent_replay_failure_is_dead_lettered() {
        let payments = Arc::new(MemoryPaymentStore::new());
        let retries = Arc::new(MemoryRetryStore::new());
        let service = service(payments, retries.clone(), immediate_retry_config());

        let attempt = service
            .record_failure(GatewayName::Midtrans, b"not json", None, "transient")
            .await
            .expect("record_failure should persist");

        let report = service.process_pending_retries().await.expect("run");
        assert_eq!(report.dead_lettered, 1);
        assert!(retries.get(attempt.id).await.expect("row remains").is_dead);
    }

    #[tokio::test]
    async fn clear_all_removes_everything() {
        let payments = Arc::new(MemoryPaymentStore::new());
        let retries = Arc::new(MemoryRetryStore::new());
        let service = service(payments, retries, immediate_retry_config());

        for i in 0..3 {
            service
                .record_failure(
                    GatewayName::Midtrans,
                    &settlement_payload(&format!("INDO-{}-aaaa000{}", i, i)),
                    None,
                    "Order not found",
                )
                .await
                .expect("record_failure should persist");
        }

        let removed = service.clear_all_retries().await.expect("clear");
        assert_eq!(removed, 3);
        let stats = service.retry_stats().await.expect("stats");
        assert_eq!(stats.total_pending, 0);
    }
}
