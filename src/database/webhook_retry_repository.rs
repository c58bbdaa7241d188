use crate::database::error::{DatabaseError, DbResult};
use crate::gateways::types::GatewayName;
use crate::services::webhook_retry::RetryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

/// One failed inbound webhook awaiting replay. The payload is stored
/// byte-exact so the replay sees what the gateway originally sent.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub order_id: Option<String>,
    pub gateway: String,
    pub payload: Vec<u8>,
    pub failure_reason: String,
    pub attempt_count: i32,
    pub next_retry_at: DateTime<Utc>,
    pub is_dead: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn gateway_name(&self) -> Option<GatewayName> {
        self.gateway.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct NewDeliveryAttempt {
    pub order_id: Option<String>,
    pub gateway: GatewayName,
    pub payload: Vec<u8>,
    pub failure_reason: String,
    pub next_retry_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_pending: i64,
    pub total_dead: i64,
    pub by_gateway: Vec<(String, i64)>,
    pub by_attempt: Vec<(i32, i64)>,
}

const ATTEMPT_COLUMNS: &str = "id, order_id, gateway, payload, failure_reason, attempt_count, \
     next_retry_at, is_dead, claimed_at, created_at, updated_at";

/// A claim older than this belongs to a worker run that died mid-replay and
/// may be picked up again.
const STALE_CLAIM_SECS: i64 = 300;

pub struct WebhookRetryRepository {
    pool: PgPool,
}

impl WebhookRetryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetryStore for WebhookRetryRepository {
    async fn record_failure(&self, new: NewDeliveryAttempt) -> DbResult<DeliveryAttempt> {
        sqlx::query_as::<_, DeliveryAttempt>(&format!(
            "INSERT INTO webhook_delivery_attempts
                 (id, order_id, gateway, payload, failure_reason, attempt_count, next_retry_at)
             VALUES ($1, $2, $3, $4, $5, 1, $6)
             RETURNING {}",
            ATTEMPT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.order_id)
        .bind(new.gateway.as_str())
        .bind(&new.payload)
        .bind(&new.failure_reason)
        .bind(new.next_retry_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Claims up to `limit` due rows. `FOR UPDATE SKIP LOCKED` plus the
    /// claim marker keeps overlapping scheduler runs off the same row.
    async fn claim_due(&self, limit: i64) -> DbResult<Vec<DeliveryAttempt>> {
        sqlx::query_as::<_, DeliveryAttempt>(&format!(
            "UPDATE webhook_delivery_attempts
             SET claimed_at = NOW(), updated_at = NOW()
             WHERE id IN (
                 SELECT id FROM webhook_delivery_attempts
                 WHERE next_retry_at <= NOW()
                   AND is_dead = false
                   AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
                 ORDER BY next_retry_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            ATTEMPT_COLUMNS
        ))
        .bind(limit)
        .bind(STALE_CLAIM_SECS as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn complete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM webhook_delivery_attempts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        failure_reason: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE webhook_delivery_attempts
             SET attempt_count = $2, next_retry_at = $3, failure_reason = $4,
                 claimed_at = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_retry_at)
        .bind(failure_reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid) -> DbResult<()> {
        sqlx::query(
            "UPDATE webhook_delivery_attempts
             SET is_dead = true, claimed_at = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn stats(&self) -> DbResult<RetryStats> {
        let totals = sqlx::query(
            "SELECT
                 COUNT(*) FILTER (WHERE is_dead = false) AS pending,
                 COUNT(*) FILTER (WHERE is_dead = true) AS dead
             FROM webhook_delivery_attempts",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let by_gateway = sqlx::query(
            "SELECT gateway, COUNT(*) AS count
             FROM webhook_delivery_attempts
             WHERE is_dead = false
             GROUP BY gateway
             ORDER BY gateway",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let by_attempt = sqlx::query(
            "SELECT attempt_count, COUNT(*) AS count
             FROM webhook_delivery_attempts
             WHERE is_dead = false
             GROUP BY attempt_count
             ORDER BY attempt_count",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(RetryStats {
            total_pending: totals.try_get::<i64, _>("pending").unwrap_or(0),
            total_dead: totals.try_get::<i64, _>("dead").unwrap_or(0),
            by_gateway: by_gateway
                .iter()
                .filter_map(|row| {
                    Some((
                        row.try_get::<String, _>("gateway").ok()?,
                        row.try_get::<i64, _>("count").ok()?,
                    ))
                })
                .collect(),
            by_attempt: by_attempt
                .iter()
                .filter_map(|row| {
                    Some((
                        row.try_get::<i32, _>("attempt_count").ok()?,
                        row.try_get::<i64, _>("count").ok()?,
                    ))
                })
                .collect(),
        })
    }

    async fn clear_all(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_delivery_attempts")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
