use crate::database::credit_ledger;
use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::gateways::types::{GatewayName, TransactionStatus};
use crate::services::webhook_processor::{ApplyOutcome, PaymentStore};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One payment attempt. `amount` is in minor currency units and immutable
/// after creation; status transitions follow the webhook state machine.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub order_id: String,
    pub customer_id: Uuid,
    pub gateway: String,
    pub gateway_transaction_id: Option<String>,
    pub amount: i64,
    pub status: String,
    pub raw_payload: Option<JsonValue>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRecord {
    pub fn transaction_status(&self) -> TransactionStatus {
        TransactionStatus::parse(&self.status).unwrap_or(TransactionStatus::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub order_id: String,
    pub customer_id: Uuid,
    pub gateway: GatewayName,
    pub amount: i64,
}

const RECORD_COLUMNS: &str = "id, order_id, customer_id, gateway, gateway_transaction_id, \
     amount, status, raw_payload, created_at, updated_at";

/// Repository for transaction records and the atomic webhook apply step
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewTransaction) -> DbResult<TransactionRecord> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "INSERT INTO transactions (id, order_id, customer_id, gateway, amount, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.order_id)
        .bind(new.customer_id)
        .bind(new.gateway.as_str())
        .bind(new.amount)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_gateway_reference(
        &self,
        order_id: &str,
        gateway_transaction_id: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE transactions
             SET gateway_transaction_id = COALESCE(gateway_transaction_id, $2), updated_at = NOW()
             WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(gateway_transaction_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn get_by_order_id(&self, order_id: &str) -> DbResult<Option<TransactionRecord>> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {} FROM transactions WHERE order_id = $1",
            RECORD_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn get_by_gateway_reference(
        &self,
        gateway: &GatewayName,
        gateway_transaction_id: &str,
    ) -> DbResult<Option<TransactionRecord>> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {} FROM transactions WHERE gateway = $1 AND gateway_transaction_id = $2",
            RECORD_COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn find_by_order_id(&self, order_id: &str) -> DbResult<Option<TransactionRecord>> {
        self.get_by_order_id(order_id).await
    }

    /// Moves a pending record to a terminal status and applies the balance
    /// side effect in the same transaction. The record row is locked with
    /// `FOR UPDATE` so two concurrent deliveries for one order cannot both
    /// observe `pending` and both credit.
    async fn apply_terminal_status(
        &self,
        order_id: &str,
        status: TransactionStatus,
        gateway_transaction_id: Option<&str>,
        raw_payload: &JsonValue,
    ) -> DbResult<ApplyOutcome> {
        if !status.is_terminal() {
            return Err(DatabaseError::new(DatabaseErrorKind::TransactionError {
                message: format!("cannot apply non-terminal status '{}'", status),
            }));
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let record = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {} FROM transactions WHERE order_id = $1 FOR UPDATE",
            RECORD_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Transaction".to_string(),
                id: order_id.to_string(),
            })
        })?;

        let current = record.transaction_status();
        if current.is_terminal() {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(ApplyOutcome::AlreadyTerminal(current));
        }

        sqlx::query(
            "UPDATE transactions
             SET status = $2,
                 gateway_transaction_id = COALESCE(gateway_transaction_id, $3),
                 raw_payload = $4,
                 updated_at = NOW()
             WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(status.as_str())
        .bind(gateway_transaction_id)
        .bind(raw_payload)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match status {
            TransactionStatus::Success => {
                credit_ledger::apply_credit(
                    &mut *tx,
                    record.customer_id,
                    record.amount,
                    order_id,
                    "payment settled",
                )
                .await?;
            }
            TransactionStatus::Refunded => {
                credit_ledger::reverse_credit(
                    &mut *tx,
                    record.customer_id,
                    record.amount,
                    order_id,
                    "payment refunded",
                )
                .await?;
            }
            TransactionStatus::Failed | TransactionStatus::Expired => {}
            TransactionStatus::Pending => unreachable!("checked above"),
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(ApplyOutcome::Applied)
    }
}
