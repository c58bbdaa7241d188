use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use sqlx::PgConnection;
use uuid::Uuid;

/// Balance mutations for prepaid water credit. Both helpers run on a
/// caller-supplied connection so they participate in the caller's
/// transaction and commit together with the status update.
pub async fn apply_credit(
    conn: &mut PgConnection,
    customer_id: Uuid,
    amount: i64,
    order_id: &str,
    reason: &str,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO customer_balances (customer_id, balance)
         VALUES ($1, $2)
         ON CONFLICT (customer_id) DO UPDATE
         SET balance = customer_balances.balance + EXCLUDED.balance, updated_at = NOW()",
    )
    .bind(customer_id)
    .bind(amount)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    record_ledger_entry(conn, customer_id, amount, order_id, "credit", reason).await
}

pub async fn reverse_credit(
    conn: &mut PgConnection,
    customer_id: Uuid,
    amount: i64,
    order_id: &str,
    reason: &str,
) -> DbResult<()> {
    let updated = sqlx::query(
        "UPDATE customer_balances
         SET balance = balance - $2, updated_at = NOW()
         WHERE customer_id = $1 AND balance >= $2",
    )
    .bind(customer_id)
    .bind(amount)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    if updated.rows_affected() == 0 {
        return Err(DatabaseError::new(
            DatabaseErrorKind::InsufficientBalance {
                available: "unknown".to_string(),
                required: amount.to_string(),
            },
        )
        .with_context(format!("reversing credit for order {}", order_id)));
    }

    record_ledger_entry(conn, customer_id, amount, order_id, "debit", reason).await
}

async fn record_ledger_entry(
    conn: &mut PgConnection,
    customer_id: Uuid,
    amount: i64,
    order_id: &str,
    direction: &str,
    reason: &str,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO credit_ledger (id, customer_id, order_id, amount, direction, reason)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(customer_id)
    .bind(order_id)
    .bind(amount)
    .bind(direction)
    .bind(reason)
    .execute(conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    Ok(())
}
