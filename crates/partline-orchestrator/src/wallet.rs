use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use partline_core::FulfillmentError;
use partline_wallet::{ShareLedger, TxnType, decide_credit, decide_debit};

#[derive(Debug, Clone)]
pub struct WalletMovement {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
    /// True when the reference had already been processed and the recorded
    /// outcome was returned instead of moving money again.
    pub replayed: bool,
}

async fn find_by_reference(
    tx: &mut Transaction<'_, Postgres>,
    reference: &str,
) -> Result<Option<WalletMovement>, FulfillmentError> {
    let row = sqlx::query(
        "SELECT id, account_id, amount, balance_after FROM wallet_transactions WHERE reference = $1",
    )
    .bind(reference)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|row| {
        Ok::<_, sqlx::Error>(WalletMovement {
            transaction_id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            amount: row.try_get("amount")?,
            balance_after: row.try_get("balance_after")?,
            replayed: true,
        })
    })
    .transpose()?)
}

/// Locks the balance row for the duration of the check-and-write, creating
/// a zero-balance account on first contact.
async fn lock_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
) -> Result<Decimal, FulfillmentError> {
    let row = sqlx::query("SELECT balance FROM wallet_accounts WHERE account_id = $1 FOR UPDATE")
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(row) = row {
        return Ok(row.try_get("balance")?);
    }

    sqlx::query("INSERT INTO wallet_accounts (account_id, balance, updated_at) VALUES ($1, 0, $2)")
        .bind(account_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

    Ok(Decimal::ZERO)
}

async fn write_movement(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    txn_type: TxnType,
    amount: Decimal,
    balance_after: Decimal,
    reference: &str,
    shipment_id: Option<Uuid>,
    actor: &str,
) -> Result<WalletMovement, FulfillmentError> {
    let now = Utc::now();

    sqlx::query("UPDATE wallet_accounts SET balance = $2, updated_at = $3 WHERE account_id = $1")
        .bind(account_id)
        .bind(balance_after)
        .bind(now)
        .execute(&mut **tx)
        .await?;

    let transaction_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO wallet_transactions (
            id, account_id, txn_type, amount, balance_after, reference, shipment_id, actor, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(transaction_id)
    .bind(account_id)
    .bind(txn_type.as_str())
    .bind(amount)
    .bind(balance_after)
    .bind(reference)
    .bind(shipment_id)
    .bind(actor)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(WalletMovement {
        transaction_id,
        account_id,
        amount,
        balance_after,
        replayed: false,
    })
}

/// Atomic check-and-deduct: balance read, sufficiency check, DEBIT entry
/// and new balance all happen under the row lock. A repeated reference
/// replays the recorded result.
pub async fn check_and_deduct(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: Decimal,
    reference: &str,
    shipment_id: Option<Uuid>,
    actor: &str,
) -> Result<WalletMovement, FulfillmentError> {
    if let Some(previous) = find_by_reference(tx, reference).await? {
        return Ok(previous);
    }

    let current = lock_balance(tx, account_id).await?;
    let balance_after = decide_debit(current, amount)?;

    write_movement(
        tx,
        account_id,
        TxnType::Debit,
        amount,
        balance_after,
        reference,
        shipment_id,
        actor,
    )
    .await
}

/// CREDIT with a reference back to the original operation; idempotent by
/// reference so retried cancellations refund exactly once.
pub async fn refund(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: Decimal,
    reference: &str,
    shipment_id: Option<Uuid>,
    actor: &str,
) -> Result<WalletMovement, FulfillmentError> {
    credit(tx, account_id, amount, reference, shipment_id, actor).await
}

/// Counts the refunds and re-debits recorded under a bulk item's
/// reference prefix, so a retry knows whether the item's share of the
/// aggregate debit is still held.
pub async fn share_position(
    pool: &PgPool,
    reference_prefix: &str,
) -> Result<ShareLedger, FulfillmentError> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE txn_type = 'CREDIT') AS refunds,
            COUNT(*) FILTER (WHERE txn_type = 'DEBIT') AS redebits
        FROM wallet_transactions
        WHERE reference LIKE $1
        "#,
    )
    .bind(format!("{reference_prefix}%"))
    .fetch_one(pool)
    .await?;

    Ok(ShareLedger {
        refunds: row.try_get::<i64, _>("refunds")? as u32,
        redebits: row.try_get::<i64, _>("redebits")? as u32,
    })
}

pub async fn credit(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: Decimal,
    reference: &str,
    shipment_id: Option<Uuid>,
    actor: &str,
) -> Result<WalletMovement, FulfillmentError> {
    if let Some(previous) = find_by_reference(tx, reference).await? {
        return Ok(previous);
    }

    let current = lock_balance(tx, account_id).await?;
    let balance_after = decide_credit(current, amount)?;

    write_movement(
        tx,
        account_id,
        TxnType::Credit,
        amount,
        balance_after,
        reference,
        shipment_id,
        actor,
    )
    .await
}
