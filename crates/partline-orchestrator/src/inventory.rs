use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use partline_core::FulfillmentError;
use partline_inventory::{LedgerAction, PartBalance};

/// Locks the (brand, part) balance row, creating a zero row on first
/// contact so the lock always exists.
async fn lock_balance(
    tx: &mut Transaction<'_, Postgres>,
    brand_id: Uuid,
    part_code: &str,
) -> Result<PartBalance, FulfillmentError> {
    let row = sqlx::query(
        "SELECT on_hand, reserved FROM inventory_balances WHERE brand_id = $1 AND part_code = $2 FOR UPDATE",
    )
    .bind(brand_id)
    .bind(part_code)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = row {
        return Ok(PartBalance {
            on_hand: row.try_get("on_hand")?,
            reserved: row.try_get("reserved")?,
        });
    }

    sqlx::query(
        "INSERT INTO inventory_balances (brand_id, part_code, on_hand, reserved, updated_at) VALUES ($1, $2, 0, 0, $3)",
    )
    .bind(brand_id)
    .bind(part_code)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(PartBalance::default())
}

async fn write_balance(
    tx: &mut Transaction<'_, Postgres>,
    brand_id: Uuid,
    part_code: &str,
    balance: PartBalance,
) -> Result<(), FulfillmentError> {
    sqlx::query(
        "UPDATE inventory_balances SET on_hand = $3, reserved = $4, updated_at = $5 WHERE brand_id = $1 AND part_code = $2",
    )
    .bind(brand_id)
    .bind(part_code)
    .bind(balance.on_hand)
    .bind(balance.reserved)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn append_entry(
    tx: &mut Transaction<'_, Postgres>,
    brand_id: Uuid,
    part_code: &str,
    action: LedgerAction,
    quantity: Decimal,
    source: &str,
    destination: &str,
    balance: PartBalance,
    shipment_id: Option<Uuid>,
    reference: Option<&str>,
    actor: &str,
) -> Result<(), FulfillmentError> {
    sqlx::query(
        r#"
        INSERT INTO inventory_ledger (
            id, brand_id, part_code, action, quantity, source, destination,
            on_hand_after, reserved_after, shipment_id, reference, actor, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(brand_id)
    .bind(part_code)
    .bind(action.as_str())
    .bind(quantity)
    .bind(source)
    .bind(destination)
    .bind(balance.on_hand)
    .bind(balance.reserved)
    .bind(shipment_id)
    .bind(reference)
    .bind(actor)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Reserves stock and immediately converts the hold into an outbound
/// movement. Both ledger entries land in the caller's transaction, the
/// same one that persists the shipment graph: a reservation without its
/// owning shipment can never be observed.
pub async fn reserve_and_commit(
    tx: &mut Transaction<'_, Postgres>,
    brand_id: Uuid,
    part_code: &str,
    quantity: Decimal,
    destination: &str,
    shipment_id: Uuid,
    actor: &str,
) -> Result<(), FulfillmentError> {
    let mut balance = lock_balance(tx, brand_id, part_code).await?;

    balance.reserve(part_code, quantity)?;
    append_entry(
        tx,
        brand_id,
        part_code,
        LedgerAction::Reserve,
        quantity,
        "BRAND_STOCK",
        destination,
        balance,
        Some(shipment_id),
        None,
        actor,
    )
    .await?;

    balance.commit(part_code, quantity)?;
    append_entry(
        tx,
        brand_id,
        part_code,
        LedgerAction::TransferOut,
        quantity,
        "BRAND_STOCK",
        destination,
        balance,
        Some(shipment_id),
        None,
        actor,
    )
    .await?;

    write_balance(tx, brand_id, part_code, balance).await
}

/// Reverses whatever the shipment did to stock, without the caller
/// knowing whether the commit step ever ran. Idempotent: once a RELEASE
/// entry exists for the shipment, further calls are no-ops.
pub async fn release_for_shipment(
    tx: &mut Transaction<'_, Postgres>,
    brand_id: Uuid,
    shipment_id: Uuid,
    actor: &str,
) -> Result<bool, FulfillmentError> {
    let rows = sqlx::query(
        "SELECT part_code, action, quantity FROM inventory_ledger WHERE brand_id = $1 AND shipment_id = $2 ORDER BY created_at",
    )
    .bind(brand_id)
    .bind(shipment_id)
    .fetch_all(&mut **tx)
    .await?;

    if rows.is_empty() {
        return Ok(false);
    }

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        entries.push((
            row.try_get::<String, _>("part_code")?,
            row.try_get::<String, _>("action")?,
            row.try_get::<Decimal, _>("quantity")?,
        ));
    }

    let Some(per_part) = releasable_quantities(&entries) else {
        return Ok(false);
    };

    for (part_code, (held, committed)) in per_part {
        let mut balance = lock_balance(tx, brand_id, &part_code).await?;
        if held > Decimal::ZERO {
            balance.release(held, false);
        }
        if committed > Decimal::ZERO {
            balance.release(committed, true);
        }
        let released = held.max(Decimal::ZERO) + committed;
        append_entry(
            tx,
            brand_id,
            &part_code,
            LedgerAction::Release,
            released,
            "SHIPMENT_CANCEL",
            "BRAND_STOCK",
            balance,
            Some(shipment_id),
            None,
            actor,
        )
        .await?;
        write_balance(tx, brand_id, &part_code, balance).await?;
    }

    Ok(true)
}

/// Replays a shipment's ledger entries into per-part reversal amounts:
/// part -> (reserved-not-committed, committed). `None` means a RELEASE
/// entry already exists and the reversal already happened.
fn releasable_quantities(
    entries: &[(String, String, Decimal)],
) -> Option<BTreeMap<String, (Decimal, Decimal)>> {
    let mut per_part: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
    for (part_code, action, quantity) in entries {
        if action == LedgerAction::Release.as_str() {
            return None;
        }

        let slot = per_part.entry(part_code.clone()).or_default();
        match action.as_str() {
            "RESERVE" => slot.0 += *quantity,
            "TRANSFER_OUT" | "CONSUMED" => {
                slot.0 -= *quantity;
                slot.1 += *quantity;
            }
            _ => {}
        }
    }
    Some(per_part)
}

/// ADD movement used to provision stock. Idempotent by reference.
pub async fn add_stock(
    tx: &mut Transaction<'_, Postgres>,
    brand_id: Uuid,
    part_code: &str,
    quantity: Decimal,
    source: &str,
    reference: &str,
    actor: &str,
) -> Result<PartBalance, FulfillmentError> {
    let existing = sqlx::query(
        "SELECT on_hand_after, reserved_after FROM inventory_ledger WHERE reference = $1",
    )
    .bind(reference)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(row) = existing {
        return Ok(PartBalance {
            on_hand: row.try_get("on_hand_after")?,
            reserved: row.try_get("reserved_after")?,
        });
    }

    let mut balance = lock_balance(tx, brand_id, part_code).await?;
    balance.restock(part_code, quantity)?;
    append_entry(
        tx,
        brand_id,
        part_code,
        LedgerAction::Add,
        quantity,
        source,
        "BRAND_STOCK",
        balance,
        None,
        Some(reference),
        actor,
    )
    .await?;
    write_balance(tx, brand_id, part_code, balance).await?;

    Ok(balance)
}

/// Inbound movement when a reverse shipment is delivered back to the
/// brand: returned parts re-enter stock as TRANSFER_IN.
pub async fn receive_return(
    tx: &mut Transaction<'_, Postgres>,
    brand_id: Uuid,
    part_code: &str,
    quantity: Decimal,
    shipment_id: Uuid,
    actor: &str,
) -> Result<(), FulfillmentError> {
    let mut balance = lock_balance(tx, brand_id, part_code).await?;
    balance.restock(part_code, quantity)?;
    append_entry(
        tx,
        brand_id,
        part_code,
        LedgerAction::TransferIn,
        quantity,
        "REVERSE_SHIPMENT",
        "BRAND_STOCK",
        balance,
        Some(shipment_id),
        None,
        actor,
    )
    .await?;
    write_balance(tx, brand_id, part_code, balance).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(part: &str, action: LedgerAction, quantity: i64) -> (String, String, Decimal) {
        (
            part.to_string(),
            action.as_str().to_string(),
            Decimal::from(quantity),
        )
    }

    #[test]
    fn reserved_and_committed_are_reversed_separately() {
        let entries = vec![
            entry("BRK-PAD", LedgerAction::Reserve, 4),
            entry("BRK-PAD", LedgerAction::TransferOut, 4),
            entry("OIL-FLT", LedgerAction::Reserve, 2),
        ];

        let per_part = releasable_quantities(&entries).unwrap();
        assert_eq!(
            per_part.get("BRK-PAD"),
            Some(&(Decimal::ZERO, Decimal::from(4)))
        );
        assert_eq!(
            per_part.get("OIL-FLT"),
            Some(&(Decimal::from(2), Decimal::ZERO))
        );
    }

    #[test]
    fn release_entry_makes_the_reversal_a_no_op() {
        let entries = vec![
            entry("BRK-PAD", LedgerAction::Reserve, 4),
            entry("BRK-PAD", LedgerAction::TransferOut, 4),
            entry("BRK-PAD", LedgerAction::Release, 4),
        ];

        assert!(releasable_quantities(&entries).is_none());
    }

    #[test]
    fn full_cycle_returns_the_balance_to_its_start() {
        let mut balance = PartBalance {
            on_hand: Decimal::from(10),
            reserved: Decimal::ZERO,
        };
        balance.reserve("BRK-PAD", Decimal::from(4)).unwrap();
        balance.commit("BRK-PAD", Decimal::from(4)).unwrap();

        let entries = vec![
            entry("BRK-PAD", LedgerAction::Reserve, 4),
            entry("BRK-PAD", LedgerAction::TransferOut, 4),
        ];
        let per_part = releasable_quantities(&entries).unwrap();
        let (held, committed) = per_part["BRK-PAD"];
        if held > Decimal::ZERO {
            balance.release(held, false);
        }
        if committed > Decimal::ZERO {
            balance.release(committed, true);
        }

        assert_eq!(balance.on_hand, Decimal::from(10));
        assert_eq!(balance.reserved, Decimal::ZERO);
    }
}
