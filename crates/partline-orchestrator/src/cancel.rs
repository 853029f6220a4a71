use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use partline_core::{FulfillmentError, ShipmentStatus};
use partline_platform::{CancelShipmentRequest, CancelShipmentResponse, NotificationEvent};

use crate::effects::PendingEffect;
use crate::{inventory, wallet};

/// Operator-driven cancellation. Allowed from any pre-dispatch state;
/// releases reserved/committed stock and refunds the wallet in the same
/// transaction. The compensating refund is unconditional and idempotent,
/// so a retried cancel refunds exactly once.
pub async fn cancel_shipment(
    pool: &PgPool,
    shipment_id: Uuid,
    payload: &CancelShipmentRequest,
) -> Result<(CancelShipmentResponse, Vec<PendingEffect>), FulfillmentError> {
    if payload.requested_by.trim().is_empty() {
        return Err(FulfillmentError::Validation(
            "requested_by is required".to_string(),
        ));
    }

    let actor = payload.requested_by.trim();
    let refund_reference = format!("refund:{shipment_id}");
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT status, initiator_brand_id, payer_account_id, estimated_cost, courier_awb
        FROM shipments
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(shipment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| FulfillmentError::NotFound(format!("shipment {shipment_id}")))?;

    let status = ShipmentStatus::parse(&row.try_get::<String, _>("status")?)?;
    let brand_id: Uuid = row.try_get("initiator_brand_id")?;
    let payer_account_id: Uuid = row.try_get("payer_account_id")?;
    let estimated_cost: Decimal = row.try_get("estimated_cost")?;
    let awb: Option<String> = row.try_get("courier_awb")?;

    if status == ShipmentStatus::Cancelled {
        // Retried cancel: report the recorded refund instead of erroring.
        let movement = wallet::refund(
            &mut tx,
            payer_account_id,
            estimated_cost,
            &refund_reference,
            Some(shipment_id),
            actor,
        )
        .await?;
        tx.commit().await?;
        return Ok((
            CancelShipmentResponse {
                shipment_id,
                status: status.as_str().to_string(),
                refunded_amount: movement.amount,
                refund_reference,
                stock_released: false,
            },
            Vec::new(),
        ));
    }

    status.ensure_transition(ShipmentStatus::Cancelled)?;

    let stock_released =
        inventory::release_for_shipment(&mut tx, brand_id, shipment_id, actor).await?;

    let movement = wallet::refund(
        &mut tx,
        payer_account_id,
        estimated_cost,
        &refund_reference,
        Some(shipment_id),
        actor,
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE shipments
        SET status = $2, cancel_reason = $3, cancelled_at = $4, updated_at = $4
        WHERE id = $1
        "#,
    )
    .bind(shipment_id)
    .bind(ShipmentStatus::Cancelled.as_str())
    .bind(payload.reason.as_deref())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(%shipment_id, refunded = %movement.amount, "shipment cancelled");

    let effects = vec![
        PendingEffect::notify(NotificationEvent::ShipmentStatusChanged {
            shipment_id,
            from: status.as_str().to_string(),
            to: ShipmentStatus::Cancelled.as_str().to_string(),
            awb,
        }),
        PendingEffect::notify(NotificationEvent::WalletCredited {
            account_id: movement.account_id,
            amount: movement.amount,
            reference: refund_reference.clone(),
            balance_after: movement.balance_after,
        }),
    ];

    Ok((
        CancelShipmentResponse {
            shipment_id,
            status: ShipmentStatus::Cancelled.as_str().to_string(),
            refunded_amount: movement.amount,
            refund_reference,
            stock_released,
        },
        effects,
    ))
}
