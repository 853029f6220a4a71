use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use partline_core::{FulfillmentError, ShipmentStatus, ShipmentType};
use partline_platform::{NotificationEvent, TrackingUpdateEvent};

use crate::effects::PendingEffect;
use crate::inventory;

/// Courier-side status vocabulary mapped onto the shipment state machine.
pub fn map_courier_status(courier_status: &str) -> Option<ShipmentStatus> {
    match courier_status.trim().to_ascii_uppercase().as_str() {
        "PICKED_UP" | "DISPATCHED" => Some(ShipmentStatus::Dispatched),
        "IN_TRANSIT" => Some(ShipmentStatus::InTransit),
        "OUT_FOR_DELIVERY" => Some(ShipmentStatus::OutForDelivery),
        "DELIVERED" => Some(ShipmentStatus::Delivered),
        "RTO" | "RETURNED_TO_ORIGIN" => Some(ShipmentStatus::Rto),
        "FAILED" | "UNDELIVERABLE" => Some(ShipmentStatus::Failed),
        _ => None,
    }
}

/// Applies one tracking update from the courier. Unknown AWBs and illegal
/// transitions are logged and skipped, never errors: the courier replays
/// and reorders its webhooks freely.
pub async fn apply_tracking_update(
    pool: &PgPool,
    event: &TrackingUpdateEvent,
    actor: &str,
) -> Result<Option<Vec<PendingEffect>>, FulfillmentError> {
    let Some(next) = map_courier_status(&event.courier_status) else {
        warn!(awb = %event.awb, status = %event.courier_status, "unknown courier status, skipping");
        return Ok(None);
    };

    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT id, status, shipment_type, initiator_brand_id
        FROM shipments
        WHERE courier_awb = $1
        FOR UPDATE
        "#,
    )
    .bind(event.awb.trim())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        warn!(awb = %event.awb, "tracking update for unknown awb, skipping");
        return Ok(None);
    };

    let shipment_id: Uuid = row.try_get("id")?;
    let current = ShipmentStatus::parse(&row.try_get::<String, _>("status")?)?;
    let shipment_type = ShipmentType::parse(&row.try_get::<String, _>("shipment_type")?)?;
    let brand_id: Uuid = row.try_get("initiator_brand_id")?;

    if !current.can_transition_to(next) {
        warn!(
            %shipment_id,
            from = current.as_str(),
            to = next.as_str(),
            "illegal tracking transition, skipping"
        );
        return Ok(None);
    }

    let now = event.occurred_at.unwrap_or_else(Utc::now);
    // Column names come from a fixed internal table, never from input.
    let query = match next.timestamp_column() {
        Some(column) => format!(
            "UPDATE shipments SET status = $2, {column} = $3, updated_at = $3 WHERE id = $1"
        ),
        None => "UPDATE shipments SET status = $2, updated_at = $3 WHERE id = $1".to_string(),
    };
    sqlx::query(&query)
        .bind(shipment_id)
        .bind(next.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

    // A delivered reverse shipment puts the returned parts back on the
    // brand's shelf.
    if next == ShipmentStatus::Delivered && shipment_type == ShipmentType::Reverse {
        let parts = sqlx::query(
            r#"
            SELECT bp.part_code, SUM(bp.quantity) AS quantity
            FROM box_parts bp
            INNER JOIN shipment_boxes b ON b.id = bp.box_id
            WHERE b.shipment_id = $1
            GROUP BY bp.part_code
            "#,
        )
        .bind(shipment_id)
        .fetch_all(&mut *tx)
        .await?;

        for part in parts {
            let part_code: String = part.try_get("part_code")?;
            let quantity: Decimal = part.try_get("quantity")?;
            inventory::receive_return(&mut tx, brand_id, &part_code, quantity, shipment_id, actor)
                .await?;
        }
    }

    tx.commit().await?;
    info!(%shipment_id, from = current.as_str(), to = next.as_str(), "tracking update applied");

    Ok(Some(vec![PendingEffect::notify(
        NotificationEvent::ShipmentStatusChanged {
            shipment_id,
            from: current.as_str().to_string(),
            to: next.as_str().to_string(),
            awb: Some(event.awb.trim().to_string()),
        },
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn courier_vocabulary_maps_onto_the_state_machine() {
        assert_eq!(
            map_courier_status("picked_up"),
            Some(ShipmentStatus::Dispatched)
        );
        assert_eq!(
            map_courier_status("OUT_FOR_DELIVERY"),
            Some(ShipmentStatus::OutForDelivery)
        );
        assert_eq!(map_courier_status("RTO"), Some(ShipmentStatus::Rto));
        assert_eq!(map_courier_status("LOST_IN_SPACE"), None);
    }
}
