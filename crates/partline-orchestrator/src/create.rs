use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use partline_core::{
    Classification, FulfillmentError, PartQuantity, PartyRole, Priority, ReturnReason,
    ShipmentStatus, ShipmentType, classify, verify_packing,
};
use partline_courier::{ConsignmentAddress, ConsignmentRequest, CourierGateway};
use partline_platform::{
    BulkCreateShipmentsRequest, BulkCreateShipmentsResponse, BulkItemResult, CourierResult,
    CreateShipmentRequest, CreateShipmentResponse, NotificationEvent, PartLineRequest,
    RetryBookingRequest, ShipmentAddress,
};
use partline_pricing::{CostBreakdown, CostInput, RateCard, compute_cost};

use crate::effects::PendingEffect;
use crate::margin;
use crate::{BULK_BATCH_DELAY_MS, BULK_BATCH_SIZE, inventory, wallet};

/// Fully validated and priced shipment, ready to persist. Produced by
/// read-only work; nothing has been reserved yet.
struct PreparedShipment {
    shipment_id: Uuid,
    request: CreateShipmentRequest,
    initiator_role: PartyRole,
    recipient_role: PartyRole,
    return_reason: Option<ReturnReason>,
    priority: Priority,
    classification: Classification,
    payer_account_id: Uuid,
    parts: Vec<PartQuantity>,
    total_weight: Decimal,
    total_value: Decimal,
    breakdown: CostBreakdown,
}

enum WalletStep {
    Deduct,
    AlreadyDebited,
}

/// Box part rows are keyed by (box, part), so a part listed twice within
/// one box has to be rejected up front.
fn duplicate_part_line(parts: &[PartLineRequest]) -> Option<&str> {
    let mut seen = std::collections::BTreeSet::new();
    parts
        .iter()
        .map(|line| line.part_code.trim())
        .find(|code| !seen.insert(*code))
}

/// Picks the wallet debited for courier cost. The payer role comes from
/// classification; the concrete party is whichever side carries that role.
fn resolve_payer(
    classification: &Classification,
    initiator_brand_id: Uuid,
    initiator_id: Uuid,
    initiator_role: PartyRole,
    recipient_id: Uuid,
    recipient_role: PartyRole,
) -> Result<Uuid, FulfillmentError> {
    if classification.payer_role == PartyRole::Brand {
        return Ok(initiator_brand_id);
    }
    if classification.payer_role == initiator_role {
        return Ok(initiator_id);
    }
    if classification.payer_role == recipient_role {
        return Ok(recipient_id);
    }
    Err(FulfillmentError::Validation(format!(
        "payer role {} matches neither side of the shipment",
        classification.payer_role.as_str()
    )))
}

async fn ensure_authorized_party(
    pool: &PgPool,
    brand_id: Uuid,
    party_id: Uuid,
    role: PartyRole,
) -> Result<(), FulfillmentError> {
    if role == PartyRole::Brand {
        if party_id == brand_id {
            return Ok(());
        }
        return Err(FulfillmentError::RecipientNotAuthorized {
            brand: brand_id,
            recipient: party_id,
            role: role.as_str().to_string(),
        });
    }

    let authorized = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM brand_partners WHERE brand_id = $1 AND party_id = $2 AND role = $3 AND active)",
    )
    .bind(brand_id)
    .bind(party_id)
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;

    if !authorized {
        return Err(FulfillmentError::RecipientNotAuthorized {
            brand: brand_id,
            recipient: party_id,
            role: role.as_str().to_string(),
        });
    }
    Ok(())
}

async fn load_rate_card(
    pool: &PgPool,
    shipment_type: ShipmentType,
    payer_role: PartyRole,
    brand_id: Uuid,
) -> Result<RateCard, FulfillmentError> {
    let row = sqlx::query(
        r#"
        SELECT
            base_rate, per_kg_rate, express_surcharge, remote_surcharge,
            platform_markup_rate, insurance_min_declared_value,
            insurance_premium_rate, insurance_gst_rate
        FROM rate_cards
        WHERE shipment_type = $1
          AND payer_role = $2
          AND (brand_id = $3 OR brand_id IS NULL)
          AND active
        ORDER BY brand_id NULLS LAST
        LIMIT 1
        "#,
    )
    .bind(shipment_type.as_str())
    .bind(payer_role.as_str())
    .bind(brand_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(FulfillmentError::NotFound(format!(
            "rate card for {}/{}",
            shipment_type.as_str(),
            payer_role.as_str()
        )));
    };

    Ok(RateCard {
        base_rate: row.try_get("base_rate")?,
        per_kg_rate: row.try_get("per_kg_rate")?,
        express_surcharge: row.try_get("express_surcharge")?,
        remote_surcharge: row.try_get("remote_surcharge")?,
        platform_markup_rate: row.try_get("platform_markup_rate")?,
        insurance_min_declared_value: row.try_get("insurance_min_declared_value")?,
        insurance_premium_rate: row.try_get("insurance_premium_rate")?,
        insurance_gst_rate: row.try_get("insurance_gst_rate")?,
    })
}

/// Validation, classification, authorization and pricing. Read-only: no
/// reservation or persistence happens here.
async fn prepare(
    pool: &PgPool,
    payload: &CreateShipmentRequest,
) -> Result<PreparedShipment, FulfillmentError> {
    if payload.reference.trim().is_empty() {
        return Err(FulfillmentError::Validation(
            "reference is required".to_string(),
        ));
    }
    if payload.requested_by.trim().is_empty() {
        return Err(FulfillmentError::Validation(
            "requested_by is required".to_string(),
        ));
    }
    if payload.boxes.is_empty() {
        return Err(FulfillmentError::Validation(
            "shipment needs at least one box".to_string(),
        ));
    }
    for (index, shipment_box) in payload.boxes.iter().enumerate() {
        if shipment_box.weight <= Decimal::ZERO {
            return Err(FulfillmentError::Validation(format!(
                "box {} weight must be positive",
                index + 1
            )));
        }
        if let Some(code) = duplicate_part_line(&shipment_box.parts) {
            return Err(FulfillmentError::Validation(format!(
                "box {} lists part {} more than once",
                index + 1,
                code
            )));
        }
    }
    if payload.declared_value < Decimal::ZERO {
        return Err(FulfillmentError::Validation(
            "declared_value must not be negative".to_string(),
        ));
    }

    let initiator_role = PartyRole::parse(&payload.initiator_role)?;
    let recipient_role = PartyRole::parse(&payload.recipient_role)?;
    let priority = Priority::parse(&payload.priority)?;
    let return_reason = payload
        .return_reason
        .as_deref()
        .map(ReturnReason::parse)
        .transpose()?;

    let parts: Vec<PartQuantity> = payload
        .parts
        .iter()
        .map(|line| PartQuantity {
            part_code: line.part_code.trim().to_string(),
            quantity: line.quantity,
        })
        .collect();
    let packed: Vec<PartQuantity> = payload
        .boxes
        .iter()
        .flat_map(|shipment_box| shipment_box.parts.iter())
        .map(|line| PartQuantity {
            part_code: line.part_code.trim().to_string(),
            quantity: line.quantity,
        })
        .collect();
    verify_packing(&parts, &packed)?;

    let classification = classify(initiator_role, recipient_role, return_reason)?;

    ensure_authorized_party(pool, payload.initiator_brand_id, payload.initiator_id, initiator_role)
        .await?;
    ensure_authorized_party(pool, payload.initiator_brand_id, payload.recipient_id, recipient_role)
        .await?;

    let payer_account_id = resolve_payer(
        &classification,
        payload.initiator_brand_id,
        payload.initiator_id,
        initiator_role,
        payload.recipient_id,
        recipient_role,
    )?;

    let card = load_rate_card(
        pool,
        classification.shipment_type,
        classification.payer_role,
        payload.initiator_brand_id,
    )
    .await?;

    let total_weight: Decimal = payload.boxes.iter().map(|b| b.weight).sum();
    let total_value: Decimal = payload
        .boxes
        .iter()
        .flat_map(|b| b.parts.iter())
        .map(|line| line.quantity * line.unit_value)
        .sum();

    let breakdown = compute_cost(
        &card,
        &CostInput {
            box_count: payload.boxes.len() as u32,
            total_weight,
            is_express: payload.is_express,
            is_remote_area: payload.is_remote_area,
            declared_value: payload.declared_value,
            insurance_requested: payload.insurance_requested,
        },
    );

    Ok(PreparedShipment {
        shipment_id: Uuid::new_v4(),
        request: payload.clone(),
        initiator_role,
        recipient_role,
        return_reason,
        priority,
        classification,
        payer_account_id,
        parts,
        total_weight,
        total_value,
        breakdown,
    })
}

/// Replays a previously recorded creation for the same reference.
async fn find_existing(
    pool: &PgPool,
    reference: &str,
) -> Result<Option<CreateShipmentResponse>, FulfillmentError> {
    let row = sqlx::query(
        r#"
        SELECT
            id, status, shipment_type, direction, payer_role, payer_account_id,
            cost_breakdown, courier_awb, courier_tracking_url, created_at
        FROM shipments
        WHERE reference = $1
        "#,
    )
    .bind(reference)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let cost_breakdown: serde_json::Value = row.try_get("cost_breakdown")?;
    let cost: CostBreakdown = serde_json::from_value(cost_breakdown).map_err(|err| {
        FulfillmentError::Validation(format!("stored cost breakdown unreadable: {err}"))
    })?;
    let awb: Option<String> = row.try_get("courier_awb")?;
    let status: String = row.try_get("status")?;

    Ok(Some(CreateShipmentResponse {
        shipment_id: row.try_get("id")?,
        reference: reference.to_string(),
        status: status.clone(),
        shipment_type: row.try_get("shipment_type")?,
        direction: row.try_get("direction")?,
        payer_role: row.try_get("payer_role")?,
        payer_account_id: row.try_get("payer_account_id")?,
        cost,
        courier: CourierResult {
            success: awb.is_some(),
            awb,
            tracking_url: row.try_get("courier_tracking_url")?,
            message: Some("replayed previously recorded result".to_string()),
        },
        created_at: row.try_get("created_at")?,
    }))
}

/// One atomic unit: wallet deduction, stock reservation + commit, and the
/// shipment/box/part graph. The transaction closes before any courier
/// traffic so a slow carrier cannot hold locks on balance rows.
async fn persist(
    pool: &PgPool,
    prepared: &PreparedShipment,
    wallet_step: WalletStep,
) -> Result<(DateTime<Utc>, Vec<PendingEffect>), FulfillmentError> {
    let payload = &prepared.request;
    let actor = payload.requested_by.trim();
    let now = Utc::now();
    let mut effects = Vec::new();

    let mut tx = pool.begin().await?;

    if let WalletStep::Deduct = wallet_step {
        let movement = wallet::check_and_deduct(
            &mut tx,
            prepared.payer_account_id,
            prepared.breakdown.total,
            &format!("{}:debit", payload.reference.trim()),
            Some(prepared.shipment_id),
            actor,
        )
        .await?;
        effects.push(PendingEffect::notify(NotificationEvent::WalletDebited {
            account_id: movement.account_id,
            amount: movement.amount,
            reference: payload.reference.trim().to_string(),
            balance_after: movement.balance_after,
        }));
    }

    if prepared.classification.shipment_type == ShipmentType::Forward {
        for line in &prepared.parts {
            inventory::reserve_and_commit(
                &mut tx,
                payload.initiator_brand_id,
                &line.part_code,
                line.quantity,
                prepared.recipient_role.as_str(),
                prepared.shipment_id,
                actor,
            )
            .await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO shipments (
            id, reference, initiator_brand_id, initiator_id, initiator_role,
            recipient_id, recipient_role, shipment_type, direction, return_reason,
            priority, status, payer_role, payer_account_id, declared_value,
            total_weight, total_value, estimated_cost, insurance, cost_breakdown,
            pickup_address, drop_address, notes, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            $16, $17, $18, $19, $20, $21, $22, $23, $24, $24
        )
        "#,
    )
    .bind(prepared.shipment_id)
    .bind(payload.reference.trim())
    .bind(payload.initiator_brand_id)
    .bind(payload.initiator_id)
    .bind(prepared.initiator_role.as_str())
    .bind(payload.recipient_id)
    .bind(prepared.recipient_role.as_str())
    .bind(prepared.classification.shipment_type.as_str())
    .bind(prepared.classification.direction.as_str())
    .bind(prepared.return_reason.map(|reason| reason.as_str()))
    .bind(prepared.priority.as_str())
    .bind(ShipmentStatus::Persisted.as_str())
    .bind(prepared.classification.payer_role.as_str())
    .bind(prepared.payer_account_id)
    .bind(payload.declared_value)
    .bind(prepared.total_weight)
    .bind(prepared.total_value)
    .bind(prepared.breakdown.total)
    .bind(serde_json::to_value(&prepared.breakdown.insurance).unwrap_or_default())
    .bind(serde_json::to_value(&prepared.breakdown).unwrap_or_default())
    .bind(serde_json::to_value(&payload.pickup_address).unwrap_or_default())
    .bind(serde_json::to_value(&payload.drop_address).unwrap_or_default())
    .bind(payload.notes.as_deref())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (index, shipment_box) in payload.boxes.iter().enumerate() {
        let box_id = Uuid::new_v4();
        let box_value: Decimal = shipment_box
            .parts
            .iter()
            .map(|line| line.quantity * line.unit_value)
            .sum();

        sqlx::query(
            r#"
            INSERT INTO shipment_boxes (id, shipment_id, sequence, weight, value, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(box_id)
        .bind(prepared.shipment_id)
        .bind((index + 1) as i32)
        .bind(shipment_box.weight)
        .bind(box_value)
        .bind(ShipmentStatus::Persisted.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in &shipment_box.parts {
            sqlx::query(
                r#"
                INSERT INTO box_parts (box_id, part_code, quantity, unit_value)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(box_id)
            .bind(line.part_code.trim())
            .bind(line.quantity)
            .bind(line.unit_value)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    effects.push(PendingEffect::notify(NotificationEvent::ShipmentCreated {
        shipment_id: prepared.shipment_id,
        reference: payload.reference.trim().to_string(),
        status: ShipmentStatus::Persisted.as_str().to_string(),
    }));

    Ok((now, effects))
}

fn consignment_address(address: &ShipmentAddress) -> ConsignmentAddress {
    ConsignmentAddress {
        name: address.name.clone(),
        line1: address.line1.clone(),
        line2: address.line2.clone(),
        city: address.city.clone(),
        state: address.state.clone(),
        postal_code: address.postal_code.clone(),
        phone: address.phone.clone(),
    }
}

/// Best-effort courier booking after the reservation transaction has
/// committed. Failure of any shape parks the shipment in AWB_PENDING;
/// nothing is rolled back.
async fn book(
    pool: &PgPool,
    courier: &dyn CourierGateway,
    prepared: &PreparedShipment,
    effects: &mut Vec<PendingEffect>,
) -> Result<(ShipmentStatus, CourierResult), FulfillmentError> {
    let payload = &prepared.request;
    let consignment = ConsignmentRequest {
        reference: payload.reference.trim().to_string(),
        shipment_type: prepared.classification.shipment_type,
        pickup: consignment_address(&payload.pickup_address),
        drop: consignment_address(&payload.drop_address),
        weight: prepared.total_weight,
        declared_value: payload.declared_value,
        piece_count: payload.boxes.len() as u32,
    };

    settle_booking(
        pool,
        courier,
        &consignment,
        prepared.shipment_id,
        ShipmentStatus::Persisted,
        prepared.breakdown.total,
        effects,
    )
    .await
}

/// Shared by first booking and retries: calls the courier and applies the
/// outcome to the shipment row, guarded by the expected current status.
async fn settle_booking(
    pool: &PgPool,
    courier: &dyn CourierGateway,
    consignment: &ConsignmentRequest,
    shipment_id: Uuid,
    expected_status: ShipmentStatus,
    customer_price: Decimal,
    effects: &mut Vec<PendingEffect>,
) -> Result<(ShipmentStatus, CourierResult), FulfillmentError> {
    use partline_courier::BookingOutcome;

    let outcome = courier.book_consignment(consignment).await;
    let now = Utc::now();

    match outcome {
        BookingOutcome::Booked {
            awb,
            tracking_url,
            cost_estimate,
        } => {
            expected_status.ensure_transition(ShipmentStatus::Booked)?;
            let updated = sqlx::query(
                r#"
                UPDATE shipments
                SET status = $2, courier_awb = $3, courier_tracking_url = $4,
                    actual_cost = $5, booked_at = $6, updated_at = $6
                WHERE id = $1 AND status = $7
                "#,
            )
            .bind(shipment_id)
            .bind(ShipmentStatus::Booked.as_str())
            .bind(&awb)
            .bind(tracking_url.as_deref())
            .bind(cost_estimate)
            .bind(now)
            .bind(expected_status.as_str())
            .execute(pool)
            .await?
            .rows_affected();

            if updated == 0 {
                // The row moved under us, typically a concurrent cancel.
                let current = current_status(pool, shipment_id).await?;
                warn!(
                    %shipment_id, %awb, status = current.as_str(),
                    "booking outcome discarded, shipment moved concurrently"
                );
                return Ok((current, booking_conflict(current, awb, tracking_url)));
            }

            if let Some(courier_cost) = cost_estimate {
                margin::record_booking(pool, shipment_id, customer_price, courier_cost).await;
            }

            effects.push(PendingEffect::notify(
                NotificationEvent::ShipmentStatusChanged {
                    shipment_id,
                    from: expected_status.as_str().to_string(),
                    to: ShipmentStatus::Booked.as_str().to_string(),
                    awb: Some(awb.clone()),
                },
            ));
            info!(%shipment_id, %awb, "consignment booked");

            Ok((
                ShipmentStatus::Booked,
                CourierResult {
                    success: true,
                    awb: Some(awb),
                    tracking_url,
                    message: None,
                },
            ))
        }
        BookingOutcome::Unavailable { reason } => {
            let status = park_awb_pending(pool, shipment_id, expected_status, &reason).await?;
            Ok((
                status,
                CourierResult {
                    success: false,
                    awb: None,
                    tracking_url: None,
                    message: Some(reason),
                },
            ))
        }
        BookingOutcome::Inconsistent => {
            let reason = FulfillmentError::InconsistentCourierResponse.to_string();
            let status = park_awb_pending(pool, shipment_id, expected_status, &reason).await?;
            Ok((
                status,
                CourierResult {
                    success: false,
                    awb: None,
                    tracking_url: None,
                    message: Some(reason),
                },
            ))
        }
    }
}

async fn current_status(
    pool: &PgPool,
    shipment_id: Uuid,
) -> Result<ShipmentStatus, FulfillmentError> {
    let status: String = sqlx::query_scalar("SELECT status FROM shipments WHERE id = $1")
        .bind(shipment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| FulfillmentError::NotFound(format!("shipment {shipment_id}")))?;
    ShipmentStatus::parse(&status)
}

/// Result reported when the courier issued an AWB but the shipment row had
/// already moved on. The AWB is surfaced so an operator can void it with
/// the carrier.
fn booking_conflict(
    current: ShipmentStatus,
    awb: String,
    tracking_url: Option<String>,
) -> CourierResult {
    CourierResult {
        success: false,
        awb: Some(awb),
        tracking_url,
        message: Some(format!(
            "booking not recorded: shipment is {}",
            current.as_str()
        )),
    }
}

/// Returns the status the shipment ended up in: AWB_PENDING when the park
/// took effect, the actual current status when the row moved concurrently.
async fn park_awb_pending(
    pool: &PgPool,
    shipment_id: Uuid,
    expected_status: ShipmentStatus,
    reason: &str,
) -> Result<ShipmentStatus, FulfillmentError> {
    warn!(%shipment_id, reason, "courier booking failed, parking shipment");
    if expected_status == ShipmentStatus::AwbPending {
        // A failed retry stays where it is.
        return Ok(ShipmentStatus::AwbPending);
    }
    expected_status.ensure_transition(ShipmentStatus::AwbPending)?;
    let updated = sqlx::query(
        "UPDATE shipments SET status = $2, updated_at = $3 WHERE id = $1 AND status = $4",
    )
    .bind(shipment_id)
    .bind(ShipmentStatus::AwbPending.as_str())
    .bind(Utc::now())
    .bind(expected_status.as_str())
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return current_status(pool, shipment_id).await;
    }
    Ok(ShipmentStatus::AwbPending)
}

fn response_for(
    prepared: &PreparedShipment,
    status: ShipmentStatus,
    courier: CourierResult,
    created_at: DateTime<Utc>,
) -> CreateShipmentResponse {
    CreateShipmentResponse {
        shipment_id: prepared.shipment_id,
        reference: prepared.request.reference.trim().to_string(),
        status: status.as_str().to_string(),
        shipment_type: prepared.classification.shipment_type.as_str().to_string(),
        direction: prepared.classification.direction.as_str().to_string(),
        payer_role: prepared.classification.payer_role.as_str().to_string(),
        payer_account_id: prepared.payer_account_id,
        cost: prepared.breakdown.clone(),
        courier,
        created_at,
    }
}

/// The full single-shipment pipeline: validate, classify, price, reserve
/// funds and stock, persist the graph, then attempt the courier booking.
pub async fn create_shipment(
    pool: &PgPool,
    courier: &dyn CourierGateway,
    payload: &CreateShipmentRequest,
) -> Result<(CreateShipmentResponse, Vec<PendingEffect>), FulfillmentError> {
    if let Some(previous) = find_existing(pool, payload.reference.trim()).await? {
        return Ok((previous, Vec::new()));
    }

    let prepared = prepare(pool, payload).await?;
    let (created_at, mut effects) = persist(pool, &prepared, WalletStep::Deduct).await?;
    let (status, courier_result) = book(pool, courier, &prepared, &mut effects).await?;

    Ok((
        response_for(&prepared, status, courier_result, created_at),
        effects,
    ))
}

/// Re-invokes only the courier step for a shipment parked in AWB_PENDING.
/// Pricing and the wallet are never touched again.
pub async fn retry_booking(
    pool: &PgPool,
    courier: &dyn CourierGateway,
    shipment_id: Uuid,
    _payload: &RetryBookingRequest,
) -> Result<(CourierResult, Vec<PendingEffect>), FulfillmentError> {
    let row = sqlx::query(
        r#"
        SELECT reference, status, shipment_type, total_weight, declared_value,
               estimated_cost, pickup_address, drop_address,
               (SELECT COUNT(*) FROM shipment_boxes b WHERE b.shipment_id = shipments.id) AS box_count
        FROM shipments
        WHERE id = $1
        "#,
    )
    .bind(shipment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| FulfillmentError::NotFound(format!("shipment {shipment_id}")))?;

    let status = ShipmentStatus::parse(&row.try_get::<String, _>("status")?)?;
    if status != ShipmentStatus::AwbPending {
        return Err(FulfillmentError::InvalidTransition {
            from: status.as_str().to_string(),
            to: ShipmentStatus::Booked.as_str().to_string(),
        });
    }

    let pickup: ShipmentAddress = serde_json::from_value(row.try_get("pickup_address")?)
        .map_err(|err| FulfillmentError::Validation(format!("stored pickup address unreadable: {err}")))?;
    let drop: ShipmentAddress = serde_json::from_value(row.try_get("drop_address")?)
        .map_err(|err| FulfillmentError::Validation(format!("stored drop address unreadable: {err}")))?;

    let consignment = ConsignmentRequest {
        reference: row.try_get("reference")?,
        shipment_type: ShipmentType::parse(&row.try_get::<String, _>("shipment_type")?)?,
        pickup: consignment_address(&pickup),
        drop: consignment_address(&drop),
        weight: row.try_get("total_weight")?,
        declared_value: row.try_get("declared_value")?,
        piece_count: row.try_get::<i64, _>("box_count")? as u32,
    };

    let mut effects = Vec::new();
    let (_, courier_result) = settle_booking(
        pool,
        courier,
        &consignment,
        shipment_id,
        ShipmentStatus::AwbPending,
        row.try_get("estimated_cost")?,
        &mut effects,
    )
    .await?;

    Ok((courier_result, effects))
}

/// Bulk creation: every item is priced individually, the payer wallet is
/// debited once for the aggregate, then items proceed in bounded batches.
/// A failed item never aborts the batch; its share is refunded.
pub async fn bulk_create_shipments(
    pool: &PgPool,
    courier: &dyn CourierGateway,
    payload: &BulkCreateShipmentsRequest,
) -> Result<(BulkCreateShipmentsResponse, Vec<PendingEffect>), FulfillmentError> {
    if payload.reference.trim().is_empty() {
        return Err(FulfillmentError::Validation(
            "reference is required".to_string(),
        ));
    }
    if payload.shipments.is_empty() {
        return Err(FulfillmentError::Validation(
            "bulk request needs at least one shipment".to_string(),
        ));
    }

    let mut results: Vec<BulkItemResult> = Vec::with_capacity(payload.shipments.len());
    let mut prepared_items: Vec<(usize, PreparedShipment)> = Vec::new();

    for (index, item) in payload.shipments.iter().enumerate() {
        if let Some(previous) = find_existing(pool, item.reference.trim()).await? {
            results.push(BulkItemResult {
                index,
                shipment_id: Some(previous.shipment_id),
                status: Some(previous.status),
                courier: Some(previous.courier),
                error: None,
            });
            continue;
        }
        match prepare(pool, item).await {
            Ok(prepared) => prepared_items.push((index, prepared)),
            Err(err) => results.push(BulkItemResult {
                index,
                shipment_id: None,
                status: None,
                courier: None,
                error: Some(err.to_string()),
            }),
        }
    }

    // The aggregate deduction hits exactly one wallet; mixed payers would
    // make the single check-and-deduct meaningless.
    let payer_account_id = match prepared_items.first() {
        Some((_, first)) => {
            let payer = first.payer_account_id;
            if prepared_items.iter().any(|(_, p)| p.payer_account_id != payer) {
                return Err(FulfillmentError::Validation(
                    "bulk shipments must resolve to a single payer wallet".to_string(),
                ));
            }
            Some(payer)
        }
        None => None,
    };

    let mut effects: Vec<PendingEffect> = Vec::new();
    let mut total_debited = Decimal::ZERO;

    if let Some(payer_account_id) = payer_account_id {
        let aggregate: Decimal = prepared_items.iter().map(|(_, p)| p.breakdown.total).sum();
        let actor = payload.requested_by.trim();

        let mut tx = pool.begin().await?;
        let movement = wallet::check_and_deduct(
            &mut tx,
            payer_account_id,
            aggregate,
            &format!("{}:debit", payload.reference.trim()),
            None,
            actor,
        )
        .await?;
        tx.commit().await?;

        total_debited = movement.amount;
        if !movement.replayed {
            effects.push(PendingEffect::notify(NotificationEvent::WalletDebited {
                account_id: movement.account_id,
                amount: movement.amount,
                reference: payload.reference.trim().to_string(),
                balance_after: movement.balance_after,
            }));
        }

        for (batch_number, batch) in prepared_items.chunks(BULK_BATCH_SIZE).enumerate() {
            if batch_number > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(BULK_BATCH_DELAY_MS)).await;
            }

            let outcomes = join_all(batch.iter().map(|(index, prepared)| {
                process_bulk_item(pool, courier, payload, *index, prepared, payer_account_id)
            }))
            .await;

            for (result, item_effects) in outcomes {
                results.push(result);
                effects.extend(item_effects);
            }
        }
    }

    Ok((
        summarize(payload.reference.trim(), total_debited, results),
        effects,
    ))
}

/// Assembles the bulk response: items back in request order, created and
/// failed counted by whether a shipment row exists for the item.
fn summarize(
    reference: &str,
    total_debited: Decimal,
    mut items: Vec<BulkItemResult>,
) -> BulkCreateShipmentsResponse {
    items.sort_by_key(|item| item.index);
    let created = items.iter().filter(|item| item.shipment_id.is_some()).count();
    let failed = items.len() - created;

    BulkCreateShipmentsResponse {
        reference: reference.to_string(),
        total: items.len(),
        created,
        failed,
        total_debited,
        items,
    }
}

fn item_error(index: usize, err: FulfillmentError) -> BulkItemResult {
    BulkItemResult {
        index,
        shipment_id: None,
        status: None,
        courier: None,
        error: Some(err.to_string()),
    }
}

/// One item after the aggregate deduction. The item's share of that debit
/// is tracked under its own reference prefix: a persist failure refunds
/// the share, and a retried bulk request collects a refunded share again
/// before persisting, each movement under a fresh numbered reference so
/// replays of any single reference stay exact.
async fn process_bulk_item(
    pool: &PgPool,
    courier: &dyn CourierGateway,
    payload: &BulkCreateShipmentsRequest,
    index: usize,
    prepared: &PreparedShipment,
    payer_account_id: Uuid,
) -> (BulkItemResult, Vec<PendingEffect>) {
    let actor = payload.requested_by.trim();
    let share_prefix = format!("{}:item-{index}:", payload.reference.trim());

    let mut position = match wallet::share_position(pool, &share_prefix).await {
        Ok(position) => position,
        Err(err) => return (item_error(index, err), Vec::new()),
    };

    let mut effects = Vec::new();

    // A share refunded by an earlier failed attempt is no longer covered
    // by the aggregate debit and must be collected again first.
    if position.needs_redebit() {
        let reference = format!("{share_prefix}redebit-{}", position.next_redebit());
        let redebit = async {
            let mut tx = pool.begin().await?;
            let movement = wallet::check_and_deduct(
                &mut tx,
                payer_account_id,
                prepared.breakdown.total,
                &reference,
                None,
                actor,
            )
            .await?;
            tx.commit().await?;
            Ok::<_, FulfillmentError>(movement)
        }
        .await;

        match redebit {
            Ok(movement) => {
                position.redebits = position.next_redebit();
                if !movement.replayed {
                    effects.push(PendingEffect::notify(NotificationEvent::WalletDebited {
                        account_id: movement.account_id,
                        amount: movement.amount,
                        reference,
                        balance_after: movement.balance_after,
                    }));
                }
            }
            Err(err) => return (item_error(index, err), effects),
        }
    }

    match persist(pool, prepared, WalletStep::AlreadyDebited).await {
        Ok((_, persist_effects)) => {
            effects.extend(persist_effects);
            match book(pool, courier, prepared, &mut effects).await {
                Ok((status, courier_result)) => (
                    BulkItemResult {
                        index,
                        shipment_id: Some(prepared.shipment_id),
                        status: Some(status.as_str().to_string()),
                        courier: Some(courier_result),
                        error: None,
                    },
                    effects,
                ),
                Err(err) => (
                    BulkItemResult {
                        index,
                        shipment_id: Some(prepared.shipment_id),
                        status: Some(ShipmentStatus::AwbPending.as_str().to_string()),
                        courier: Some(CourierResult {
                            success: false,
                            awb: None,
                            tracking_url: None,
                            message: Some(err.to_string()),
                        }),
                        error: None,
                    },
                    effects,
                ),
            }
        }
        Err(err) => {
            let refund_reference = format!("{share_prefix}refund-{}", position.next_refund());
            let refund = async {
                let mut tx = pool.begin().await?;
                let movement = wallet::refund(
                    &mut tx,
                    payer_account_id,
                    prepared.breakdown.total,
                    &refund_reference,
                    None,
                    actor,
                )
                .await?;
                tx.commit().await?;
                Ok::<_, FulfillmentError>(movement)
            }
            .await;

            match refund {
                Ok(movement) if !movement.replayed => {
                    effects.push(PendingEffect::notify(NotificationEvent::WalletCredited {
                        account_id: movement.account_id,
                        amount: movement.amount,
                        reference: refund_reference,
                        balance_after: movement.balance_after,
                    }));
                }
                Ok(_) => {}
                Err(refund_err) => {
                    warn!(index, "bulk item refund failed: {refund_err}");
                }
            }

            (item_error(index, err), effects)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partline_core::Direction;

    fn classification(payer_role: PartyRole) -> Classification {
        Classification {
            shipment_type: ShipmentType::Forward,
            direction: Direction::Outbound,
            return_reason: None,
            payer_role,
        }
    }

    #[test]
    fn brand_payer_resolves_to_brand_wallet() {
        let brand = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let payer = resolve_payer(
            &classification(PartyRole::Brand),
            brand,
            brand,
            PartyRole::Brand,
            recipient,
            PartyRole::Customer,
        )
        .unwrap();
        assert_eq!(payer, brand);
    }

    #[test]
    fn recipient_side_payer_resolves_to_recipient_wallet() {
        let brand = Uuid::new_v4();
        let customer = Uuid::new_v4();
        let service_center = Uuid::new_v4();
        let payer = resolve_payer(
            &classification(PartyRole::ServiceCenter),
            brand,
            customer,
            PartyRole::Customer,
            service_center,
            PartyRole::ServiceCenter,
        )
        .unwrap();
        assert_eq!(payer, service_center);
    }

    #[test]
    fn payer_matching_neither_side_is_rejected() {
        let err = resolve_payer(
            &classification(PartyRole::Distributor),
            Uuid::new_v4(),
            Uuid::new_v4(),
            PartyRole::Customer,
            Uuid::new_v4(),
            PartyRole::ServiceCenter,
        )
        .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }

    fn part_line(part_code: &str, unit_value: i64) -> PartLineRequest {
        PartLineRequest {
            part_code: part_code.to_string(),
            quantity: Decimal::ONE,
            unit_value: Decimal::from(unit_value),
        }
    }

    #[test]
    fn duplicate_part_lines_within_a_box_are_caught() {
        let lines = vec![part_line("BRK-PAD", 50), part_line(" BRK-PAD ", 50)];
        assert_eq!(duplicate_part_line(&lines), Some("BRK-PAD"));

        let distinct = vec![part_line("BRK-PAD", 50), part_line("OIL-FLT", 9)];
        assert_eq!(duplicate_part_line(&distinct), None);
    }

    #[test]
    fn conflicting_booking_is_reported_not_recorded() {
        let result = booking_conflict(
            ShipmentStatus::Cancelled,
            "AWB00000042".to_string(),
            Some("https://track.example/AWB00000042".to_string()),
        );

        assert!(!result.success);
        assert_eq!(result.awb.as_deref(), Some("AWB00000042"));
        assert_eq!(
            result.message.as_deref(),
            Some("booking not recorded: shipment is CANCELLED")
        );
    }

    fn booked_item(index: usize) -> BulkItemResult {
        BulkItemResult {
            index,
            shipment_id: Some(Uuid::new_v4()),
            status: Some(ShipmentStatus::Booked.as_str().to_string()),
            courier: Some(CourierResult {
                success: true,
                awb: Some(format!("AWB0000000{index}")),
                tracking_url: None,
                message: None,
            }),
            error: None,
        }
    }

    #[test]
    fn bulk_summary_counts_a_parked_item_as_created() {
        let parked = BulkItemResult {
            index: 1,
            shipment_id: Some(Uuid::new_v4()),
            status: Some(ShipmentStatus::AwbPending.as_str().to_string()),
            courier: Some(CourierResult {
                success: false,
                awb: None,
                tracking_url: None,
                message: Some("courier timed out".to_string()),
            }),
            error: None,
        };

        let response = summarize(
            "BULK-7",
            Decimal::from(300),
            vec![booked_item(2), parked, booked_item(0)],
        );

        assert_eq!(response.total, 3);
        assert_eq!(response.created, 3);
        assert_eq!(response.failed, 0);
        assert_eq!(response.total_debited, Decimal::from(300));

        let indexes: Vec<usize> = response.items.iter().map(|item| item.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let second = &response.items[1];
        assert_eq!(second.status.as_deref(), Some("AWB_PENDING"));
        let courier = second.courier.as_ref().unwrap();
        assert!(!courier.success);
        assert_eq!(courier.message.as_deref(), Some("courier timed out"));
    }

    #[test]
    fn bulk_summary_counts_an_unpersisted_item_as_failed() {
        let response = summarize(
            "BULK-8",
            Decimal::from(200),
            vec![
                booked_item(0),
                item_error(
                    1,
                    FulfillmentError::Validation("box 1 weight must be positive".to_string()),
                ),
            ],
        );

        assert_eq!(response.created, 1);
        assert_eq!(response.failed, 1);
        let failed = &response.items[1];
        assert!(failed.shipment_id.is_none());
        assert!(failed.error.as_deref().unwrap().contains("weight"));
    }
}
