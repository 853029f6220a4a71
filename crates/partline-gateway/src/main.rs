use std::{
    cmp::{max, min},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{error, info};
use uuid::Uuid;

use partline_core::FulfillmentError;
use partline_courier::{CourierGateway, HttpCourierGateway};
use partline_orchestrator::{
    PendingEffect, apply_tracking_update, bulk_create_shipments, cancel_shipment, create_shipment,
    retry_booking,
};
use partline_platform::{
    AddStockRequest, AddStockResponse, BoxView, BulkCreateShipmentsRequest,
    BulkCreateShipmentsResponse, CancelShipmentRequest, CancelShipmentResponse,
    CreateShipmentRequest, CreateShipmentResponse, CreditWalletRequest, CreditWalletResponse,
    CourierResult, EventBus, InventoryBalanceView, MarginRecordView, NotificationEvent,
    PartLineRequest, RetryBookingRequest, ServiceConfig, ShipmentView, TrackingUpdateEvent,
    WalletBalanceView, connect_database,
};

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    events: EventBus,
    courier: Arc<dyn CourierGateway>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListMarginsQuery {
    shipment_id: Option<Uuid>,
    limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListMarginsResponse {
    items: Vec<MarginRecordView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RetryBookingResponse {
    shipment_id: Uuid,
    courier: CourierResult,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "partline_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    let events = EventBus::connect(&config.redis_url)?;
    let courier: Arc<dyn CourierGateway> = Arc::new(HttpCourierGateway::new(
        &config.courier.base_url,
        &config.courier.api_key,
        Duration::from_secs(config.courier.timeout_secs),
    )?);

    let state = AppState {
        pool,
        events,
        courier,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/shipments", post(create_shipment_handler))
        .route("/shipments/bulk", post(bulk_create_handler))
        .route("/shipments/{shipment_id}", get(get_shipment))
        .route("/shipments/{shipment_id}/cancel", post(cancel_handler))
        .route(
            "/shipments/{shipment_id}/retry-booking",
            post(retry_booking_handler),
        )
        .route("/tracking/updates", post(tracking_update_handler))
        .route("/wallet/{account_id}", get(get_wallet))
        .route("/wallet/{account_id}/credit", post(credit_wallet_handler))
        .route("/inventory/stock", post(add_stock_handler))
        .route(
            "/inventory/{brand_id}/{part_code}",
            get(get_inventory_balance),
        )
        .route("/margins", get(list_margins))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

fn error_response(err: FulfillmentError) -> (StatusCode, String) {
    match &err {
        FulfillmentError::Validation(_)
        | FulfillmentError::UnmappedRolePair { .. }
        | FulfillmentError::RecipientNotAuthorized { .. } => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        FulfillmentError::InsufficientStock { .. }
        | FulfillmentError::InsufficientBalance { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        FulfillmentError::InvalidTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        FulfillmentError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        _ => {
            error!("internal error: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    error!("internal error: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error".to_string(),
    )
}

/// Publishes pending effects after the orchestration transaction has
/// committed. Delivery is fire-and-forget; the bus logs failed publishes.
async fn dispatch_effects(state: &AppState, effects: Vec<PendingEffect>) {
    for effect in effects {
        state.events.emit(effect.channel, &effect.event).await;
    }
}

async fn create_shipment_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateShipmentRequest>,
) -> Result<(StatusCode, Json<CreateShipmentResponse>), (StatusCode, String)> {
    let (response, effects) = create_shipment(&state.pool, state.courier.as_ref(), &payload)
        .await
        .map_err(error_response)?;

    dispatch_effects(&state, effects).await;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn bulk_create_handler(
    State(state): State<AppState>,
    Json(payload): Json<BulkCreateShipmentsRequest>,
) -> Result<(StatusCode, Json<BulkCreateShipmentsResponse>), (StatusCode, String)> {
    let (response, effects) = bulk_create_shipments(&state.pool, state.courier.as_ref(), &payload)
        .await
        .map_err(error_response)?;

    dispatch_effects(&state, effects).await;

    Ok((StatusCode::OK, Json(response)))
}

async fn cancel_handler(
    State(state): State<AppState>,
    Path(shipment_id): Path<Uuid>,
    Json(payload): Json<CancelShipmentRequest>,
) -> Result<Json<CancelShipmentResponse>, (StatusCode, String)> {
    let (response, effects) = cancel_shipment(&state.pool, shipment_id, &payload)
        .await
        .map_err(error_response)?;

    dispatch_effects(&state, effects).await;

    Ok(Json(response))
}

async fn retry_booking_handler(
    State(state): State<AppState>,
    Path(shipment_id): Path<Uuid>,
    Json(payload): Json<RetryBookingRequest>,
) -> Result<Json<RetryBookingResponse>, (StatusCode, String)> {
    let (courier, effects) = retry_booking(&state.pool, state.courier.as_ref(), shipment_id, &payload)
        .await
        .map_err(error_response)?;

    dispatch_effects(&state, effects).await;

    Ok(Json(RetryBookingResponse {
        shipment_id,
        courier,
    }))
}

/// Manual relay for courier webhooks, useful when the Redis channel the
/// ops worker listens on is not wired up in an environment.
async fn tracking_update_handler(
    State(state): State<AppState>,
    Json(payload): Json<TrackingUpdateEvent>,
) -> Result<StatusCode, (StatusCode, String)> {
    let applied = apply_tracking_update(&state.pool, &payload, "courier-webhook")
        .await
        .map_err(error_response)?;

    match applied {
        Some(effects) => {
            dispatch_effects(&state, effects).await;
            Ok(StatusCode::OK)
        }
        None => Ok(StatusCode::ACCEPTED),
    }
}

async fn get_shipment(
    State(state): State<AppState>,
    Path(shipment_id): Path<Uuid>,
) -> Result<Json<ShipmentView>, (StatusCode, String)> {
    let row = sqlx::query(
        r#"
        SELECT
            id, reference, initiator_brand_id, recipient_id, recipient_role,
            shipment_type, direction, return_reason, priority, status,
            payer_role, payer_account_id, declared_value, total_weight,
            total_value, estimated_cost, actual_cost, courier_awb,
            courier_tracking_url, insurance, notes, created_at, updated_at
        FROM shipments
        WHERE id = $1
        "#,
    )
    .bind(shipment_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "shipment not found".to_string()));
    };

    let box_rows = sqlx::query(
        r#"
        SELECT id, sequence, weight, value, courier_awb
        FROM shipment_boxes
        WHERE shipment_id = $1
        ORDER BY sequence
        "#,
    )
    .bind(shipment_id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut boxes = Vec::with_capacity(box_rows.len());
    for box_row in box_rows {
        let box_id: Uuid = box_row.try_get("id").map_err(internal_error)?;
        let part_rows = sqlx::query(
            "SELECT part_code, quantity, unit_value FROM box_parts WHERE box_id = $1 ORDER BY part_code",
        )
        .bind(box_id)
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;

        let mut parts = Vec::with_capacity(part_rows.len());
        for part_row in part_rows {
            parts.push(PartLineRequest {
                part_code: part_row.try_get("part_code").map_err(internal_error)?,
                quantity: part_row.try_get("quantity").map_err(internal_error)?,
                unit_value: part_row.try_get("unit_value").map_err(internal_error)?,
            });
        }

        boxes.push(BoxView {
            box_id,
            sequence: box_row.try_get("sequence").map_err(internal_error)?,
            weight: box_row.try_get("weight").map_err(internal_error)?,
            value: box_row.try_get("value").map_err(internal_error)?,
            courier_awb: box_row.try_get("courier_awb").map_err(internal_error)?,
            parts,
        });
    }

    Ok(Json(ShipmentView {
        shipment_id,
        reference: row.try_get("reference").map_err(internal_error)?,
        initiator_brand_id: row.try_get("initiator_brand_id").map_err(internal_error)?,
        recipient_id: row.try_get("recipient_id").map_err(internal_error)?,
        recipient_role: row.try_get("recipient_role").map_err(internal_error)?,
        shipment_type: row.try_get("shipment_type").map_err(internal_error)?,
        direction: row.try_get("direction").map_err(internal_error)?,
        return_reason: row.try_get("return_reason").map_err(internal_error)?,
        priority: row.try_get("priority").map_err(internal_error)?,
        status: row.try_get("status").map_err(internal_error)?,
        payer_role: row.try_get("payer_role").map_err(internal_error)?,
        payer_account_id: row.try_get("payer_account_id").map_err(internal_error)?,
        declared_value: row.try_get("declared_value").map_err(internal_error)?,
        total_weight: row.try_get("total_weight").map_err(internal_error)?,
        total_value: row.try_get("total_value").map_err(internal_error)?,
        estimated_cost: row.try_get("estimated_cost").map_err(internal_error)?,
        actual_cost: row.try_get("actual_cost").map_err(internal_error)?,
        courier_awb: row.try_get("courier_awb").map_err(internal_error)?,
        courier_tracking_url: row.try_get("courier_tracking_url").map_err(internal_error)?,
        insurance: row.try_get("insurance").map_err(internal_error)?,
        notes: row.try_get("notes").map_err(internal_error)?,
        boxes,
        created_at: row.try_get("created_at").map_err(internal_error)?,
        updated_at: row.try_get("updated_at").map_err(internal_error)?,
    }))
}

async fn credit_wallet_handler(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<CreditWalletRequest>,
) -> Result<Json<CreditWalletResponse>, (StatusCode, String)> {
    if payload.reference.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "reference is required".to_string()));
    }
    if payload.requested_by.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "requested_by is required".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let movement = partline_orchestrator::wallet::credit(
        &mut tx,
        account_id,
        payload.amount,
        payload.reference.trim(),
        None,
        payload.requested_by.trim(),
    )
    .await
    .map_err(error_response)?;
    tx.commit().await.map_err(internal_error)?;

    if !movement.replayed {
        dispatch_effects(
            &state,
            vec![PendingEffect::notify(NotificationEvent::WalletCredited {
                account_id,
                amount: movement.amount,
                reference: payload.reference.trim().to_string(),
                balance_after: movement.balance_after,
            })],
        )
        .await;
    }

    Ok(Json(CreditWalletResponse {
        account_id,
        transaction_id: movement.transaction_id,
        balance: movement.balance_after,
        replayed: movement.replayed,
    }))
}

async fn get_wallet(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<WalletBalanceView>, (StatusCode, String)> {
    let row = sqlx::query("SELECT balance, updated_at FROM wallet_accounts WHERE account_id = $1")
        .bind(account_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "wallet account not found".to_string()));
    };

    Ok(Json(WalletBalanceView {
        account_id,
        balance: row.try_get("balance").map_err(internal_error)?,
        updated_at: row.try_get("updated_at").map_err(internal_error)?,
    }))
}

async fn add_stock_handler(
    State(state): State<AppState>,
    Json(payload): Json<AddStockRequest>,
) -> Result<Json<AddStockResponse>, (StatusCode, String)> {
    if payload.reference.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "reference is required".to_string()));
    }
    if payload.requested_by.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "requested_by is required".to_string(),
        ));
    }
    let part_code = payload.part_code.trim().to_string();
    if part_code.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "part_code is required".to_string()));
    }

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let balance = partline_orchestrator::inventory::add_stock(
        &mut tx,
        payload.brand_id,
        &part_code,
        payload.quantity,
        payload.source.trim(),
        payload.reference.trim(),
        payload.requested_by.trim(),
    )
    .await
    .map_err(error_response)?;
    tx.commit().await.map_err(internal_error)?;

    Ok(Json(AddStockResponse {
        brand_id: payload.brand_id,
        part_code,
        on_hand: balance.on_hand,
        reserved: balance.reserved,
        available: balance.available(),
    }))
}

async fn get_inventory_balance(
    State(state): State<AppState>,
    Path((brand_id, part_code)): Path<(Uuid, String)>,
) -> Result<Json<InventoryBalanceView>, (StatusCode, String)> {
    let row = sqlx::query(
        "SELECT on_hand, reserved, updated_at FROM inventory_balances WHERE brand_id = $1 AND part_code = $2",
    )
    .bind(brand_id)
    .bind(part_code.trim())
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((
            StatusCode::NOT_FOUND,
            "inventory balance not found".to_string(),
        ));
    };

    let on_hand: Decimal = row.try_get("on_hand").map_err(internal_error)?;
    let reserved: Decimal = row.try_get("reserved").map_err(internal_error)?;

    Ok(Json(InventoryBalanceView {
        brand_id,
        part_code: part_code.trim().to_string(),
        on_hand,
        reserved,
        available: on_hand - reserved,
        updated_at: row.try_get("updated_at").map_err(internal_error)?,
    }))
}

async fn list_margins(
    State(state): State<AppState>,
    Query(query): Query<ListMarginsQuery>,
) -> Result<Json<ListMarginsResponse>, (StatusCode, String)> {
    let limit = min(max(query.limit.unwrap_or(50), 1), 200);

    let rows = sqlx::query(
        r#"
        SELECT id, shipment_id, customer_price, courier_cost, margin, margin_pct, created_at
        FROM margin_records
        WHERE ($1::uuid IS NULL OR shipment_id = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(query.shipment_id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(MarginRecordView {
            id: row.try_get("id").map_err(internal_error)?,
            shipment_id: row.try_get("shipment_id").map_err(internal_error)?,
            customer_price: row.try_get("customer_price").map_err(internal_error)?,
            courier_cost: row.try_get("courier_cost").map_err(internal_error)?,
            margin: row.try_get("margin").map_err(internal_error)?,
            margin_pct: row.try_get("margin_pct").map_err(internal_error)?,
            created_at: row.try_get("created_at").map_err(internal_error)?,
        });
    }

    Ok(Json(ListMarginsResponse { items }))
}
