use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use partline_pricing::CostBreakdown;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentAddress {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartLineRequest {
    pub part_code: String,
    pub quantity: Decimal,
    pub unit_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxRequest {
    pub weight: Decimal,
    pub parts: Vec<PartLineRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShipmentRequest {
    /// Caller-generated idempotency key; a replay returns the recorded
    /// outcome without deducting or reserving again.
    pub reference: String,
    pub initiator_brand_id: Uuid,
    /// Party physically sending the consignment; equals the brand id for
    /// brand-initiated legs.
    pub initiator_id: Uuid,
    pub initiator_role: String,
    pub recipient_id: Uuid,
    pub recipient_role: String,
    pub return_reason: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub declared_value: Decimal,
    #[serde(default)]
    pub is_express: bool,
    #[serde(default)]
    pub is_remote_area: bool,
    #[serde(default)]
    pub insurance_requested: bool,
    pub parts: Vec<PartLineRequest>,
    pub boxes: Vec<BoxRequest>,
    pub pickup_address: ShipmentAddress,
    pub drop_address: ShipmentAddress,
    pub notes: Option<String>,
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierResult {
    pub success: bool,
    pub awb: Option<String>,
    pub tracking_url: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShipmentResponse {
    pub shipment_id: Uuid,
    pub reference: String,
    pub status: String,
    pub shipment_type: String,
    pub direction: String,
    pub payer_role: String,
    pub payer_account_id: Uuid,
    pub cost: CostBreakdown,
    pub courier: CourierResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateShipmentsRequest {
    pub reference: String,
    pub shipments: Vec<CreateShipmentRequest>,
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub index: usize,
    pub shipment_id: Option<Uuid>,
    pub status: Option<String>,
    pub courier: Option<CourierResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateShipmentsResponse {
    pub reference: String,
    pub total: usize,
    pub created: usize,
    pub failed: usize,
    pub total_debited: Decimal,
    pub items: Vec<BulkItemResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelShipmentRequest {
    pub reason: Option<String>,
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelShipmentResponse {
    pub shipment_id: Uuid,
    pub status: String,
    pub refunded_amount: Decimal,
    pub refund_reference: String,
    pub stock_released: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryBookingRequest {
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditWalletRequest {
    pub amount: Decimal,
    pub reference: String,
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditWalletResponse {
    pub account_id: Uuid,
    pub transaction_id: Uuid,
    pub balance: Decimal,
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalanceView {
    pub account_id: Uuid,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddStockRequest {
    pub brand_id: Uuid,
    pub part_code: String,
    pub quantity: Decimal,
    pub source: String,
    pub reference: String,
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddStockResponse {
    pub brand_id: Uuid,
    pub part_code: String,
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryBalanceView {
    pub brand_id: Uuid,
    pub part_code: String,
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginRecordView {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub customer_price: Decimal,
    pub courier_cost: Decimal,
    pub margin: Decimal,
    pub margin_pct: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxView {
    pub box_id: Uuid,
    pub sequence: i32,
    pub weight: Decimal,
    pub value: Decimal,
    pub courier_awb: Option<String>,
    pub parts: Vec<PartLineRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentView {
    pub shipment_id: Uuid,
    pub reference: String,
    pub initiator_brand_id: Uuid,
    pub recipient_id: Uuid,
    pub recipient_role: String,
    pub shipment_type: String,
    pub direction: String,
    pub return_reason: Option<String>,
    pub priority: String,
    pub status: String,
    pub payer_role: String,
    pub payer_account_id: Uuid,
    pub declared_value: Decimal,
    pub total_weight: Decimal,
    pub total_value: Decimal,
    pub estimated_cost: Decimal,
    pub actual_cost: Option<Decimal>,
    pub courier_awb: Option<String>,
    pub courier_tracking_url: Option<String>,
    pub insurance: serde_json::Value,
    pub notes: Option<String>,
    pub boxes: Vec<BoxView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fire-and-forget notification payloads. Emission failures never fail
/// the operation they describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    ShipmentCreated {
        shipment_id: Uuid,
        reference: String,
        status: String,
    },
    ShipmentStatusChanged {
        shipment_id: Uuid,
        from: String,
        to: String,
        awb: Option<String>,
    },
    WalletDebited {
        account_id: Uuid,
        amount: Decimal,
        reference: String,
        balance_after: Decimal,
    },
    WalletCredited {
        account_id: Uuid,
        amount: Decimal,
        reference: String,
        balance_after: Decimal,
    },
}

/// Inbound courier webhook relay consumed by the ops worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingUpdateEvent {
    pub awb: String,
    pub courier_status: String,
    pub occurred_at: Option<DateTime<Utc>>,
}

fn default_priority() -> String {
    "MEDIUM".to_string()
}
