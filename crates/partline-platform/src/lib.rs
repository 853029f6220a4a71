pub mod config;
pub mod contracts;
pub mod db;
pub mod events;

pub use config::{CourierConfig, ServiceConfig};
pub use contracts::{
    AddStockRequest, AddStockResponse, BoxRequest, BoxView, BulkCreateShipmentsRequest,
    BulkCreateShipmentsResponse, BulkItemResult, CancelShipmentRequest, CancelShipmentResponse,
    CourierResult, CreateShipmentRequest, CreateShipmentResponse, CreditWalletRequest,
    CreditWalletResponse, InventoryBalanceView, MarginRecordView, NotificationEvent,
    PartLineRequest, RetryBookingRequest, ShipmentAddress, ShipmentView, TrackingUpdateEvent,
    WalletBalanceView,
};
pub use db::connect_database;
pub use events::EventBus;

/// Channel carrying fire-and-forget notification events.
pub const NOTIFICATIONS_CHANNEL: &str = "partline.notifications";
/// Channel the ops worker consumes courier tracking updates from.
pub const TRACKING_CHANNEL: &str = "courier.tracking";
