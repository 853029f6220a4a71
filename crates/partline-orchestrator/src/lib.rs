pub mod cancel;
pub mod create;
pub mod effects;
pub mod inventory;
pub mod margin;
pub mod tracking;
pub mod wallet;

pub use cancel::cancel_shipment;
pub use create::{bulk_create_shipments, create_shipment, retry_booking};
pub use effects::PendingEffect;
pub use tracking::apply_tracking_update;

/// Items per concurrent bulk batch.
pub const BULK_BATCH_SIZE: usize = 5;
/// Pause between bulk batches, bounding load on the courier gateway.
pub const BULK_BATCH_DELAY_MS: u64 = 200;
