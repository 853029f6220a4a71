pub mod classify;
pub mod errors;
pub mod models;
pub mod status;

pub use classify::{Classification, classify};
pub use errors::FulfillmentError;
pub use models::{
    Direction, Insurance, PartQuantity, PartyRole, Priority, ReturnReason, ShipmentType,
    verify_packing,
};
pub use status::ShipmentStatus;
