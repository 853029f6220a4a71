use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("recipient {recipient} is not an authorized {role} for brand {brand}")]
    RecipientNotAuthorized {
        brand: uuid::Uuid,
        recipient: uuid::Uuid,
        role: String,
    },

    #[error("no classification mapping for {initiator} -> {recipient} (return: {returning})")]
    UnmappedRolePair {
        initiator: String,
        recipient: String,
        returning: bool,
    },

    #[error("insufficient stock for {part}: available {available}, requested {requested}")]
    InsufficientStock {
        part: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("insufficient balance: current {current}, required {required}, shortfall {shortfall}")]
    InsufficientBalance {
        current: Decimal,
        required: Decimal,
        shortfall: Decimal,
    },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("courier reported success without a usable tracking id")]
    InconsistentCourierResponse,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
