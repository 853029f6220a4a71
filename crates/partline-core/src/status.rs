use serde::{Deserialize, Serialize};

use crate::errors::FulfillmentError;

/// Shipment lifecycle. Booking failure parks the shipment in `AwbPending`
/// instead of tearing it down; money and stock stay committed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Initiated,
    Priced,
    Persisted,
    Booked,
    AwbPending,
    Dispatched,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
    Rto,
    Failed,
}

impl ShipmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ShipmentStatus::Initiated => "INITIATED",
            ShipmentStatus::Priced => "PRICED",
            ShipmentStatus::Persisted => "PERSISTED",
            ShipmentStatus::Booked => "BOOKED",
            ShipmentStatus::AwbPending => "AWB_PENDING",
            ShipmentStatus::Dispatched => "DISPATCHED",
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            ShipmentStatus::Delivered => "DELIVERED",
            ShipmentStatus::Cancelled => "CANCELLED",
            ShipmentStatus::Rto => "RTO",
            ShipmentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, FulfillmentError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INITIATED" => Ok(ShipmentStatus::Initiated),
            "PRICED" => Ok(ShipmentStatus::Priced),
            "PERSISTED" => Ok(ShipmentStatus::Persisted),
            "BOOKED" => Ok(ShipmentStatus::Booked),
            "AWB_PENDING" => Ok(ShipmentStatus::AwbPending),
            "DISPATCHED" => Ok(ShipmentStatus::Dispatched),
            "IN_TRANSIT" => Ok(ShipmentStatus::InTransit),
            "OUT_FOR_DELIVERY" => Ok(ShipmentStatus::OutForDelivery),
            "DELIVERED" => Ok(ShipmentStatus::Delivered),
            "CANCELLED" => Ok(ShipmentStatus::Cancelled),
            "RTO" => Ok(ShipmentStatus::Rto),
            "FAILED" => Ok(ShipmentStatus::Failed),
            other => Err(FulfillmentError::Validation(format!(
                "unsupported shipment status: {other}"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ShipmentStatus::Delivered
                | ShipmentStatus::Cancelled
                | ShipmentStatus::Rto
                | ShipmentStatus::Failed
        )
    }

    /// Operator cancellation is only allowed while the consignment has not
    /// physically left: any state before DISPATCHED.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            ShipmentStatus::Initiated
                | ShipmentStatus::Priced
                | ShipmentStatus::Persisted
                | ShipmentStatus::Booked
                | ShipmentStatus::AwbPending
        )
    }

    pub fn can_transition_to(self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        if self == next {
            return false;
        }
        if next == Cancelled {
            return self.is_cancellable();
        }
        match (self, next) {
            (Initiated, Priced) => true,
            (Priced, Persisted) => true,
            (Persisted, Booked) | (Persisted, AwbPending) => true,
            (AwbPending, Booked) => true,
            (Booked, Dispatched) => true,
            (Dispatched, InTransit) => true,
            (InTransit, OutForDelivery) => true,
            (InTransit, Rto) | (InTransit, Failed) => true,
            (OutForDelivery, Delivered) => true,
            (OutForDelivery, Rto) | (OutForDelivery, Failed) => true,
            _ => false,
        }
    }

    pub fn ensure_transition(self, next: ShipmentStatus) -> Result<(), FulfillmentError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(FulfillmentError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }

    /// Column stamped when this status is entered, where one exists.
    pub fn timestamp_column(self) -> Option<&'static str> {
        match self {
            ShipmentStatus::Booked => Some("booked_at"),
            ShipmentStatus::Dispatched => Some("dispatched_at"),
            ShipmentStatus::InTransit => Some("in_transit_at"),
            ShipmentStatus::OutForDelivery => Some("out_for_delivery_at"),
            ShipmentStatus::Delivered => Some("delivered_at"),
            ShipmentStatus::Cancelled => Some("cancelled_at"),
            ShipmentStatus::Rto | ShipmentStatus::Failed => Some("closed_at"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ShipmentStatus::*;

    #[test]
    fn happy_path_is_linear() {
        let path = [
            Initiated,
            Priced,
            Persisted,
            Booked,
            Dispatched,
            InTransit,
            OutForDelivery,
            Delivered,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn awb_pending_is_retriable_not_terminal() {
        assert!(Persisted.can_transition_to(AwbPending));
        assert!(AwbPending.can_transition_to(Booked));
        assert!(!AwbPending.is_terminal());
    }

    #[test]
    fn cancel_only_before_dispatch() {
        assert!(Booked.can_transition_to(Cancelled));
        assert!(AwbPending.can_transition_to(Cancelled));
        assert!(!Dispatched.can_transition_to(Cancelled));
        assert!(!InTransit.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
    }

    #[test]
    fn non_delivery_branches_are_terminal() {
        assert!(InTransit.can_transition_to(Rto));
        assert!(OutForDelivery.can_transition_to(Failed));
        assert!(Rto.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Rto.can_transition_to(InTransit));
    }

    #[test]
    fn no_skipping_forward() {
        assert!(!Persisted.can_transition_to(Dispatched));
        assert!(!Booked.can_transition_to(Delivered));
        assert!(!Dispatched.can_transition_to(OutForDelivery));
    }
}
