use serde::{Deserialize, Serialize};

use crate::errors::FulfillmentError;
use crate::models::{Direction, PartyRole, ReturnReason, ShipmentType};

/// Result of classifying a shipment request. Payer assignment is derived
/// here because pricing and wallet selection depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub shipment_type: ShipmentType,
    pub direction: Direction,
    pub return_reason: Option<ReturnReason>,
    pub payer_role: PartyRole,
}

/// Pure, total mapping over the supported role matrix. An unmapped pair is
/// a configuration error surfaced as `UnmappedRolePair`, never a guess.
pub fn classify(
    initiator: PartyRole,
    recipient: PartyRole,
    return_reason: Option<ReturnReason>,
) -> Result<Classification, FulfillmentError> {
    use PartyRole::*;

    let unmapped = || FulfillmentError::UnmappedRolePair {
        initiator: initiator.as_str().to_string(),
        recipient: recipient.as_str().to_string(),
        returning: return_reason.is_some(),
    };

    match return_reason {
        None => {
            // Forward legs flow down the distribution chain; the sender
            // pays the courier.
            let payer_role = match (initiator, recipient) {
                (Brand, Distributor) | (Brand, ServiceCenter) | (Brand, Customer) => Brand,
                (Distributor, ServiceCenter) | (Distributor, Customer) => Distributor,
                (ServiceCenter, Customer) => ServiceCenter,
                _ => return Err(unmapped()),
            };
            Ok(Classification {
                shipment_type: ShipmentType::Forward,
                direction: Direction::Outbound,
                return_reason: None,
                payer_role,
            })
        }
        Some(reason) => {
            // Reverse legs flow back up; the receiving business party pays.
            let payer_role = match (initiator, recipient) {
                (Customer, ServiceCenter) => ServiceCenter,
                (Customer, Distributor) => Distributor,
                (Customer, Brand) => Brand,
                (ServiceCenter, Distributor) => Distributor,
                (ServiceCenter, Brand) => Brand,
                (Distributor, Brand) => Brand,
                _ => return Err(unmapped()),
            };
            Ok(Classification {
                shipment_type: ShipmentType::Reverse,
                direction: Direction::Inbound,
                return_reason: Some(reason),
                payer_role,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PartyRole::*;

    #[test]
    fn forward_legs_bill_the_sender() {
        let c = classify(Brand, Customer, None).unwrap();
        assert_eq!(c.shipment_type, ShipmentType::Forward);
        assert_eq!(c.direction, Direction::Outbound);
        assert_eq!(c.payer_role, Brand);

        let c = classify(Distributor, ServiceCenter, None).unwrap();
        assert_eq!(c.payer_role, Distributor);
    }

    #[test]
    fn reverse_legs_bill_the_receiver() {
        let c = classify(Customer, ServiceCenter, Some(ReturnReason::Defective)).unwrap();
        assert_eq!(c.shipment_type, ShipmentType::Reverse);
        assert_eq!(c.direction, Direction::Inbound);
        assert_eq!(c.payer_role, ServiceCenter);
        assert_eq!(c.return_reason, Some(ReturnReason::Defective));

        let c = classify(ServiceCenter, Brand, Some(ReturnReason::WarrantyClaim)).unwrap();
        assert_eq!(c.payer_role, Brand);
    }

    #[test]
    fn every_valid_pair_maps_exactly_once() {
        let roles = [Brand, Distributor, ServiceCenter, Customer];
        let mut mapped = 0;
        for a in roles {
            for b in roles {
                for reason in [None, Some(ReturnReason::Defective)] {
                    if classify(a, b, reason).is_ok() {
                        mapped += 1;
                    }
                }
            }
        }
        // 6 forward pairs + 6 reverse pairs.
        assert_eq!(mapped, 12);
    }

    #[test]
    fn unmapped_pair_is_a_configuration_error() {
        let err = classify(Customer, Brand, None).unwrap_err();
        assert!(matches!(err, FulfillmentError::UnmappedRolePair { .. }));

        // A return shipped down the chain makes no sense either.
        let err = classify(Brand, Customer, Some(ReturnReason::WrongItem)).unwrap_err();
        assert!(matches!(err, FulfillmentError::UnmappedRolePair { .. }));
    }
}
