use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::FulfillmentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyRole {
    Brand,
    Distributor,
    ServiceCenter,
    Customer,
}

impl PartyRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PartyRole::Brand => "BRAND",
            PartyRole::Distributor => "DISTRIBUTOR",
            PartyRole::ServiceCenter => "SERVICE_CENTER",
            PartyRole::Customer => "CUSTOMER",
        }
    }

    pub fn parse(value: &str) -> Result<Self, FulfillmentError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BRAND" => Ok(PartyRole::Brand),
            "DISTRIBUTOR" => Ok(PartyRole::Distributor),
            "SERVICE_CENTER" => Ok(PartyRole::ServiceCenter),
            "CUSTOMER" => Ok(PartyRole::Customer),
            other => Err(FulfillmentError::Validation(format!(
                "unsupported party role: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentType {
    Forward,
    Reverse,
}

impl ShipmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ShipmentType::Forward => "FORWARD",
            ShipmentType::Reverse => "REVERSE",
        }
    }

    pub fn parse(value: &str) -> Result<Self, FulfillmentError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FORWARD" => Ok(ShipmentType::Forward),
            "REVERSE" => Ok(ShipmentType::Reverse),
            other => Err(FulfillmentError::Validation(format!(
                "unsupported shipment type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Outbound => "OUTBOUND",
            Direction::Inbound => "INBOUND",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnReason {
    Defective,
    WrongItem,
    NotRequired,
    WarrantyClaim,
}

impl ReturnReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ReturnReason::Defective => "DEFECTIVE",
            ReturnReason::WrongItem => "WRONG_ITEM",
            ReturnReason::NotRequired => "NOT_REQUIRED",
            ReturnReason::WarrantyClaim => "WARRANTY_CLAIM",
        }
    }

    pub fn parse(value: &str) -> Result<Self, FulfillmentError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEFECTIVE" => Ok(ReturnReason::Defective),
            "WRONG_ITEM" => Ok(ReturnReason::WrongItem),
            "NOT_REQUIRED" => Ok(ReturnReason::NotRequired),
            "WARRANTY_CLAIM" => Ok(ReturnReason::WarrantyClaim),
            other => Err(FulfillmentError::Validation(format!(
                "unsupported return reason: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Result<Self, FulfillmentError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "CRITICAL" => Ok(Priority::Critical),
            other => Err(FulfillmentError::Validation(format!(
                "unsupported priority: {other}"
            ))),
        }
    }
}

/// Insurance is decoded once at the boundary and carried as a sum type;
/// nothing downstream re-parses the stored descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Insurance {
    None,
    CarrierRisk {
        declared_value: Decimal,
        premium: Decimal,
        gst: Decimal,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartQuantity {
    pub part_code: String,
    pub quantity: Decimal,
}

/// The multiset of parts packed across all boxes must equal the requested
/// part quantities exactly. Called before anything is reserved.
pub fn verify_packing(
    requested: &[PartQuantity],
    packed: &[PartQuantity],
) -> Result<(), FulfillmentError> {
    if requested.is_empty() {
        return Err(FulfillmentError::Validation(
            "shipment must request at least one part".to_string(),
        ));
    }

    let mut wanted: BTreeMap<&str, Decimal> = BTreeMap::new();
    for line in requested {
        if line.quantity <= Decimal::ZERO {
            return Err(FulfillmentError::Validation(format!(
                "requested quantity for {} must be positive",
                line.part_code
            )));
        }
        *wanted.entry(line.part_code.as_str()).or_default() += line.quantity;
    }

    let mut got: BTreeMap<&str, Decimal> = BTreeMap::new();
    for line in packed {
        if line.quantity <= Decimal::ZERO {
            return Err(FulfillmentError::Validation(format!(
                "packed quantity for {} must be positive",
                line.part_code
            )));
        }
        *got.entry(line.part_code.as_str()).or_default() += line.quantity;
    }

    if wanted != got {
        return Err(FulfillmentError::Validation(
            "packed box contents do not match requested part quantities".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(part: &str, qty: i64) -> PartQuantity {
        PartQuantity {
            part_code: part.to_string(),
            quantity: Decimal::from(qty),
        }
    }

    #[test]
    fn packing_matches_across_boxes() {
        let requested = vec![line("FAN-01", 3), line("PCB-88", 1)];
        let packed = vec![line("FAN-01", 2), line("PCB-88", 1), line("FAN-01", 1)];
        assert!(verify_packing(&requested, &packed).is_ok());
    }

    #[test]
    fn packing_rejects_shortfall() {
        let requested = vec![line("FAN-01", 3)];
        let packed = vec![line("FAN-01", 2)];
        assert!(verify_packing(&requested, &packed).is_err());
    }

    #[test]
    fn packing_rejects_extra_part() {
        let requested = vec![line("FAN-01", 1)];
        let packed = vec![line("FAN-01", 1), line("PCB-88", 1)];
        assert!(verify_packing(&requested, &packed).is_err());
    }

    #[test]
    fn packing_rejects_zero_quantity() {
        let requested = vec![line("FAN-01", 0)];
        let packed = vec![line("FAN-01", 0)];
        assert!(verify_packing(&requested, &packed).is_err());
    }
}
