use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use partline_core::FulfillmentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAction {
    Add,
    Consumed,
    TransferOut,
    TransferIn,
    Reserve,
    Release,
}

impl LedgerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerAction::Add => "ADD",
            LedgerAction::Consumed => "CONSUMED",
            LedgerAction::TransferOut => "TRANSFER_OUT",
            LedgerAction::TransferIn => "TRANSFER_IN",
            LedgerAction::Reserve => "RESERVE",
            LedgerAction::Release => "RELEASE",
        }
    }
}

/// Projected stock position per (brand, part).
///
/// Invariants: `on_hand >= 0`, `reserved >= 0`, `available() >= 0`.
/// Only `reserve` and `release` change availability; `commit` moves
/// quantity out of both `on_hand` and `reserved` together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartBalance {
    pub on_hand: Decimal,
    pub reserved: Decimal,
}

impl PartBalance {
    pub fn available(&self) -> Decimal {
        self.on_hand - self.reserved
    }

    pub fn reserve(&mut self, part: &str, qty: Decimal) -> Result<(), FulfillmentError> {
        if qty <= Decimal::ZERO {
            return Err(FulfillmentError::Validation(format!(
                "reserve quantity for {part} must be positive"
            )));
        }
        if qty > self.available() {
            return Err(FulfillmentError::InsufficientStock {
                part: part.to_string(),
                available: self.available(),
                requested: qty,
            });
        }
        self.reserved += qty;
        Ok(())
    }

    /// Converts a reservation into an outbound movement. Availability is
    /// unchanged by this step.
    pub fn commit(&mut self, part: &str, qty: Decimal) -> Result<(), FulfillmentError> {
        if qty <= Decimal::ZERO || qty > self.reserved || qty > self.on_hand {
            return Err(FulfillmentError::Validation(format!(
                "cannot commit {qty} of {part}: on_hand {}, reserved {}",
                self.on_hand, self.reserved
            )));
        }
        self.on_hand -= qty;
        self.reserved -= qty;
        Ok(())
    }

    /// Reverses a reservation whether or not it was committed. Callers
    /// pass `was_committed` from the ledger, not from memory.
    pub fn release(&mut self, qty: Decimal, was_committed: bool) {
        if was_committed {
            self.on_hand += qty;
        } else {
            self.reserved = (self.reserved - qty).max(Decimal::ZERO);
        }
    }

    pub fn restock(&mut self, part: &str, qty: Decimal) -> Result<(), FulfillmentError> {
        if qty <= Decimal::ZERO {
            return Err(FulfillmentError::Validation(format!(
                "restock quantity for {part} must be positive"
            )));
        }
        self.on_hand += qty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(on_hand: i64, reserved: i64) -> PartBalance {
        PartBalance {
            on_hand: Decimal::from(on_hand),
            reserved: Decimal::from(reserved),
        }
    }

    #[test]
    fn reserve_reduces_available_by_exactly_qty() {
        let mut b = balance(10, 2);
        let before = b.available();
        b.reserve("FAN-01", Decimal::from(3)).unwrap();
        assert_eq!(b.available(), before - Decimal::from(3));
        assert_eq!(b.on_hand, Decimal::from(10));
    }

    #[test]
    fn reserve_never_drives_available_negative() {
        let mut b = balance(5, 4);
        let err = b.reserve("FAN-01", Decimal::from(2)).unwrap_err();
        match err {
            FulfillmentError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, Decimal::from(1));
                assert_eq!(requested, Decimal::from(2));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Balance untouched on failure.
        assert_eq!(b, balance(5, 4));
    }

    #[test]
    fn commit_leaves_available_unchanged() {
        let mut b = balance(10, 4);
        let before = b.available();
        b.commit("FAN-01", Decimal::from(4)).unwrap();
        assert_eq!(b.available(), before);
        assert_eq!(b.on_hand, Decimal::from(6));
        assert_eq!(b.reserved, Decimal::ZERO);
    }

    #[test]
    fn release_restores_pre_reservation_balance() {
        let mut b = balance(10, 0);
        b.reserve("FAN-01", Decimal::from(3)).unwrap();
        b.release(Decimal::from(3), false);
        assert_eq!(b, balance(10, 0));

        let mut b = balance(10, 0);
        b.reserve("FAN-01", Decimal::from(3)).unwrap();
        b.commit("FAN-01", Decimal::from(3)).unwrap();
        b.release(Decimal::from(3), true);
        assert_eq!(b, balance(10, 0));
    }

    #[test]
    fn commit_requires_a_reservation() {
        let mut b = balance(10, 0);
        assert!(b.commit("FAN-01", Decimal::from(1)).is_err());
    }
}
