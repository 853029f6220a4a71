use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use partline_core::FulfillmentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnType {
    Credit,
    Debit,
}

impl TxnType {
    pub fn as_str(self) -> &'static str {
        match self {
            TxnType::Credit => "CREDIT",
            TxnType::Debit => "DEBIT",
        }
    }
}

/// Balance check for a debit. The caller holds the balance row locked for
/// the duration of check-and-write; this function only decides.
pub fn decide_debit(current: Decimal, amount: Decimal) -> Result<Decimal, FulfillmentError> {
    if amount <= Decimal::ZERO {
        return Err(FulfillmentError::Validation(
            "debit amount must be positive".to_string(),
        ));
    }
    if current < amount {
        return Err(FulfillmentError::InsufficientBalance {
            current,
            required: amount,
            shortfall: amount - current,
        });
    }
    Ok(current - amount)
}

pub fn decide_credit(current: Decimal, amount: Decimal) -> Result<Decimal, FulfillmentError> {
    if amount <= Decimal::ZERO {
        return Err(FulfillmentError::Validation(
            "credit amount must be positive".to_string(),
        ));
    }
    Ok(current + amount)
}

/// Ledger position of one bulk item's share of an aggregate debit,
/// counted from the item-scoped transactions under the item's reference
/// prefix.
///
/// The share starts out held by the aggregate debit. Each failed attempt
/// refunds it and each retry collects it back before persisting, so the
/// share is held again exactly when the re-debits have caught up with
/// the refunds. Sequence numbers keep every reference unique, which is
/// what makes each individual movement replay-safe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShareLedger {
    pub refunds: u32,
    pub redebits: u32,
}

impl ShareLedger {
    /// True when an earlier attempt refunded the share and no re-debit
    /// has collected it back yet. Persisting in that state would create
    /// a shipment whose cost was never charged.
    pub fn needs_redebit(self) -> bool {
        self.refunds > self.redebits
    }

    /// Sequence number for the next re-debit reference.
    pub fn next_redebit(self) -> u32 {
        self.redebits + 1
    }

    /// Sequence number for the next refund reference.
    pub fn next_refund(self) -> u32 {
        self.refunds + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_within_balance_succeeds() {
        let after = decide_debit(Decimal::from(100), Decimal::from(60)).unwrap();
        assert_eq!(after, Decimal::from(40));
    }

    #[test]
    fn shortfall_is_reported_exactly() {
        let err = decide_debit(Decimal::from(100), Decimal::from(150)).unwrap_err();
        match err {
            FulfillmentError::InsufficientBalance {
                current,
                required,
                shortfall,
            } => {
                assert_eq!(current, Decimal::from(100));
                assert_eq!(required, Decimal::from(150));
                assert_eq!(shortfall, Decimal::from(50));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn balance_may_reach_zero_but_not_below() {
        assert_eq!(
            decide_debit(Decimal::from(100), Decimal::from(100)).unwrap(),
            Decimal::ZERO
        );
        assert!(decide_debit(Decimal::ZERO, Decimal::new(1, 2)).is_err());
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        assert!(decide_debit(Decimal::from(10), Decimal::ZERO).is_err());
        assert!(decide_credit(Decimal::from(10), Decimal::from(-5)).is_err());
    }

    #[test]
    fn credit_adds_exactly() {
        let after = decide_credit(Decimal::from(40), Decimal::new(6600, 2)).unwrap();
        assert_eq!(after, Decimal::new(10600, 2));
    }

    #[test]
    fn fresh_share_is_covered_by_the_aggregate_debit() {
        let share = ShareLedger::default();
        assert!(!share.needs_redebit());
    }

    #[test]
    fn refunded_share_must_be_collected_before_reuse() {
        // First attempt failed and refunded the share.
        let share = ShareLedger {
            refunds: 1,
            redebits: 0,
        };
        assert!(share.needs_redebit());
        assert_eq!(share.next_redebit(), 1);
    }

    #[test]
    fn collected_share_is_held_again() {
        let share = ShareLedger {
            refunds: 1,
            redebits: 1,
        };
        assert!(!share.needs_redebit());

        // A second failed attempt refunds again; a third retry collects.
        let share = ShareLedger {
            refunds: 2,
            redebits: 1,
        };
        assert!(share.needs_redebit());
        assert_eq!(share.next_redebit(), 2);
    }

    #[test]
    fn sequence_numbers_never_repeat_across_attempts() {
        let share = ShareLedger {
            refunds: 2,
            redebits: 2,
        };
        assert_eq!(share.next_refund(), 3);
        assert_eq!(share.next_redebit(), 3);
    }
}
