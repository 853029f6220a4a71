use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use partline_core::Insurance;

/// Rate card for one (shipment type, payer role, brand) combination.
/// Loaded from `rate_cards`; a brand-agnostic row acts as the fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
    pub base_rate: Decimal,
    pub per_kg_rate: Decimal,
    pub express_surcharge: Decimal,
    pub remote_surcharge: Decimal,
    pub platform_markup_rate: Decimal,
    pub insurance_min_declared_value: Decimal,
    pub insurance_premium_rate: Decimal,
    pub insurance_gst_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostInput {
    pub box_count: u32,
    pub total_weight: Decimal,
    pub is_express: bool,
    pub is_remote_area: bool,
    pub declared_value: Decimal,
    pub insurance_requested: bool,
}

/// Discrete named components so every downstream ledger entry can be
/// audited against the quote. `total` is the single source of truth for
/// the amount later deducted from the payer wallet; nothing recomputes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub box_count: u32,
    pub base_rate: Decimal,
    pub weight_charge: Decimal,
    pub express_surcharge: Decimal,
    pub remote_surcharge: Decimal,
    pub markup: Decimal,
    pub insurance: Insurance,
    pub insurance_below_threshold: bool,
    pub total: Decimal,
}

/// Deterministic cost formula:
///
/// ```text
/// carriage = base + weight * per_kg + express? + remote?
/// total    = carriage * (1 + markup_rate)
/// total   += premium + premium * gst          (if insured)
/// ```
///
/// Insurance requested below the declared-value threshold is not applied;
/// the breakdown records that explicitly so the caller can see the request
/// was not honored.
pub fn compute_cost(card: &RateCard, input: &CostInput) -> CostBreakdown {
    let base_rate = card.base_rate;
    let weight_charge = (input.total_weight * card.per_kg_rate).round_dp(2);
    let express_surcharge = if input.is_express {
        card.express_surcharge
    } else {
        Decimal::ZERO
    };
    let remote_surcharge = if input.is_remote_area {
        card.remote_surcharge
    } else {
        Decimal::ZERO
    };

    let carriage = base_rate + weight_charge + express_surcharge + remote_surcharge;
    let markup = (carriage * card.platform_markup_rate).round_dp(2);
    let mut total = carriage + markup;

    let mut insurance = Insurance::None;
    let mut insurance_below_threshold = false;
    if input.insurance_requested {
        if input.declared_value >= card.insurance_min_declared_value {
            let premium = (input.declared_value * card.insurance_premium_rate).round_dp(2);
            let gst = (premium * card.insurance_gst_rate).round_dp(2);
            total += premium + gst;
            insurance = Insurance::CarrierRisk {
                declared_value: input.declared_value,
                premium,
                gst,
            };
        } else {
            insurance_below_threshold = true;
        }
    }

    CostBreakdown {
        box_count: input.box_count,
        base_rate,
        weight_charge,
        express_surcharge,
        remote_surcharge,
        markup,
        insurance,
        insurance_below_threshold,
        total: total.round_dp(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn card() -> RateCard {
        RateCard {
            base_rate: Decimal::from(50),
            per_kg_rate: Decimal::from(20),
            express_surcharge: Decimal::from(40),
            remote_surcharge: Decimal::from(25),
            platform_markup_rate: Decimal::new(10, 2), // 10%
            insurance_min_declared_value: Decimal::from(500),
            insurance_premium_rate: Decimal::new(2, 2), // 2%
            insurance_gst_rate: Decimal::new(18, 2),    // 18%
        }
    }

    fn input() -> CostInput {
        CostInput {
            box_count: 1,
            total_weight: Decimal::new(5, 1), // 0.5 kg
            is_express: false,
            is_remote_area: false,
            declared_value: Decimal::from(1000),
            insurance_requested: false,
        }
    }

    #[test]
    fn worked_example_totals_66() {
        let breakdown = compute_cost(&card(), &input());
        assert_eq!(breakdown.base_rate, Decimal::from(50));
        assert_eq!(breakdown.weight_charge, Decimal::from(10));
        assert_eq!(breakdown.markup, Decimal::from(6));
        assert_eq!(breakdown.total, Decimal::new(6600, 2));
        assert_eq!(breakdown.insurance, Insurance::None);
    }

    #[test]
    fn pricing_is_deterministic() {
        let a = compute_cost(&card(), &input());
        let b = compute_cost(&card(), &input());
        assert_eq!(a, b);
    }

    #[test]
    fn surcharges_are_added_before_markup() {
        let mut i = input();
        i.is_express = true;
        i.is_remote_area = true;
        let breakdown = compute_cost(&card(), &i);
        // (50 + 10 + 40 + 25) * 1.10 = 137.50
        assert_eq!(breakdown.total, Decimal::new(13750, 2));
    }

    #[test]
    fn insurance_applies_at_or_above_threshold() {
        let mut i = input();
        i.insurance_requested = true;
        let breakdown = compute_cost(&card(), &i);
        // premium = 1000 * 2% = 20, gst = 20 * 18% = 3.60
        assert_eq!(
            breakdown.insurance,
            Insurance::CarrierRisk {
                declared_value: Decimal::from(1000),
                premium: Decimal::from(20),
                gst: Decimal::new(360, 2),
            }
        );
        assert_eq!(breakdown.total, Decimal::new(6600, 2) + Decimal::new(2360, 2));
        assert!(!breakdown.insurance_below_threshold);
    }

    #[test]
    fn insurance_below_threshold_is_skipped_but_flagged() {
        let mut i = input();
        i.insurance_requested = true;
        i.declared_value = Decimal::from(499);
        let breakdown = compute_cost(&card(), &i);
        assert_eq!(breakdown.insurance, Insurance::None);
        assert!(breakdown.insurance_below_threshold);
        assert_eq!(breakdown.total, Decimal::new(6600, 2));
    }
}
