use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

pub fn compute_margin(customer_price: Decimal, courier_cost: Decimal) -> (Decimal, Decimal) {
    let margin = customer_price - courier_cost;
    let margin_pct = if customer_price.is_zero() {
        Decimal::ZERO
    } else {
        (margin / customer_price * Decimal::from(100)).round_dp(2)
    };
    (margin, margin_pct)
}

/// Persists the per-shipment profit for reporting. Side effect only:
/// failures are logged and swallowed, this must never block the pipeline.
pub async fn record_booking(
    pool: &PgPool,
    shipment_id: Uuid,
    customer_price: Decimal,
    courier_cost: Decimal,
) {
    let (margin, margin_pct) = compute_margin(customer_price, courier_cost);

    let result = sqlx::query(
        r#"
        INSERT INTO margin_records (
            id, shipment_id, customer_price, courier_cost, margin, margin_pct, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(shipment_id)
    .bind(customer_price)
    .bind(courier_cost)
    .bind(margin)
    .bind(margin_pct)
    .bind(Utc::now())
    .execute(pool)
    .await;

    if let Err(err) = result {
        warn!(%shipment_id, "failed to record margin: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_is_price_minus_cost() {
        let (margin, pct) = compute_margin(Decimal::new(6600, 2), Decimal::new(4800, 2));
        assert_eq!(margin, Decimal::new(1800, 2));
        assert_eq!(pct, Decimal::new(2727, 2)); // 18 / 66 = 27.27%
    }

    #[test]
    fn negative_margin_is_recorded_not_hidden() {
        let (margin, pct) = compute_margin(Decimal::from(50), Decimal::from(75));
        assert_eq!(margin, Decimal::from(-25));
        assert_eq!(pct, Decimal::from(-50));
    }

    #[test]
    fn zero_price_does_not_divide() {
        let (margin, pct) = compute_margin(Decimal::ZERO, Decimal::from(10));
        assert_eq!(margin, Decimal::from(-10));
        assert_eq!(pct, Decimal::ZERO);
    }
}
