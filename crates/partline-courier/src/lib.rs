use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use partline_core::ShipmentType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentAddress {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub phone: String,
}

/// Booking request for one physical consignment. `reference` is generated
/// by the caller and is the dedup key across retries; for REVERSE
/// shipments the courier treats `pickup` as the customer-side address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsignmentRequest {
    pub reference: String,
    pub shipment_type: ShipmentType,
    pub pickup: ConsignmentAddress,
    pub drop: ConsignmentAddress,
    pub weight: Decimal,
    pub declared_value: Decimal,
    pub piece_count: u32,
}

/// Normalized result of a booking attempt. The orchestrator maps
/// `Unavailable` and `Inconsistent` to the AWB_PENDING shipment state;
/// neither rolls anything back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookingOutcome {
    Booked {
        awb: String,
        tracking_url: Option<String>,
        cost_estimate: Option<Decimal>,
    },
    Unavailable {
        reason: String,
    },
    /// 2xx response without a usable tracking id.
    Inconsistent,
}

#[async_trait]
pub trait CourierGateway: Send + Sync {
    async fn book_consignment(&self, request: &ConsignmentRequest) -> BookingOutcome;
}

#[derive(Debug, Deserialize)]
struct BookingResponseBody {
    success: bool,
    tracking_id: Option<String>,
    tracking_url: Option<String>,
    cost_estimate: Option<Decimal>,
    error: Option<String>,
}

/// Maps the wire response to an outcome. A success flag without a
/// non-empty tracking id is not a booking.
fn normalize_response(body: BookingResponseBody) -> BookingOutcome {
    if !body.success {
        return BookingOutcome::Unavailable {
            reason: body
                .error
                .unwrap_or_else(|| "courier rejected the consignment".to_string()),
        };
    }
    match body.tracking_id {
        Some(awb) if !awb.trim().is_empty() => BookingOutcome::Booked {
            awb: awb.trim().to_string(),
            tracking_url: body.tracking_url,
            cost_estimate: body.cost_estimate,
        },
        _ => BookingOutcome::Inconsistent,
    }
}

pub struct HttpCourierGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCourierGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CourierGateway for HttpCourierGateway {
    async fn book_consignment(&self, request: &ConsignmentRequest) -> BookingOutcome {
        let url = format!("{}/consignments", self.base_url);
        let response = match self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(reference = %request.reference, "courier call failed: {err}");
                let reason = if err.is_timeout() {
                    "courier booking timed out".to_string()
                } else {
                    format!("courier unreachable: {err}")
                };
                return BookingOutcome::Unavailable { reason };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(reference = %request.reference, %status, "courier returned non-success");
            return BookingOutcome::Unavailable {
                reason: format!("courier returned {status}: {body}"),
            };
        }

        match response.json::<BookingResponseBody>().await {
            Ok(body) => normalize_response(body),
            Err(err) => {
                warn!(reference = %request.reference, "courier response unreadable: {err}");
                BookingOutcome::Inconsistent
            }
        }
    }
}

/// Scripted in-memory courier used by tests and local runs. Outcomes are
/// keyed by reference; repeated bookings of the same reference return the
/// originally issued AWB, mirroring the real carrier's dedup behavior.
#[derive(Default)]
pub struct InMemoryCourier {
    scripted: RwLock<HashMap<String, BookingOutcome>>,
    issued: RwLock<HashMap<String, BookingOutcome>>,
    sequence: RwLock<u64>,
}

impl InMemoryCourier {
    pub async fn script(&self, reference: &str, outcome: BookingOutcome) {
        self.scripted
            .write()
            .await
            .insert(reference.to_string(), outcome);
    }

    pub async fn booked_count(&self) -> usize {
        self.issued.read().await.len()
    }
}

#[async_trait]
impl CourierGateway for InMemoryCourier {
    async fn book_consignment(&self, request: &ConsignmentRequest) -> BookingOutcome {
        if let Some(previous) = self.issued.read().await.get(&request.reference) {
            return previous.clone();
        }
        if let Some(outcome) = self.scripted.read().await.get(&request.reference) {
            if let BookingOutcome::Booked { .. } = outcome {
                self.issued
                    .write()
                    .await
                    .insert(request.reference.clone(), outcome.clone());
            }
            return outcome.clone();
        }

        let mut sequence = self.sequence.write().await;
        *sequence += 1;
        let outcome = BookingOutcome::Booked {
            awb: format!("AWB{:08}", *sequence),
            tracking_url: None,
            cost_estimate: None,
        };
        self.issued
            .write()
            .await
            .insert(request.reference.clone(), outcome.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ConsignmentAddress {
        ConsignmentAddress {
            name: "Northside Service Center".to_string(),
            line1: "14 Industrial Estate".to_string(),
            line2: None,
            city: "Pune".to_string(),
            state: "MH".to_string(),
            postal_code: "411001".to_string(),
            phone: "9800000000".to_string(),
        }
    }

    fn request(reference: &str) -> ConsignmentRequest {
        ConsignmentRequest {
            reference: reference.to_string(),
            shipment_type: ShipmentType::Forward,
            pickup: address(),
            drop: address(),
            weight: Decimal::new(5, 1),
            declared_value: Decimal::from(1000),
            piece_count: 1,
        }
    }

    #[test]
    fn success_without_tracking_id_is_inconsistent() {
        let outcome = normalize_response(BookingResponseBody {
            success: true,
            tracking_id: None,
            tracking_url: None,
            cost_estimate: None,
            error: None,
        });
        assert_eq!(outcome, BookingOutcome::Inconsistent);

        let outcome = normalize_response(BookingResponseBody {
            success: true,
            tracking_id: Some("   ".to_string()),
            tracking_url: None,
            cost_estimate: None,
            error: None,
        });
        assert_eq!(outcome, BookingOutcome::Inconsistent);
    }

    #[test]
    fn declared_failure_carries_the_carrier_reason() {
        let outcome = normalize_response(BookingResponseBody {
            success: false,
            tracking_id: None,
            tracking_url: None,
            cost_estimate: None,
            error: Some("pincode not serviceable".to_string()),
        });
        assert_eq!(
            outcome,
            BookingOutcome::Unavailable {
                reason: "pincode not serviceable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn in_memory_courier_dedups_by_reference() {
        let courier = InMemoryCourier::default();
        let first = courier.book_consignment(&request("ship-1")).await;
        let second = courier.book_consignment(&request("ship-1")).await;
        assert_eq!(first, second);
        assert_eq!(courier.booked_count().await, 1);

        let third = courier.book_consignment(&request("ship-2")).await;
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn scripted_outcomes_override_default_booking() {
        let courier = InMemoryCourier::default();
        courier
            .script(
                "ship-down",
                BookingOutcome::Unavailable {
                    reason: "gateway 503".to_string(),
                },
            )
            .await;
        let outcome = courier.book_consignment(&request("ship-down")).await;
        assert!(matches!(outcome, BookingOutcome::Unavailable { .. }));
    }
}
