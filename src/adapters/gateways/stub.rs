//! Stub gateway for non-production environments.
//!
//! Accepts the already-normalized field names verbatim; only registered
//! when `payment.allow_stub` is on.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::{amount_from, first_amount, first_string};
use crate::domain::commerce::NormalizedEvent;
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::PaymentGateway;

pub struct StubGateway;

impl PaymentGateway for StubGateway {
    fn provider(&self) -> &'static str {
        "stub"
    }

    fn normalize(&self, payload: &Value) -> Result<NormalizedEvent, CommerceError> {
        if !payload.is_object() {
            return Err(CommerceError::new(
                ErrorCode::PayloadInvalid,
                "stub payload must be a JSON object",
            ));
        }

        let paid_at = payload
            .get("paid_at")
            .and_then(|raw| amount_from(Some(raw)))
            .filter(|ts| *ts > 0)
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .or_else(|| parse_rfc3339(payload.get("paid_at")));

        Ok(NormalizedEvent {
            provider_event_id: first_string(payload, &["provider_event_id", "id"])
                .unwrap_or_default()
                .to_string(),
            order_no: first_string(payload, &["order_no"])
                .unwrap_or_default()
                .to_string(),
            event_type: first_string(payload, &["event_type"])
                .map(|t| t.to_lowercase())
                .unwrap_or_default(),
            amount_cents: first_amount(payload, &["amount_cents"]).unwrap_or(0),
            currency: first_string(payload, &["currency"])
                .unwrap_or("USD")
                .to_string(),
            external_trade_no: first_string(payload, &["external_trade_no"]).map(str::to_string),
            paid_at,
            refund_amount_cents: first_amount(payload, &["refund_amount_cents"]).unwrap_or(0),
            refund_reason: first_string(payload, &["refund_reason"]).map(str::to_string),
        })
    }
}

fn parse_rfc3339(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    raw.and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn passes_normalized_fields_through() {
        let payload = json!({
            "provider_event_id": "stub_1",
            "order_no": "ord_3",
            "amount_cents": 999,
            "currency": "usd"
        });
        let event = StubGateway.normalize(&payload).unwrap();
        assert_eq!(event.provider_event_id, "stub_1");
        assert_eq!(event.order_no, "ord_3");
        assert_eq!(event.amount_cents, 999);
        assert_eq!(event.normalized_event_type(), "payment_succeeded");
    }
}
