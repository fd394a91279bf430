//! Stripe payload normalizer.
//!
//! Handles both real Stripe envelopes (`{ id, type, data: { object: .. } }`)
//! and flattened test payloads. Everything here is extraction; amounts
//! and currency are validated against the order later.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::{first_amount, first_string};
use crate::domain::commerce::NormalizedEvent;
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::PaymentGateway;

pub struct StripeGateway;

impl PaymentGateway for StripeGateway {
    fn provider(&self) -> &'static str {
        "stripe"
    }

    fn normalize(&self, payload: &Value) -> Result<NormalizedEvent, CommerceError> {
        if !payload.is_object() {
            return Err(CommerceError::new(
                ErrorCode::PayloadInvalid,
                "stripe payload must be a JSON object",
            ));
        }

        let object = payload
            .get("data")
            .and_then(|d| d.get("object"))
            .filter(|o| o.is_object())
            .cloned()
            .unwrap_or(Value::Null);

        let provider_event_id = first_string(payload, &["id"])
            .or_else(|| first_string(&object, &["id", "charge", "payment_intent"]))
            .unwrap_or_default()
            .to_string();

        let order_no = first_string(payload, &["order_no", "orderNo", "order"])
            .map(str::to_string)
            .or_else(|| {
                object
                    .get("metadata")
                    .and_then(|m| first_string(m, &["order_no", "orderNo", "order"]))
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let external_trade_no =
            first_string(&object, &["id", "charge", "payment_intent"]).map(str::to_string);

        let amount_cents = first_amount(&object, &["amount", "amount_total", "amount_captured"])
            .filter(|a| *a != 0)
            .or_else(|| first_amount(payload, &["amount", "amount_total"]))
            .unwrap_or(0);

        let currency = first_string(&object, &["currency"])
            .or_else(|| first_string(payload, &["currency"]))
            .unwrap_or("USD")
            .to_string();

        let refund_amount_cents = resolve_refund_amount(payload, &object);
        let refund_reason = first_refund_reason(&object);

        let event_type = first_string(payload, &["type", "event_type"])
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| {
                let refunded_flag = object
                    .get("refunded")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if refund_amount_cents > 0 || refunded_flag {
                    "charge.refunded".to_string()
                } else {
                    "payment_succeeded".to_string()
                }
            });

        Ok(NormalizedEvent {
            provider_event_id,
            order_no,
            event_type,
            amount_cents,
            currency,
            external_trade_no,
            paid_at: resolve_created(&object),
            refund_amount_cents,
            refund_reason,
        })
    }
}

fn resolve_refund_amount(payload: &Value, object: &Value) -> i64 {
    if let Some(amount) =
        first_amount(object, &["amount_refunded", "amount_refund"]).filter(|a| *a > 0)
    {
        return amount;
    }

    if let Some(refunds) = object
        .get("refunds")
        .and_then(|r| r.get("data"))
        .and_then(Value::as_array)
    {
        let sum: i64 = refunds
            .iter()
            .filter_map(|refund| first_amount(refund, &["amount"]))
            .sum();
        if sum > 0 {
            return sum;
        }
    }

    first_amount(
        payload,
        &["refund_amount_cents", "refund_amount", "amount_refunded"],
    )
    .unwrap_or(0)
}

fn first_refund_reason(object: &Value) -> Option<String> {
    object
        .get("refunds")
        .and_then(|r| r.get("data"))
        .and_then(Value::as_array)
        .and_then(|refunds| refunds.first())
        .and_then(|refund| first_string(refund, &["reason"]))
        .map(str::to_string)
}

fn resolve_created(object: &Value) -> Option<DateTime<Utc>> {
    let ts = object.get("created").and_then(Value::as_i64)?;
    if ts <= 0 {
        return None;
    }
    Utc.timestamp_opt(ts, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_a_checkout_session_envelope() {
        let payload = json!({
            "id": "evt_abc",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_1",
                "amount_total": 1999,
                "currency": "usd",
                "created": 1_700_000_000,
                "metadata": {"order_no": "ord_1"}
            }}
        });
        let event = StripeGateway.normalize(&payload).unwrap();
        assert_eq!(event.provider_event_id, "evt_abc");
        assert_eq!(event.order_no, "ord_1");
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.amount_cents, 1999);
        assert_eq!(event.currency, "usd");
        assert_eq!(event.external_trade_no.as_deref(), Some("cs_test_1"));
        assert!(event.paid_at.is_some());
        assert!(!event.is_refund());
    }

    #[test]
    fn event_id_falls_back_to_object_references() {
        let payload = json!({
            "data": {"object": {"payment_intent": "pi_1", "amount": 500}}
        });
        let event = StripeGateway.normalize(&payload).unwrap();
        assert_eq!(event.provider_event_id, "pi_1");
    }

    #[test]
    fn refund_amount_sums_refund_entries() {
        let payload = json!({
            "id": "evt_r",
            "data": {"object": {
                "id": "ch_1",
                "amount": 1999,
                "refunds": {"data": [
                    {"amount": 500, "reason": "requested_by_customer"},
                    {"amount": 300}
                ]}
            }}
        });
        let event = StripeGateway.normalize(&payload).unwrap();
        assert_eq!(event.refund_amount_cents, 800);
        assert_eq!(
            event.refund_reason.as_deref(),
            Some("requested_by_customer")
        );
        assert_eq!(event.event_type, "charge.refunded");
        assert!(event.is_refund());
    }

    #[test]
    fn refunded_flag_alone_marks_a_refund_event() {
        let payload = json!({
            "data": {"object": {"id": "ch_1", "refunded": true}}
        });
        let event = StripeGateway.normalize(&payload).unwrap();
        assert_eq!(event.event_type, "charge.refunded");
    }

    #[test]
    fn missing_currency_defaults_to_usd() {
        let payload = json!({"id": "evt_1", "data": {"object": {"amount": 100}}});
        let event = StripeGateway.normalize(&payload).unwrap();
        assert_eq!(event.currency, "USD");
    }

    #[test]
    fn non_object_payload_is_invalid() {
        let err = StripeGateway.normalize(&json!([1, 2])).unwrap_err();
        assert_eq!(err.code, ErrorCode::PayloadInvalid);
    }
}
