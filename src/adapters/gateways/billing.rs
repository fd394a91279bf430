//! Billing aggregator payload normalizer: flat key/value payloads with
//! a handful of aliases per field.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::{amount_from, first_amount, first_string};
use crate::domain::commerce::NormalizedEvent;
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::PaymentGateway;

pub struct BillingGateway;

impl PaymentGateway for BillingGateway {
    fn provider(&self) -> &'static str {
        "billing"
    }

    fn normalize(&self, payload: &Value) -> Result<NormalizedEvent, CommerceError> {
        if !payload.is_object() {
            return Err(CommerceError::new(
                ErrorCode::PayloadInvalid,
                "billing payload must be a JSON object",
            ));
        }

        let provider_event_id = first_string(payload, &["provider_event_id", "event_id", "id"])
            .unwrap_or_default()
            .to_string();
        let order_no = first_string(payload, &["order_no", "orderNo", "order"])
            .unwrap_or_default()
            .to_string();
        let external_trade_no =
            first_string(payload, &["external_trade_no", "trade_no", "transaction_id"])
                .map(str::to_string);

        let amount_cents =
            first_amount(payload, &["amount_cents", "amount", "amount_total"]).unwrap_or(0);
        let currency = first_string(payload, &["currency"])
            .unwrap_or("USD")
            .to_string();

        let refund_amount_cents = first_amount(
            payload,
            &[
                "refund_amount_cents",
                "refund_amount",
                "amount_refunded",
                "refund_amount_total",
            ],
        )
        .unwrap_or(0);
        let refund_reason =
            first_string(payload, &["refund_reason", "reason"]).map(str::to_string);

        let event_type = first_string(payload, &["event_type", "eventType", "type"])
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| {
                if refund_amount_cents > 0 {
                    "refund_succeeded".to_string()
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
            paid_at: resolve_paid_at(payload),
            refund_amount_cents,
            refund_reason,
        })
    }
}

fn resolve_paid_at(payload: &Value) -> Option<DateTime<Utc>> {
    for key in ["paid_at", "paidAt", "paid_time", "paidTime"] {
        let Some(raw) = payload.get(key) else {
            continue;
        };
        if let Some(ts) = amount_from(Some(raw)).filter(|ts| *ts > 0) {
            return Utc.timestamp_opt(ts, 0).single();
        }
        if let Some(s) = raw.as_str() {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s.trim()) {
                return Some(parsed.with_timezone(&Utc));
            }
        }
    }
    None
}
