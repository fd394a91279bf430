//! Provider-neutral shape of an inbound payment notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a gateway adapter extracts from a raw provider payload.
///
/// Amounts are integer minor units in the order's currency; nothing here
/// is trusted until validated against the order row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub provider_event_id: String,
    pub order_no: String,
    pub event_type: String,
    pub amount_cents: i64,
    pub currency: String,
    pub external_trade_no: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refund_amount_cents: i64,
    pub refund_reason: Option<String>,
}

impl NormalizedEvent {
    /// The event type, lowercased and defaulted: a success notification
    /// without an explicit type counts as `payment_succeeded`.
    pub fn normalized_event_type(&self) -> String {
        let event_type = self.event_type.trim().to_lowercase();
        if event_type.is_empty() {
            "payment_succeeded".to_string()
        } else {
            event_type
        }
    }

    /// Refund detection: event type mentions "refund" or a positive
    /// refund amount is present.
    pub fn is_refund(&self) -> bool {
        self.normalized_event_type().contains("refund") || self.refund_amount_cents > 0
    }

    /// The currency, trimmed and uppercased.
    pub fn normalized_currency(&self) -> String {
        self.currency.trim().to_uppercase()
    }
}
