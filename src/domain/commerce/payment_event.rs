//! The payment event ledger row: one row per `(provider, provider_event_id)`.
//!
//! The row is the single source of truth for "has this event's financial
//! effect already happened". It is created on first sight, mutated in
//! place on every retry, and never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::NormalizedEvent;
use crate::domain::foundation::{CommerceError, ErrorCode};

/// Processing status of a payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventStatus {
    Received,
    Processed,
    Rejected,
    Failed,
    Orphan,
    PostCommitFailed,
}

impl PaymentEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventStatus::Received => "received",
            PaymentEventStatus::Processed => "processed",
            PaymentEventStatus::Rejected => "rejected",
            PaymentEventStatus::Failed => "failed",
            PaymentEventStatus::Orphan => "orphan",
            PaymentEventStatus::PostCommitFailed => "post_commit_failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CommerceError> {
        match s.trim().to_lowercase().as_str() {
            "received" => Ok(PaymentEventStatus::Received),
            "processed" => Ok(PaymentEventStatus::Processed),
            "rejected" => Ok(PaymentEventStatus::Rejected),
            "failed" => Ok(PaymentEventStatus::Failed),
            "orphan" => Ok(PaymentEventStatus::Orphan),
            "post_commit_failed" => Ok(PaymentEventStatus::PostCommitFailed),
            other => Err(CommerceError::new(
                ErrorCode::DatabaseError,
                format!("Invalid payment event status: {}", other),
            )),
        }
    }
}

/// One inbound provider notification, unique per
/// `(provider, provider_event_id)` regardless of delivery count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: Uuid,
    pub provider: String,
    pub provider_event_id: String,
    pub order_id: Option<Uuid>,
    pub order_no: String,
    pub event_type: String,
    pub status: PaymentEventStatus,
    pub attempts: i32,
    pub signature_ok: bool,
    pub requested_sku: Option<String>,
    pub effective_sku: Option<String>,
    pub entitlement_id: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub payload_sha256: String,
    pub payload_size_bytes: i64,
    pub payload_s3_key: Option<String>,
    pub payload_excerpt: String,
    pub received_at: DateTime<Utc>,
    pub handled_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// What gets persisted about a payload: a digest and a normalized
/// excerpt, never the raw (possibly secret-bearing) provider body.
#[derive(Debug, Clone)]
pub struct PayloadSummary {
    pub sha256: String,
    pub size_bytes: i64,
    pub s3_key: Option<String>,
    pub json: String,
}

impl PayloadSummary {
    /// Builds the persisted summary for a normalized event.
    ///
    /// `raw_sha256`/`raw_size_bytes` come from the transport layer that
    /// saw the raw bytes; invalid or missing values fall back to hashing
    /// the re-serialized payload so the digest column is never empty.
    pub fn build(
        normalized: &NormalizedEvent,
        raw_payload: &serde_json::Value,
        raw_sha256: Option<&str>,
        raw_size_bytes: Option<i64>,
        s3_key: Option<&str>,
    ) -> PayloadSummary {
        let fallback = raw_payload.to_string();

        let sha256 = raw_sha256
            .map(|s| s.trim().to_lowercase())
            .filter(|s| is_sha256_hex(s))
            .unwrap_or_else(|| hex_sha256(fallback.as_bytes()));

        let size_bytes = raw_size_bytes
            .filter(|n| *n >= 0)
            .unwrap_or(fallback.len() as i64);

        let s3_key = s3_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| k.chars().take(255).collect());

        let event_type = normalized.normalized_event_type();
        let currency = normalized.normalized_currency();
        let json = json!({
            "provider_event_id": non_empty(&normalized.provider_event_id),
            "order_no": non_empty(&normalized.order_no),
            "event_type": non_empty(&event_type),
            "amount_cents": normalized.amount_cents,
            "currency": non_empty(&currency),
            "external_trade_no": normalized.external_trade_no,
            "raw_sha256": sha256,
            "raw_bytes": size_bytes,
        })
        .to_string();

        PayloadSummary {
            sha256,
            size_bytes,
            s3_key,
            json,
        }
    }

    /// The summary JSON truncated to `max_bytes` on a char boundary.
    pub fn excerpt(&self, max_bytes: usize) -> String {
        if self.json.len() <= max_bytes {
            return self.json.clone();
        }
        let mut end = max_bytes;
        while end > 0 && !self.json.is_char_boundary(end) {
            end -= 1;
        }
        self.json[..end].to_string()
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized() -> NormalizedEvent {
        NormalizedEvent {
            provider_event_id: "evt_1".to_string(),
            order_no: "ord_1".to_string(),
            event_type: "payment_succeeded".to_string(),
            amount_cents: 1999,
            currency: "usd".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn status_parse_round_trips() {
        for status in [
            PaymentEventStatus::Received,
            PaymentEventStatus::Processed,
            PaymentEventStatus::Rejected,
            PaymentEventStatus::Failed,
            PaymentEventStatus::Orphan,
            PaymentEventStatus::PostCommitFailed,
        ] {
            assert_eq!(PaymentEventStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(PaymentEventStatus::parse("pending").is_err());
    }

    #[test]
    fn summary_accepts_caller_digest() {
        let sha = "a".repeat(64);
        let summary = PayloadSummary::build(
            &normalized(),
            &json!({"id": "evt_1"}),
            Some(&sha),
            Some(42),
            None,
        );
        assert_eq!(summary.sha256, sha);
        assert_eq!(summary.size_bytes, 42);
    }

    #[test]
    fn summary_falls_back_to_hashing_payload() {
        let payload = json!({"id": "evt_1"});
        let summary =
            PayloadSummary::build(&normalized(), &payload, Some("not-a-digest"), None, None);
        assert_eq!(summary.sha256.len(), 64);
        assert!(summary.sha256.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(summary.size_bytes, payload.to_string().len() as i64);
    }

    #[test]
    fn summary_json_uppercases_currency_and_keeps_amount() {
        let summary = PayloadSummary::build(&normalized(), &json!({}), None, None, None);
        let parsed: serde_json::Value = serde_json::from_str(&summary.json).unwrap();
        assert_eq!(parsed["currency"], "USD");
        assert_eq!(parsed["amount_cents"], 1999);
        assert_eq!(parsed["order_no"], "ord_1");
    }

    #[test]
    fn excerpt_truncates_long_summaries() {
        let summary = PayloadSummary::build(&normalized(), &json!({}), None, None, None);
        let excerpt = summary.excerpt(16);
        assert!(excerpt.len() <= 16);
        assert!(summary.json.starts_with(&excerpt));
    }

    #[test]
    fn s3_key_is_trimmed_and_capped() {
        let long_key = "k".repeat(400);
        let summary =
            PayloadSummary::build(&normalized(), &json!({}), None, None, Some(&long_key));
        assert_eq!(summary.s3_key.unwrap().len(), 255);

        let summary = PayloadSummary::build(&normalized(), &json!({}), None, None, Some("  "));
        assert!(summary.s3_key.is_none());
    }
}
