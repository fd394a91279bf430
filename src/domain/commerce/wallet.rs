//! Prepaid benefit wallets and their append-only ledger.
//!
//! The wallet balance must always equal the sum of the ledger deltas for
//! that wallet; the idempotency-keyed ledger row is the exactly-once
//! primitive for money-like balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerReason {
    Topup,
    Consume,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::Topup => "topup",
            LedgerReason::Consume => "consume",
        }
    }
}

/// An immutable signed delta record, keyed by an idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub org_id: i64,
    pub benefit_code: String,
    pub delta: i64,
    pub reason: LedgerReason,
    pub idempotency_key: String,
    pub order_no: Option<String>,
    pub attempt_id: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// What wallet mutations return to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletView {
    pub balance: i64,
    /// True when the operation had already been applied and the call
    /// changed nothing.
    pub idempotent: bool,
}

/// The deterministic idempotency key for consuming one credit for an
/// attempt. The same attempt/benefit pair always derives the same key,
/// which is what caps consumption at once per attempt.
pub fn consume_idempotency_key(attempt_id: &str, benefit_code: &str) -> String {
    format!("CONSUME:{}:{}", attempt_id.trim(), benefit_code.trim().to_uppercase())
}

/// The idempotency key for a webhook-driven top-up: one per provider event.
pub fn topup_idempotency_key(provider: &str, provider_event_id: &str) -> String {
    format!("TOPUP:{}:{}", provider.trim().to_lowercase(), provider_event_id.trim())
}
