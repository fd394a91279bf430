//! Commerce domain: orders, payment events, SKUs, wallets, and grants.

mod grant;
mod normalized;
mod order;
mod outcome;
mod payment_event;
mod sku;
mod wallet;

pub use grant::{BenefitGrant, GrantScope, GrantStatus, GrantSubject};
pub use normalized::NormalizedEvent;
pub use order::{Order, OrderStatus};
pub use outcome::{PostCommitOutcome, WebhookOutcome};
pub use payment_event::{PaymentEvent, PaymentEventStatus, PayloadSummary};
pub use sku::{Sku, SkuEffect, SkuResolution};
pub use wallet::{
    consume_idempotency_key, topup_idempotency_key, LedgerEntry, LedgerReason, WalletView,
};

/// Normalizes a SKU or benefit code: trimmed, uppercased.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Normalizes a provider name: trimmed, lowercased.
pub fn normalize_provider(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Trims a string, mapping empty results to `None`.
pub fn trim_or_none(raw: Option<&str>) -> Option<String> {
    match raw {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_code_trims_and_uppercases() {
        assert_eq!(normalize_code("  report_unlock_a "), "REPORT_UNLOCK_A");
    }

    #[test]
    fn trim_or_none_drops_blank_values() {
        assert_eq!(trim_or_none(Some("  ")), None);
        assert_eq!(trim_or_none(Some(" u1 ")), Some("u1".to_string()));
        assert_eq!(trim_or_none(None), None);
    }
}
