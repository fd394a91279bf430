//! Benefit wallet service: guarded top-up and consumption over the
//! store's idempotency-keyed ledger.

use serde_json::Value;

use crate::domain::commerce::{normalize_code, WalletView};
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::{CommerceStore, ConsumeRequest, TopupRequest};

/// Credits a wallet exactly once per idempotency key.
pub async fn top_up<S: CommerceStore>(
    store: &S,
    org_id: i64,
    benefit_code: &str,
    delta: i64,
    idempotency_key: &str,
    order_no: Option<&str>,
    attempt_id: Option<&str>,
    meta: Option<Value>,
) -> Result<WalletView, CommerceError> {
    let benefit_code = normalize_code(benefit_code);
    if benefit_code.is_empty() {
        return Err(CommerceError::new(
            ErrorCode::BenefitRequired,
            "benefit_code is required.",
        ));
    }
    if delta <= 0 {
        return Err(CommerceError::new(
            ErrorCode::DeltaInvalid,
            "top-up delta must be positive.",
        ));
    }
    let idempotency_key = idempotency_key.trim();
    if idempotency_key.is_empty() {
        return Err(CommerceError::new(
            ErrorCode::IdempotencyRequired,
            "idempotency_key is required.",
        ));
    }

    // Fast path: a replayed key returns the balance without locking.
    if store.ledger_entry_exists(idempotency_key).await? {
        let balance = store.wallet_balance(org_id, &benefit_code).await?;
        return Ok(WalletView {
            balance,
            idempotent: true,
        });
    }

    store
        .top_up(TopupRequest {
            org_id,
            benefit_code,
            delta,
            idempotency_key: idempotency_key.to_string(),
            order_no: order_no.map(String::from),
            attempt_id: attempt_id.map(String::from),
            meta,
        })
        .await
}

/// Consumes one credit for an attempt, at most once per attempt.
pub async fn consume<S: CommerceStore>(
    store: &S,
    org_id: i64,
    benefit_code: &str,
    attempt_id: &str,
    order_no: Option<&str>,
) -> Result<WalletView, CommerceError> {
    let benefit_code = normalize_code(benefit_code);
    if benefit_code.is_empty() {
        return Err(CommerceError::new(
            ErrorCode::BenefitRequired,
            "benefit_code is required.",
        ));
    }
    let attempt_id = attempt_id.trim();
    if attempt_id.is_empty() {
        return Err(CommerceError::new(
            ErrorCode::AttemptRequired,
            "attempt_id is required.",
        ));
    }

    store
        .consume(ConsumeRequest {
            org_id,
            benefit_code,
            attempt_id: attempt_id.to_string(),
            order_no: order_no.map(String::from),
        })
        .await
}

/// The webhook top-up delta: SKU units times ordered quantity, bounded
/// to the i32 range the wallet columns use.
pub fn webhook_topup_delta(unit_qty: i32, quantity: i32) -> Result<i64, CommerceError> {
    let delta = (unit_qty as i64).checked_mul(quantity as i64);
    match delta {
        Some(delta) if delta > 0 && delta <= i32::MAX as i64 => Ok(delta),
        _ => Err(CommerceError::new(
            ErrorCode::TopupDeltaInvalid,
            "computed top-up delta out of range.",
        )
        .with_detail("unit_qty", unit_qty.to_string())
        .with_detail("quantity", quantity.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryCommerceStore;

    #[tokio::test]
    async fn top_up_rejects_non_positive_deltas() {
        let store = InMemoryCommerceStore::new();
        let err = top_up(&store, 1, "CR", 0, "k1", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DeltaInvalid);

        let err = top_up(&store, 1, "CR", -5, "k1", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DeltaInvalid);
    }

    #[tokio::test]
    async fn top_up_requires_benefit_and_key() {
        let store = InMemoryCommerceStore::new();
        let err = top_up(&store, 1, "  ", 5, "k1", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BenefitRequired);

        let err = top_up(&store, 1, "CR", 5, "  ", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IdempotencyRequired);
    }

    #[tokio::test]
    async fn replayed_key_takes_the_fast_path() {
        let store = InMemoryCommerceStore::new();
        let first = top_up(&store, 1, "CR", 5, "k1", Some("ord_1"), None, None)
            .await
            .unwrap();
        assert_eq!(first.balance, 5);
        assert!(!first.idempotent);

        let replay = top_up(&store, 1, "CR", 5, "k1", Some("ord_1"), None, None)
            .await
            .unwrap();
        assert_eq!(replay.balance, 5);
        assert!(replay.idempotent);
    }

    #[tokio::test]
    async fn consume_requires_attempt() {
        let store = InMemoryCommerceStore::new();
        let err = consume(&store, 1, "CR", " ", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AttemptRequired);
    }

    #[test]
    fn webhook_delta_bounds() {
        assert_eq!(webhook_topup_delta(10, 3).unwrap(), 30);
        assert_eq!(
            webhook_topup_delta(0, 5).unwrap_err().code,
            ErrorCode::TopupDeltaInvalid
        );
        assert_eq!(
            webhook_topup_delta(i32::MAX, 2).unwrap_err().code,
            ErrorCode::TopupDeltaInvalid
        );
    }
}
