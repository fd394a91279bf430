//! Commerce store port: transactional persistence for payment events,
//! orders, wallets, and grants.
//!
//! The orchestrator is generic over this trait so the scenario tests can
//! run against the in-memory adapter while production uses Postgres. The
//! associated `Tx` type keeps the in-transaction operations honest: an
//! operation that takes `&mut Self::Tx` participates in the caller's
//! transaction and rolls back with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::commerce::{
    BenefitGrant, Order, OrderStatus, PaymentEvent, PaymentEventStatus, Sku, WalletView,
};
use crate::domain::foundation::CommerceError;

/// Everything needed to create (or re-find) a payment event row on
/// first sight of a delivery.
#[derive(Debug, Clone)]
pub struct EventSeed {
    pub provider: String,
    pub provider_event_id: String,
    pub order_no: String,
    pub event_type: String,
    pub signature_ok: bool,
    pub payload_sha256: String,
    pub payload_size_bytes: i64,
    pub payload_s3_key: Option<String>,
    pub payload_excerpt: String,
}

/// Result of claiming an event row.
#[derive(Debug, Clone)]
pub struct EventClaim {
    /// True when this delivery created the row; false on redelivery.
    pub inserted: bool,
    pub event: PaymentEvent,
}

/// Terminal annotation written onto an event row.
#[derive(Debug, Clone)]
pub struct EventMark {
    pub status: PaymentEventStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub order_id: Option<Uuid>,
}

impl EventMark {
    pub fn processed() -> Self {
        EventMark {
            status: PaymentEventStatus::Processed,
            error_code: None,
            error_message: None,
            order_id: None,
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        EventMark {
            status: PaymentEventStatus::Rejected,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            order_id: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        EventMark {
            status: PaymentEventStatus::Failed,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            order_id: None,
        }
    }

    pub fn orphan(code: impl Into<String>, message: impl Into<String>) -> Self {
        EventMark {
            status: PaymentEventStatus::Orphan,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            order_id: None,
        }
    }

    pub fn post_commit_failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        EventMark {
            status: PaymentEventStatus::PostCommitFailed,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            order_id: None,
        }
    }

    pub fn with_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// Timestamps and references stamped alongside an optimistic transition.
/// Fields already set on the row are never overwritten.
#[derive(Debug, Clone, Default)]
pub struct TransitionStamps {
    pub paid_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub external_trade_no: Option<String>,
}

/// Result of the pessimistic paid transition.
#[derive(Debug, Clone)]
pub struct PaidTransition {
    pub order: Order,
    /// True when the order was already settled and nothing changed.
    pub already_paid: bool,
}

/// A wallet credit to apply exactly once under an idempotency key.
#[derive(Debug, Clone)]
pub struct TopupRequest {
    pub org_id: i64,
    pub benefit_code: String,
    pub delta: i64,
    pub idempotency_key: String,
    pub order_no: Option<String>,
    pub attempt_id: Option<String>,
    pub meta: Option<serde_json::Value>,
}

/// A single-credit consumption for an attempt.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub org_id: i64,
    pub benefit_code: String,
    pub attempt_id: String,
    pub order_no: Option<String>,
}

/// Transactional persistence port for the commerce domain.
///
/// Pool-level methods (taking `&self` only) run in their own implicit
/// transaction and are safe to call after a rollback; methods taking
/// `&mut Self::Tx` are part of the caller's transaction.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, CommerceError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), CommerceError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), CommerceError>;

    /// Claims the event row for `(provider, provider_event_id)`:
    /// insert-if-absent, then re-read under a row lock. On redelivery of
    /// a non-processed row the attempt counter is incremented in place.
    async fn claim_event(
        &self,
        tx: &mut Self::Tx,
        seed: &EventSeed,
    ) -> Result<EventClaim, CommerceError>;

    /// Stamps SKU resolution results and the order link onto the event
    /// row inside the transaction.
    async fn stamp_event_resolution(
        &self,
        tx: &mut Self::Tx,
        event_id: Uuid,
        order_id: Uuid,
        requested_sku: Option<&str>,
        effective_sku: Option<&str>,
        entitlement_id: Option<&str>,
    ) -> Result<(), CommerceError>;

    /// Annotates the event row outside any caller transaction. Used for
    /// rejections (after committing the claim) and for the final
    /// processed / post_commit_failed stamp.
    async fn mark_event(
        &self,
        provider: &str,
        provider_event_id: &str,
        mark: EventMark,
    ) -> Result<(), CommerceError>;

    /// Upserts the event row with a failure mark. Used after a rollback
    /// discarded a first-sight claim: the row is re-seeded so the
    /// failure stays auditable.
    async fn record_event_failure(
        &self,
        seed: &EventSeed,
        mark: EventMark,
    ) -> Result<(), CommerceError>;

    async fn find_event(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<PaymentEvent>, CommerceError>;

    /// Loads the order by number under a row lock.
    async fn find_order_for_update(
        &self,
        tx: &mut Self::Tx,
        order_no: &str,
    ) -> Result<Option<Order>, CommerceError>;

    /// Non-locking order read, used by dry runs and access checks.
    async fn find_order(&self, order_no: &str) -> Result<Option<Order>, CommerceError>;

    /// Inserts an order row. Checkout-side primitive, also used to set
    /// up fixtures.
    async fn insert_order(&self, order: &Order) -> Result<(), CommerceError>;

    /// Finds the order a caller idempotency key already created, scoped
    /// to the organization and provider.
    async fn find_order_by_idempotency(
        &self,
        org_id: i64,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<Option<Order>, CommerceError>;

    /// Optimistic transition: compare-and-set on the previously read
    /// status. Fails with `ORDER_STATUS_CHANGED` when a concurrent
    /// writer moved the order first, and `ORDER_STATUS_INVALID` when the
    /// transition table forbids the move.
    async fn try_transition(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        stamps: TransitionStamps,
    ) -> Result<Order, CommerceError>;

    /// Pessimistic paid transition: re-reads the order under `FOR
    /// UPDATE` and absorbs races by reporting `already_paid` instead of
    /// failing when another writer settled the order first.
    async fn transition_paid_locked(
        &self,
        tx: &mut Self::Tx,
        order_no: &str,
        stamps: TransitionStamps,
    ) -> Result<PaidTransition, CommerceError>;

    /// Stamps refund amount, reason, and timestamp onto the order,
    /// without overwriting values stamped by an earlier partial attempt.
    async fn stamp_refund(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        refund_amount_cents: i64,
        refund_reason: Option<&str>,
        refunded_at: DateTime<Utc>,
    ) -> Result<(), CommerceError>;

    /// Inserts a grant unless an equivalent active grant already exists.
    /// Returns false on the idempotent no-op.
    async fn insert_grant_if_absent(
        &self,
        tx: &mut Self::Tx,
        grant: &BenefitGrant,
    ) -> Result<bool, CommerceError>;

    /// Revokes active grants sourced from the given order. Returns the
    /// number of grants revoked.
    async fn revoke_grants_by_order_no(
        &self,
        tx: &mut Self::Tx,
        org_id: i64,
        order_no: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CommerceError>;

    /// Fallback revocation for legacy grants that never recorded their
    /// source order: matches on benefit code and attempt instead.
    async fn revoke_grants_by_attempt(
        &self,
        tx: &mut Self::Tx,
        org_id: i64,
        benefit_code: &str,
        attempt_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CommerceError>;

    /// Whether any listed subject holds an active, unexpired grant for
    /// the benefit, at attempt scope for this attempt or at org scope.
    async fn has_active_grant(
        &self,
        org_id: i64,
        benefit_code: &str,
        attempt_id: &str,
        subject_refs: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, CommerceError>;

    async fn find_grants_by_attempt(
        &self,
        org_id: i64,
        attempt_id: &str,
    ) -> Result<Vec<BenefitGrant>, CommerceError>;

    /// Fast duplicate probe for a ledger idempotency key, taken before
    /// any wallet lock.
    async fn ledger_entry_exists(&self, idempotency_key: &str) -> Result<bool, CommerceError>;

    /// Credits a wallet exactly once per idempotency key. A duplicate
    /// key returns the current balance with `idempotent: true`.
    async fn top_up(&self, request: TopupRequest) -> Result<WalletView, CommerceError>;

    /// Consumes one credit for an attempt, at most once per
    /// attempt/benefit pair. Fails with `INSUFFICIENT_CREDITS` when the
    /// locked balance is not positive; nothing persists on failure.
    async fn consume(&self, request: ConsumeRequest) -> Result<WalletView, CommerceError>;

    async fn wallet_balance(&self, org_id: i64, benefit_code: &str)
        -> Result<i64, CommerceError>;

    /// Audit read: the sum of ledger deltas for the wallet. Always
    /// equals `wallet_balance` for a consistent store.
    async fn ledger_sum(&self, org_id: i64, benefit_code: &str) -> Result<i64, CommerceError>;

    /// Loads a catalog row by normalized code, active or not.
    async fn find_sku(&self, sku: &str) -> Result<Option<Sku>, CommerceError>;

    /// Reverse alias lookup: the sellable row whose meta points back at
    /// the given anchor code.
    async fn find_sku_by_anchor(&self, anchor_sku: &str)
        -> Result<Option<Sku>, CommerceError>;
}
