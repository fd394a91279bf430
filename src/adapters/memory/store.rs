//! In-memory `CommerceStore`.
//!
//! Transactions take an owned lock on the whole state, so they are
//! fully serialized, and keep a pre-image for rollback. Pool-level
//! methods take the same lock, which means they must never be called
//! while the caller still holds an open transaction; the orchestrator
//! only touches them after commit or rollback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::commerce::{
    consume_idempotency_key, normalize_code, BenefitGrant, GrantScope, GrantStatus, LedgerEntry,
    LedgerReason, Order, OrderStatus, PaymentEvent, PaymentEventStatus, Sku, WalletView,
};
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::{
    CommerceStore, ConsumeRequest, EventClaim, EventMark, EventSeed, PaidTransition, TopupRequest,
    TransitionStamps,
};

#[derive(Clone, Default)]
struct State {
    events: HashMap<(String, String), PaymentEvent>,
    orders: HashMap<String, Order>,
    skus: HashMap<String, Sku>,
    wallets: HashMap<(i64, String), i64>,
    ledger: Vec<LedgerEntry>,
    ledger_keys: HashSet<String>,
    consumptions: HashSet<(i64, String, String)>,
    grants: Vec<BenefitGrant>,
}

/// An open transaction: exclusive access to the state plus the
/// pre-image restored on rollback.
pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    pre_image: State,
}

#[derive(Clone, Default)]
pub struct InMemoryCommerceStore {
    state: Arc<Mutex<State>>,
    /// Artificial latency injected at transaction begin, used by race
    /// tests to widen the window while the event lock is held.
    latency: Option<Duration>,
}

impl InMemoryCommerceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seeds a catalog row. Codes are stored normalized.
    pub async fn put_sku(&self, sku: Sku) {
        let mut state = self.state.lock().await;
        state.skus.insert(normalize_code(&sku.sku), sku);
    }

    pub async fn ledger_entries(&self, org_id: i64, benefit_code: &str) -> Vec<LedgerEntry> {
        let code = normalize_code(benefit_code);
        let state = self.state.lock().await;
        state
            .ledger
            .iter()
            .filter(|e| e.org_id == org_id && e.benefit_code == code)
            .cloned()
            .collect()
    }

    pub async fn grants(&self) -> Vec<BenefitGrant> {
        self.state.lock().await.grants.clone()
    }
}

#[async_trait]
impl CommerceStore for InMemoryCommerceStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, CommerceError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let guard = Arc::clone(&self.state).lock_owned().await;
        let pre_image = guard.clone();
        Ok(MemoryTx { guard, pre_image })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), CommerceError> {
        drop(tx.guard);
        Ok(())
    }

    async fn rollback(&self, mut tx: Self::Tx) -> Result<(), CommerceError> {
        *tx.guard = tx.pre_image;
        Ok(())
    }

    async fn claim_event(
        &self,
        tx: &mut Self::Tx,
        seed: &EventSeed,
    ) -> Result<EventClaim, CommerceError> {
        let key = (seed.provider.clone(), seed.provider_event_id.clone());
        let now = Utc::now();

        if let Some(event) = tx.guard.events.get_mut(&key) {
            if event.status != PaymentEventStatus::Processed {
                event.attempts += 1;
                event.handled_at = Some(now);
            }
            return Ok(EventClaim {
                inserted: false,
                event: event.clone(),
            });
        }

        let event = PaymentEvent {
            id: Uuid::new_v4(),
            provider: seed.provider.clone(),
            provider_event_id: seed.provider_event_id.clone(),
            order_id: None,
            order_no: seed.order_no.clone(),
            event_type: seed.event_type.clone(),
            status: PaymentEventStatus::Received,
            attempts: 1,
            signature_ok: seed.signature_ok,
            requested_sku: None,
            effective_sku: None,
            entitlement_id: None,
            last_error_code: None,
            last_error_message: None,
            payload_sha256: seed.payload_sha256.clone(),
            payload_size_bytes: seed.payload_size_bytes,
            payload_s3_key: seed.payload_s3_key.clone(),
            payload_excerpt: seed.payload_excerpt.clone(),
            received_at: now,
            handled_at: Some(now),
            processed_at: None,
        };
        tx.guard.events.insert(key, event.clone());
        Ok(EventClaim {
            inserted: true,
            event,
        })
    }

    async fn stamp_event_resolution(
        &self,
        tx: &mut Self::Tx,
        event_id: Uuid,
        order_id: Uuid,
        requested_sku: Option<&str>,
        effective_sku: Option<&str>,
        entitlement_id: Option<&str>,
    ) -> Result<(), CommerceError> {
        for event in tx.guard.events.values_mut() {
            if event.id == event_id {
                event.order_id = Some(order_id);
                event.requested_sku = requested_sku.map(String::from);
                event.effective_sku = effective_sku.map(String::from);
                event.entitlement_id = entitlement_id.map(String::from);
                return Ok(());
            }
        }
        Err(CommerceError::new(
            ErrorCode::EventInitFailed,
            "payment event disappeared mid-transaction",
        ))
    }

    async fn mark_event(
        &self,
        provider: &str,
        provider_event_id: &str,
        mark: EventMark,
    ) -> Result<(), CommerceError> {
        let mut state = self.state.lock().await;
        let key = (provider.to_string(), provider_event_id.to_string());
        let Some(event) = state.events.get_mut(&key) else {
            return Err(CommerceError::new(
                ErrorCode::EventInitFailed,
                "cannot mark a payment event that was never claimed",
            ));
        };
        apply_mark(event, mark);
        Ok(())
    }

    async fn record_event_failure(
        &self,
        seed: &EventSeed,
        mark: EventMark,
    ) -> Result<(), CommerceError> {
        let mut state = self.state.lock().await;
        let key = (seed.provider.clone(), seed.provider_event_id.clone());
        let now = Utc::now();
        let event = state.events.entry(key).or_insert_with(|| PaymentEvent {
            id: Uuid::new_v4(),
            provider: seed.provider.clone(),
            provider_event_id: seed.provider_event_id.clone(),
            order_id: None,
            order_no: seed.order_no.clone(),
            event_type: seed.event_type.clone(),
            status: PaymentEventStatus::Received,
            attempts: 1,
            signature_ok: seed.signature_ok,
            requested_sku: None,
            effective_sku: None,
            entitlement_id: None,
            last_error_code: None,
            last_error_message: None,
            payload_sha256: seed.payload_sha256.clone(),
            payload_size_bytes: seed.payload_size_bytes,
            payload_s3_key: seed.payload_s3_key.clone(),
            payload_excerpt: seed.payload_excerpt.clone(),
            received_at: now,
            handled_at: Some(now),
            processed_at: None,
        });
        apply_mark(event, mark);
        Ok(())
    }

    async fn find_event(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<PaymentEvent>, CommerceError> {
        let state = self.state.lock().await;
        let key = (provider.to_string(), provider_event_id.to_string());
        Ok(state.events.get(&key).cloned())
    }

    async fn find_order_for_update(
        &self,
        tx: &mut Self::Tx,
        order_no: &str,
    ) -> Result<Option<Order>, CommerceError> {
        Ok(tx.guard.orders.get(order_no).cloned())
    }

    async fn find_order(&self, order_no: &str) -> Result<Option<Order>, CommerceError> {
        Ok(self.state.lock().await.orders.get(order_no).cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), CommerceError> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.order_no) {
            return Err(CommerceError::database(format!(
                "duplicate order_no: {}",
                order.order_no
            )));
        }
        state.orders.insert(order.order_no.clone(), order.clone());
        Ok(())
    }

    async fn find_order_by_idempotency(
        &self,
        org_id: i64,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<Option<Order>, CommerceError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|o| {
                o.org_id == org_id
                    && o.provider == provider
                    && o.idempotency_key.as_deref() == Some(idempotency_key)
            })
            .cloned())
    }

    async fn try_transition(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        stamps: TransitionStamps,
    ) -> Result<Order, CommerceError> {
        let order = tx
            .guard
            .orders
            .values_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| CommerceError::new(ErrorCode::OrderNotFound, "Order not found"))?;

        if order.status == to {
            return Ok(order.clone());
        }
        if !from.can_transition_to(to) {
            return Err(CommerceError::new(
                ErrorCode::OrderStatusInvalid,
                format!("Cannot transition order from {} to {}", from.as_str(), to.as_str()),
            ));
        }
        if order.status != from {
            return Err(CommerceError::new(
                ErrorCode::OrderStatusChanged,
                "Order status changed concurrently",
            )
            .with_detail("expected", from.as_str())
            .with_detail("actual", order.status.as_str()));
        }

        order.status = to;
        apply_stamps(order, &stamps);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn transition_paid_locked(
        &self,
        tx: &mut Self::Tx,
        order_no: &str,
        stamps: TransitionStamps,
    ) -> Result<PaidTransition, CommerceError> {
        let order = tx
            .guard
            .orders
            .get_mut(order_no)
            .ok_or_else(|| CommerceError::new(ErrorCode::OrderNotFound, "Order not found"))?;

        if order.status.is_settled() {
            return Ok(PaidTransition {
                order: order.clone(),
                already_paid: true,
            });
        }
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(CommerceError::new(
                ErrorCode::OrderStatusInvalid,
                format!("Cannot mark a {} order paid", order.status.as_str()),
            ));
        }

        order.status = OrderStatus::Paid;
        if order.paid_at.is_none() {
            order.paid_at = Some(stamps.paid_at.unwrap_or_else(Utc::now));
        }
        if order.external_trade_no.is_none() {
            order.external_trade_no = stamps.external_trade_no.clone();
        }
        order.updated_at = Utc::now();
        Ok(PaidTransition {
            order: order.clone(),
            already_paid: false,
        })
    }

    async fn stamp_refund(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        refund_amount_cents: i64,
        refund_reason: Option<&str>,
        refunded_at: DateTime<Utc>,
    ) -> Result<(), CommerceError> {
        let order = tx
            .guard
            .orders
            .values_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| CommerceError::new(ErrorCode::OrderNotFound, "Order not found"))?;

        if order.refund_amount_cents.is_none() {
            order.refund_amount_cents = Some(refund_amount_cents);
        }
        if order.refund_reason.is_none() {
            order.refund_reason = refund_reason.map(String::from);
        }
        if order.refunded_at.is_none() {
            order.refunded_at = Some(refunded_at);
        }
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_grant_if_absent(
        &self,
        tx: &mut Self::Tx,
        grant: &BenefitGrant,
    ) -> Result<bool, CommerceError> {
        let exists = tx.guard.grants.iter().any(|g| {
            g.org_id == grant.org_id
                && g.benefit_code == grant.benefit_code
                && g.scope == grant.scope
                && g.attempt_id == grant.attempt_id
                && g.user_id == grant.user_id
                && g.status == GrantStatus::Active
        });
        if exists {
            return Ok(false);
        }
        tx.guard.grants.push(grant.clone());
        Ok(true)
    }

    async fn revoke_grants_by_order_no(
        &self,
        tx: &mut Self::Tx,
        org_id: i64,
        order_no: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CommerceError> {
        let mut revoked = 0;
        for grant in tx.guard.grants.iter_mut() {
            if grant.org_id == org_id
                && grant.order_no.as_deref() == Some(order_no)
                && grant.status == GrantStatus::Active
            {
                grant.status = GrantStatus::Revoked;
                grant.revoked_at = Some(now);
                grant.updated_at = now;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_grants_by_attempt(
        &self,
        tx: &mut Self::Tx,
        org_id: i64,
        benefit_code: &str,
        attempt_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CommerceError> {
        let code = normalize_code(benefit_code);
        let mut revoked = 0;
        for grant in tx.guard.grants.iter_mut() {
            if grant.org_id == org_id
                && grant.benefit_code == code
                && grant.attempt_id == attempt_id
                && grant.status == GrantStatus::Active
            {
                grant.status = GrantStatus::Revoked;
                grant.revoked_at = Some(now);
                grant.updated_at = now;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn has_active_grant(
        &self,
        org_id: i64,
        benefit_code: &str,
        attempt_id: &str,
        subject_refs: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, CommerceError> {
        let code = normalize_code(benefit_code);
        let state = self.state.lock().await;
        Ok(state.grants.iter().any(|g| {
            g.org_id == org_id
                && g.benefit_code == code
                && g.is_active(now)
                && (g.scope == GrantScope::Org || g.attempt_id == attempt_id)
                && (subject_refs.contains(&g.user_id) || subject_refs.contains(&g.benefit_ref))
        }))
    }

    async fn find_grants_by_attempt(
        &self,
        org_id: i64,
        attempt_id: &str,
    ) -> Result<Vec<BenefitGrant>, CommerceError> {
        let state = self.state.lock().await;
        Ok(state
            .grants
            .iter()
            .filter(|g| g.org_id == org_id && g.attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn ledger_entry_exists(&self, idempotency_key: &str) -> Result<bool, CommerceError> {
        Ok(self.state.lock().await.ledger_keys.contains(idempotency_key))
    }

    async fn top_up(&self, request: TopupRequest) -> Result<WalletView, CommerceError> {
        let code = normalize_code(&request.benefit_code);
        let mut state = self.state.lock().await;
        let wallet_key = (request.org_id, code.clone());

        if state.ledger_keys.contains(&request.idempotency_key) {
            let balance = state.wallets.get(&wallet_key).copied().unwrap_or(0);
            return Ok(WalletView {
                balance,
                idempotent: true,
            });
        }

        let balance = state.wallets.entry(wallet_key).or_insert(0);
        *balance += request.delta;
        let balance = *balance;

        state.ledger.push(LedgerEntry {
            org_id: request.org_id,
            benefit_code: code,
            delta: request.delta,
            reason: LedgerReason::Topup,
            idempotency_key: request.idempotency_key.clone(),
            order_no: request.order_no,
            attempt_id: request.attempt_id,
            meta: request.meta,
            created_at: Utc::now(),
        });
        state.ledger_keys.insert(request.idempotency_key);

        Ok(WalletView {
            balance,
            idempotent: false,
        })
    }

    async fn consume(&self, request: ConsumeRequest) -> Result<WalletView, CommerceError> {
        let code = normalize_code(&request.benefit_code);
        let key = consume_idempotency_key(&request.attempt_id, &code);
        let mut state = self.state.lock().await;
        let wallet_key = (request.org_id, code.clone());
        let marker = (request.org_id, code.clone(), request.attempt_id.clone());

        if state.ledger_keys.contains(&key) || state.consumptions.contains(&marker) {
            let balance = state.wallets.get(&wallet_key).copied().unwrap_or(0);
            return Ok(WalletView {
                balance,
                idempotent: true,
            });
        }

        let balance = state.wallets.get(&wallet_key).copied().unwrap_or(0);
        if balance <= 0 {
            return Err(CommerceError::new(
                ErrorCode::InsufficientCredits,
                "No credits available for this benefit",
            )
            .with_detail("benefit_code", code)
            .with_detail("balance", balance.to_string()));
        }

        state.wallets.insert(wallet_key, balance - 1);
        state.consumptions.insert(marker);
        state.ledger.push(LedgerEntry {
            org_id: request.org_id,
            benefit_code: code,
            delta: -1,
            reason: LedgerReason::Consume,
            idempotency_key: key.clone(),
            order_no: request.order_no,
            attempt_id: Some(request.attempt_id),
            meta: None,
            created_at: Utc::now(),
        });
        state.ledger_keys.insert(key);

        Ok(WalletView {
            balance: balance - 1,
            idempotent: false,
        })
    }

    async fn wallet_balance(
        &self,
        org_id: i64,
        benefit_code: &str,
    ) -> Result<i64, CommerceError> {
        let code = normalize_code(benefit_code);
        let state = self.state.lock().await;
        Ok(state.wallets.get(&(org_id, code)).copied().unwrap_or(0))
    }

    async fn ledger_sum(&self, org_id: i64, benefit_code: &str) -> Result<i64, CommerceError> {
        let code = normalize_code(benefit_code);
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.org_id == org_id && e.benefit_code == code)
            .map(|e| e.delta)
            .sum())
    }

    async fn find_sku(&self, sku: &str) -> Result<Option<Sku>, CommerceError> {
        let code = normalize_code(sku);
        Ok(self.state.lock().await.skus.get(&code).cloned())
    }

    async fn find_sku_by_anchor(
        &self,
        anchor_sku: &str,
    ) -> Result<Option<Sku>, CommerceError> {
        let anchor = normalize_code(anchor_sku);
        let state = self.state.lock().await;
        Ok(state
            .skus
            .values()
            .find(|s| !s.is_anchor() && s.meta_anchor_sku().as_deref() == Some(anchor.as_str()))
            .cloned())
    }
}

fn apply_mark(event: &mut PaymentEvent, mark: EventMark) {
    let now = Utc::now();
    event.status = mark.status;
    event.last_error_code = mark.error_code;
    event.last_error_message = mark.error_message;
    if let Some(order_id) = mark.order_id {
        event.order_id = Some(order_id);
    }
    event.handled_at = Some(now);
    if mark.status == PaymentEventStatus::Processed {
        event.processed_at = Some(now);
    }
}

fn apply_stamps(order: &mut Order, stamps: &TransitionStamps) {
    if order.paid_at.is_none() {
        order.paid_at = stamps.paid_at;
    }
    if order.fulfilled_at.is_none() {
        order.fulfilled_at = stamps.fulfilled_at;
    }
    if order.refunded_at.is_none() {
        order.refunded_at = stamps.refunded_at;
    }
    if order.external_trade_no.is_none() {
        order.external_trade_no = stamps.external_trade_no.clone();
    }
}
