//! The webhook orchestrator: one delivery in, one financial effect out,
//! no matter how many times the provider retries.
//!
//! Processing is split into three phases with different failure
//! semantics:
//!
//! 1. **Claim + validate + mutate**, inside one database transaction
//!    under a per-event named lock. Any failure here rolls the whole
//!    transaction back and the event row records the failure.
//! 2. **Commit.** After this point the financial state is final.
//! 3. **Post-commit side effects** (wallet top-up, telemetry, snapshot
//!    job). A failure here never undoes phase 2; the event is stamped
//!    `post_commit_failed` so reconciliation can re-drive the side
//!    effects on the next delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::adapters::gateways::GatewayRegistry;
use crate::adapters::locks::webhook_lock_key;
use crate::application::catalog::resolve_sku_meta;
use crate::application::entitlements::{grant_attempt_unlock, revoke_for_order, GrantRequest};
use crate::application::wallet::{self, webhook_topup_delta};
use crate::config::PaymentConfig;
use crate::domain::commerce::{
    normalize_provider, topup_idempotency_key, NormalizedEvent, Order, OrderStatus,
    PaymentEventStatus, PayloadSummary, PostCommitOutcome, SkuEffect, SkuResolution,
    WebhookOutcome,
};
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::{
    CommerceStore, EventClaim, EventLock, EventMark, EventRecorder, EventSeed, PaymentGateway,
    SnapshotJob, SnapshotJobDispatcher, TelemetryEvent, TransitionStamps,
};

/// One raw inbound delivery, as seen by the transport layer.
///
/// `signature_ok` is the transport's verdict on the provider signature;
/// raw digest and size describe the bytes as received, before any JSON
/// re-serialization.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub provider: String,
    pub payload: serde_json::Value,
    pub signature_ok: bool,
    pub raw_sha256: Option<String>,
    pub raw_size_bytes: Option<i64>,
    pub payload_s3_key: Option<String>,
}

/// What fulfilling this particular order requires, decided inside the
/// transaction once every guard has passed.
enum FulfillmentPlan {
    CreditPack { delta: i64 },
    ReportUnlock { attempt_id: String },
}

pub struct WebhookOrchestrator<S: CommerceStore> {
    store: Arc<S>,
    gateways: GatewayRegistry,
    lock: Arc<dyn EventLock>,
    telemetry: Arc<dyn EventRecorder>,
    snapshots: Arc<dyn SnapshotJobDispatcher>,
    payment: PaymentConfig,
}

impl<S: CommerceStore> WebhookOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        gateways: GatewayRegistry,
        lock: Arc<dyn EventLock>,
        telemetry: Arc<dyn EventRecorder>,
        snapshots: Arc<dyn SnapshotJobDispatcher>,
        payment: PaymentConfig,
    ) -> Self {
        WebhookOrchestrator {
            store,
            gateways,
            lock,
            telemetry,
            snapshots,
            payment,
        }
    }

    /// Handles one delivery end to end. Never returns `Err`: every
    /// failure mode folds into the outcome so the transport layer can
    /// answer the provider with the right status.
    pub async fn handle(&self, delivery: WebhookDelivery) -> WebhookOutcome {
        let provider = normalize_provider(&delivery.provider);
        let gateway = match self.gateway_for(&provider) {
            Ok(gateway) => gateway,
            Err(err) => return WebhookOutcome::error(&err),
        };

        let normalized = match gateway.normalize(&delivery.payload) {
            Ok(normalized) => normalized,
            Err(err) => return WebhookOutcome::error(&err),
        };

        let provider_event_id = normalized.provider_event_id.trim().to_string();
        let order_no = normalized.order_no.trim().to_string();
        if provider_event_id.is_empty() || order_no.is_empty() {
            let err = CommerceError::new(
                ErrorCode::PayloadInvalid,
                "payload is missing provider_event_id or order_no.",
            );
            return WebhookOutcome::error(&err)
                .with_refs(Some(order_no), Some(provider_event_id));
        }

        let event_type = normalized.normalized_event_type();
        let summary = PayloadSummary::build(
            &normalized,
            &delivery.payload,
            delivery.raw_sha256.as_deref(),
            delivery.raw_size_bytes,
            delivery.payload_s3_key.as_deref(),
        );
        let seed = EventSeed {
            provider: provider.clone(),
            provider_event_id: provider_event_id.clone(),
            order_no: order_no.clone(),
            event_type: event_type.clone(),
            signature_ok: delivery.signature_ok,
            payload_sha256: summary.sha256.clone(),
            payload_size_bytes: summary.size_bytes,
            payload_s3_key: summary.s3_key.clone(),
            payload_excerpt: summary.excerpt(self.payment.payload_excerpt_max_bytes),
        };

        let lock_key = webhook_lock_key(&provider, &provider_event_id);
        let lease = match self
            .lock
            .acquire(
                &lock_key,
                Duration::from_secs(self.payment.lock_ttl_secs),
                Duration::from_secs(self.payment.lock_block_secs),
            )
            .await
        {
            Ok(lease) => lease,
            Err(err) => {
                warn!(provider = %provider, provider_event_id = %provider_event_id,
                    "webhook lock not acquired");
                return WebhookOutcome::error(&err)
                    .with_refs(Some(order_no), Some(provider_event_id));
            }
        };

        let outcome = self
            .process(&provider, &normalized, &event_type, &seed, delivery.signature_ok)
            .await;

        if let Err(err) = self.lock.release(lease).await {
            warn!(error = %err, key = %lock_key, "webhook lock release failed");
        }

        outcome.with_refs(Some(order_no), Some(provider_event_id))
    }

    /// Validates a delivery without touching any state: no lock, no
    /// event row, no order mutation. Used by operators to replay a
    /// provider payload and see what full processing would decide.
    pub async fn evaluate_dry_run(&self, delivery: &WebhookDelivery) -> WebhookOutcome {
        let provider = normalize_provider(&delivery.provider);
        let gateway = match self.gateway_for(&provider) {
            Ok(gateway) => gateway,
            Err(err) => return WebhookOutcome::error(&err).dry_run(),
        };

        let normalized = match gateway.normalize(&delivery.payload) {
            Ok(normalized) => normalized,
            Err(err) => return WebhookOutcome::error(&err).dry_run(),
        };

        let provider_event_id = normalized.provider_event_id.trim().to_string();
        let order_no = normalized.order_no.trim().to_string();
        if provider_event_id.is_empty() || order_no.is_empty() {
            let err = CommerceError::new(
                ErrorCode::PayloadInvalid,
                "payload is missing provider_event_id or order_no.",
            );
            return WebhookOutcome::error(&err)
                .with_refs(Some(order_no), Some(provider_event_id))
                .dry_run();
        }

        if !delivery.signature_ok {
            let err = CommerceError::new(ErrorCode::InvalidSignature, "invalid signature.");
            return WebhookOutcome::error(&err)
                .with_refs(Some(order_no), Some(provider_event_id))
                .dry_run();
        }

        let event_type = normalized.normalized_event_type();
        if !normalized.is_refund()
            && !self.payment.is_allowed_success_event_type(&provider, &event_type)
        {
            let err = CommerceError::new(
                ErrorCode::EventTypeNotAllowed,
                format!("event type not allowed: {}", event_type),
            );
            return WebhookOutcome::error(&err)
                .with_refs(Some(order_no), Some(provider_event_id))
                .dry_run();
        }

        WebhookOutcome::success(order_no, provider_event_id).dry_run()
    }

    fn gateway_for(&self, provider: &str) -> Result<Arc<dyn PaymentGateway>, CommerceError> {
        if provider == "stub" && !self.payment.allow_stub {
            return Err(CommerceError::new(
                ErrorCode::ProviderDisabled,
                "stub provider is disabled.",
            ));
        }
        self.gateways.get(provider).cloned().ok_or_else(|| {
            CommerceError::new(
                ErrorCode::ProviderNotSupported,
                format!("unsupported payment provider: {}", provider),
            )
            .with_detail("provider", provider)
        })
    }

    /// The locked section: everything between lock acquisition and
    /// release.
    async fn process(
        &self,
        provider: &str,
        normalized: &NormalizedEvent,
        event_type: &str,
        seed: &EventSeed,
        signature_ok: bool,
    ) -> WebhookOutcome {
        // Catalog context resolves before the transaction opens; the
        // pool-level reads must not run while the claim transaction
        // holds its locks. A racing order creation is picked up on
        // provider redelivery.
        let pre_order = match self.store.find_order(&seed.order_no).await {
            Ok(order) => order,
            Err(err) => return WebhookOutcome::error(&err),
        };
        let resolution = match &pre_order {
            Some(order) => {
                match resolve_sku_meta(self.store.as_ref(), &order.fulfillment_sku()).await {
                    Ok(resolution) => resolution,
                    Err(err) => return WebhookOutcome::error(&err),
                }
            }
            None => SkuResolution::default(),
        };

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(err) => return WebhookOutcome::error(&err),
        };

        let claim = match self.store.claim_event(&mut tx, seed).await {
            Ok(claim) => claim,
            Err(err) => return self.fail_tx(tx, seed, err).await,
        };

        // A processed row means the financial effect already happened
        // and the side effects completed. Nothing to do but say so.
        if !claim.inserted && claim.event.status == PaymentEventStatus::Processed {
            if let Err(err) = self.store.commit(tx).await {
                return WebhookOutcome::error(&err);
            }
            return WebhookOutcome::duplicate(
                seed.order_no.clone(),
                seed.provider_event_id.clone(),
            );
        }

        if !signature_ok {
            let err = CommerceError::new(ErrorCode::InvalidSignature, "invalid signature.");
            return self
                .reject(tx, seed, EventMark::rejected(err.code.as_str(), &err.message), err)
                .await;
        }

        let order = match self.store.find_order_for_update(&mut tx, &seed.order_no).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                let err = CommerceError::new(
                    ErrorCode::OrderNotFound,
                    format!("no order found for order_no: {}", seed.order_no),
                );
                return self
                    .reject(tx, seed, EventMark::orphan(err.code.as_str(), &err.message), err)
                    .await;
            }
            Err(err) => return self.fail_tx(tx, seed, err).await,
        };

        if normalize_provider(&order.provider) != provider {
            let err = CommerceError::new(
                ErrorCode::ProviderMismatch,
                "order was created for a different provider.",
            )
            .with_detail("order_provider", normalize_provider(&order.provider));
            return self
                .reject(
                    tx,
                    seed,
                    EventMark::rejected(err.code.as_str(), &err.message).with_order(order.id),
                    err,
                )
                .await;
        }

        if normalized.is_refund() {
            return self
                .process_refund(tx, seed, &claim, order, normalized, &resolution)
                .await;
        }

        // Success-path guards, cheapest first. Each rejection commits
        // the claim so the attempt stays auditable, then annotates the
        // event row outside the transaction.
        if !self.payment.is_allowed_success_event_type(provider, event_type) {
            let err = CommerceError::new(
                ErrorCode::EventTypeNotAllowed,
                format!("event type not allowed: {}", event_type),
            );
            return self
                .reject(
                    tx,
                    seed,
                    EventMark::rejected(err.code.as_str(), &err.message).with_order(order.id),
                    err,
                )
                .await;
        }

        if normalized.amount_cents != order.amount_cents {
            let err = CommerceError::new(ErrorCode::AmountMismatch, "amount mismatch.")
                .with_detail("expected_cents", order.amount_cents.to_string())
                .with_detail("received_cents", normalized.amount_cents.to_string());
            return self
                .reject(
                    tx,
                    seed,
                    EventMark::rejected(err.code.as_str(), &err.message).with_order(order.id),
                    err,
                )
                .await;
        }

        let event_currency = normalized.normalized_currency();
        let order_currency = order.currency.trim().to_uppercase();
        if event_currency.is_empty()
            || order_currency.is_empty()
            || event_currency != order_currency
        {
            let err = CommerceError::new(ErrorCode::CurrencyMismatch, "currency mismatch.")
                .with_detail("expected", order_currency)
                .with_detail("received", event_currency);
            return self
                .reject(
                    tx,
                    seed,
                    EventMark::rejected(err.code.as_str(), &err.message).with_order(order.id),
                    err,
                )
                .await;
        }

        let sku_row = match &resolution.sku_row {
            Some(sku_row) => sku_row.clone(),
            None => {
                let err = CommerceError::new(
                    ErrorCode::SkuNotFound,
                    format!("no active catalog row for sku: {}", order.fulfillment_sku()),
                );
                return self
                    .reject(
                        tx,
                        seed,
                        EventMark::rejected(err.code.as_str(), &err.message).with_order(order.id),
                        err,
                    )
                    .await;
            }
        };

        let benefit_code = sku_row.benefit_code.trim().to_uppercase();
        if benefit_code.is_empty() {
            let err = CommerceError::new(
                ErrorCode::BenefitCodeNotFound,
                format!("catalog row carries no benefit code: {}", sku_row.sku),
            );
            return self
                .reject(
                    tx,
                    seed,
                    EventMark::rejected(err.code.as_str(), &err.message).with_order(order.id),
                    err,
                )
                .await;
        }

        let effect = match sku_row.effect() {
            Ok(effect) => effect,
            Err(err) => {
                return self
                    .reject(
                        tx,
                        seed,
                        EventMark::rejected(err.code.as_str(), &err.message).with_order(order.id),
                        err,
                    )
                    .await;
            }
        };

        let plan = match effect {
            SkuEffect::CreditPack { unit_qty } => {
                match webhook_topup_delta(unit_qty, order.quantity) {
                    Ok(delta) => FulfillmentPlan::CreditPack { delta },
                    Err(err) => {
                        return self
                            .reject(
                                tx,
                                seed,
                                EventMark::rejected(err.code.as_str(), &err.message)
                                    .with_order(order.id),
                                err,
                            )
                            .await;
                    }
                }
            }
            SkuEffect::ReportUnlock { .. } => {
                match order.target_attempt_id.as_deref().map(str::trim) {
                    Some(attempt_id) if !attempt_id.is_empty() => {
                        FulfillmentPlan::ReportUnlock {
                            attempt_id: attempt_id.to_string(),
                        }
                    }
                    _ => {
                        let err = CommerceError::new(
                            ErrorCode::AttemptRequired,
                            "report unlock requires a target attempt.",
                        );
                        return self
                            .reject(
                                tx,
                                seed,
                                EventMark::rejected(err.code.as_str(), &err.message)
                                    .with_order(order.id),
                                err,
                            )
                            .await;
                    }
                }
            }
        };

        // A redelivery of a non-processed event against a settled order
        // means the financial transaction already committed but the
        // side effects never finished. Only the side effects re-run.
        let retrying_post_commit_only = !claim.inserted && order.status.is_settled();

        let now = Utc::now();
        let order = if retrying_post_commit_only {
            if let Err(err) = self
                .stamp_resolution(&mut tx, &claim, &order, &resolution)
                .await
            {
                return self.fail_tx(tx, seed, err).await;
            }
            order
        } else {
            let paid = match self
                .store
                .transition_paid_locked(
                    &mut tx,
                    &seed.order_no,
                    TransitionStamps {
                        paid_at: Some(normalized.paid_at.unwrap_or(now)),
                        external_trade_no: normalized.external_trade_no.clone(),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(paid) => paid,
                Err(err) => return self.fail_tx(tx, seed, err).await,
            };

            let mut order = paid.order;
            if order.status == OrderStatus::Paid {
                order = match self
                    .store
                    .try_transition(
                        &mut tx,
                        order.id,
                        OrderStatus::Paid,
                        OrderStatus::Fulfilled,
                        TransitionStamps {
                            fulfilled_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    Ok(order) => order,
                    Err(err) => return self.fail_tx(tx, seed, err).await,
                };
            }

            if let FulfillmentPlan::ReportUnlock { attempt_id } = &plan {
                let scope = sku_row.grant_scope();
                let expires_at = sku_row
                    .duration_days()
                    .map(|days| now + chrono::Duration::days(days));
                let request = GrantRequest {
                    org_id: order.org_id,
                    user_id: order.user_id.clone(),
                    anon_id: order.anon_id.clone(),
                    benefit_code: benefit_code.clone(),
                    attempt_id: attempt_id.clone(),
                    order_no: Some(order.order_no.clone()),
                    scope,
                    expires_at,
                    source_order_id: order.id,
                };
                if let Err(err) =
                    grant_attempt_unlock(self.store.as_ref(), &mut tx, request).await
                {
                    return self.fail_tx(tx, seed, err).await;
                }
            }

            if let Err(err) = self
                .stamp_resolution(&mut tx, &claim, &order, &resolution)
                .await
            {
                return self.fail_tx(tx, seed, err).await;
            }
            order
        };

        if let Err(err) = self.store.commit(tx).await {
            if let Err(record_err) = self
                .store
                .record_event_failure(seed, EventMark::failed(err.code.as_str(), &err.message))
                .await
            {
                warn!(error = %record_err, "failed to record webhook commit failure");
            }
            return WebhookOutcome::error(&err);
        }

        info!(
            provider = %seed.provider,
            provider_event_id = %seed.provider_event_id,
            order_no = %order.order_no,
            status = %order.status.as_str(),
            retrying_post_commit_only,
            "webhook payment committed"
        );

        let post_commit = self
            .run_post_commit(&order, &plan, &benefit_code, seed, event_type)
            .await;

        let mark = match &post_commit {
            PostCommitOutcome::Completed { .. } => EventMark::processed().with_order(order.id),
            PostCommitOutcome::Failed { code, message } => {
                EventMark::post_commit_failed(code.clone(), message.clone()).with_order(order.id)
            }
        };
        if let Err(err) = self
            .store
            .mark_event(&seed.provider, &seed.provider_event_id, mark)
            .await
        {
            warn!(error = %err, "failed to stamp webhook event resolution status");
        }

        let mut outcome =
            WebhookOutcome::success(seed.order_no.clone(), seed.provider_event_id.clone());
        outcome.post_commit = Some(post_commit);
        outcome
    }

    /// Refund path: stamp refund fields, move the order to refunded,
    /// and take back every grant the order sourced. Any failure undoes
    /// all of it.
    async fn process_refund(
        &self,
        mut tx: S::Tx,
        seed: &EventSeed,
        claim: &EventClaim,
        order: Order,
        normalized: &NormalizedEvent,
        resolution: &SkuResolution,
    ) -> WebhookOutcome {
        let now = Utc::now();

        if let Err(err) = self
            .store
            .stamp_refund(
                &mut tx,
                order.id,
                normalized.refund_amount_cents,
                normalized.refund_reason.as_deref(),
                now,
            )
            .await
        {
            return self.fail_tx(tx, seed, err).await;
        }

        if let Err(err) = self
            .store
            .try_transition(
                &mut tx,
                order.id,
                order.status,
                OrderStatus::Refunded,
                TransitionStamps {
                    refunded_at: Some(now),
                    ..Default::default()
                },
            )
            .await
        {
            return self.fail_tx(tx, seed, err).await;
        }

        let benefit_code = resolution
            .sku_row
            .as_ref()
            .map(|sku| sku.benefit_code.clone());
        let revoked = match revoke_for_order(
            self.store.as_ref(),
            &mut tx,
            &order,
            benefit_code.as_deref(),
            now,
        )
        .await
        {
            Ok(revoked) => revoked,
            Err(err) => return self.fail_tx(tx, seed, err).await,
        };

        if let Err(err) = self.stamp_resolution(&mut tx, claim, &order, resolution).await {
            return self.fail_tx(tx, seed, err).await;
        }

        if let Err(err) = self.store.commit(tx).await {
            if let Err(record_err) = self
                .store
                .record_event_failure(seed, EventMark::failed(err.code.as_str(), &err.message))
                .await
            {
                warn!(error = %record_err, "failed to record webhook refund commit failure");
            }
            return WebhookOutcome::error(&err);
        }

        if let Err(err) = self
            .store
            .mark_event(
                &seed.provider,
                &seed.provider_event_id,
                EventMark::processed().with_order(order.id),
            )
            .await
        {
            warn!(error = %err, "failed to stamp refund event as processed");
        }

        info!(
            provider = %seed.provider,
            provider_event_id = %seed.provider_event_id,
            order_no = %order.order_no,
            revoked,
            "webhook refund committed"
        );

        let mut outcome =
            WebhookOutcome::success(seed.order_no.clone(), seed.provider_event_id.clone());
        outcome.refunded = true;
        outcome.details = Some(json!({ "revoked": revoked }));
        outcome
    }

    /// Side effects that only make sense once the money moved.
    async fn run_post_commit(
        &self,
        order: &Order,
        plan: &FulfillmentPlan,
        benefit_code: &str,
        seed: &EventSeed,
        event_type: &str,
    ) -> PostCommitOutcome {
        self.telemetry
            .record(
                TelemetryEvent::new("payment_webhook_received", order.org_id)
                    .props(json!({
                        "provider": seed.provider,
                        "provider_event_id": seed.provider_event_id,
                        "order_no": order.order_no,
                        "event_type": event_type,
                    })),
            )
            .await;

        let mut snapshot_dispatched = false;
        match plan {
            FulfillmentPlan::CreditPack { delta } => {
                let idempotency_key =
                    topup_idempotency_key(&seed.provider, &seed.provider_event_id);
                let view = match wallet::top_up(
                    self.store.as_ref(),
                    order.org_id,
                    benefit_code,
                    *delta,
                    &idempotency_key,
                    Some(&order.order_no),
                    order.target_attempt_id.as_deref(),
                    Some(json!({ "source": "payment_webhook" })),
                )
                .await
                {
                    Ok(view) => view,
                    Err(err) => {
                        warn!(error = %err, order_no = %order.order_no, "webhook wallet top-up failed");
                        return PostCommitOutcome::failed(
                            ErrorCode::WalletTopupFailed,
                            err.message,
                        );
                    }
                };
                self.telemetry
                    .record(
                        TelemetryEvent::new("wallet_topped_up", order.org_id).props(json!({
                            "benefit_code": benefit_code,
                            "delta": delta,
                            "balance": view.balance,
                            "idempotent": view.idempotent,
                            "order_no": order.order_no,
                        })),
                    )
                    .await;
            }
            FulfillmentPlan::ReportUnlock { attempt_id } => {
                self.telemetry
                    .record(
                        TelemetryEvent::new("entitlement_granted", order.org_id).props(json!({
                            "benefit_code": benefit_code,
                            "attempt_id": attempt_id,
                            "order_no": order.order_no,
                        })),
                    )
                    .await;
                match self
                    .snapshots
                    .dispatch(SnapshotJob {
                        org_id: order.org_id,
                        attempt_id: attempt_id.clone(),
                        trigger: "payment".to_string(),
                        order_no: Some(order.order_no.clone()),
                    })
                    .await
                {
                    Ok(()) => snapshot_dispatched = true,
                    Err(err) => {
                        warn!(error = %err, attempt_id = %attempt_id, "snapshot dispatch failed");
                        return PostCommitOutcome::failed(
                            ErrorCode::SeedSnapshotFailed,
                            err.message,
                        );
                    }
                }
            }
        }

        let mut success = TelemetryEvent::new("purchase_success", order.org_id).props(json!({
            "order_no": order.order_no,
            "provider": seed.provider,
            "amount_cents": order.amount_cents,
            "currency": order.currency,
            "sku": order.fulfillment_sku(),
        }));
        if let Some(user_id) = &order.user_id {
            success = success.subject(user_id);
        }
        self.telemetry.record(success).await;

        PostCommitOutcome::Completed {
            snapshot_dispatched,
        }
    }

    async fn stamp_resolution(
        &self,
        tx: &mut S::Tx,
        claim: &EventClaim,
        order: &Order,
        resolution: &SkuResolution,
    ) -> Result<(), CommerceError> {
        let requested = resolution
            .requested_sku
            .clone()
            .or_else(|| order.requested_sku.clone());
        let effective = resolution
            .effective_sku
            .clone()
            .or_else(|| order.effective_sku.clone());
        let entitlement = resolution
            .entitlement_id
            .clone()
            .or_else(|| order.entitlement_id.clone());
        self.store
            .stamp_event_resolution(
                tx,
                claim.event.id,
                order.id,
                requested.as_deref(),
                effective.as_deref(),
                entitlement.as_deref(),
            )
            .await
    }

    /// Commits the claim, annotates the event row, and surfaces the
    /// rejection. The claim survives so retries are counted.
    async fn reject(
        &self,
        tx: S::Tx,
        seed: &EventSeed,
        mark: EventMark,
        err: CommerceError,
    ) -> WebhookOutcome {
        if let Err(commit_err) = self.store.commit(tx).await {
            warn!(error = %commit_err, "failed to commit webhook claim before rejection mark");
            return WebhookOutcome::error(&commit_err);
        }
        if let Err(mark_err) = self
            .store
            .mark_event(&seed.provider, &seed.provider_event_id, mark)
            .await
        {
            warn!(error = %mark_err, "failed to annotate rejected webhook event");
        }
        WebhookOutcome::error(&err)
    }

    /// Rolls the transaction back and re-seeds the event row with the
    /// failure, so a first-sight claim discarded by the rollback still
    /// leaves an audit trail.
    async fn fail_tx(&self, tx: S::Tx, seed: &EventSeed, err: CommerceError) -> WebhookOutcome {
        if let Err(rollback_err) = self.store.rollback(tx).await {
            warn!(error = %rollback_err, "webhook transaction rollback failed");
        }
        if let Err(record_err) = self
            .store
            .record_event_failure(seed, EventMark::failed(err.code.as_str(), &err.message))
            .await
        {
            warn!(error = %record_err, "failed to record webhook failure");
        }
        WebhookOutcome::error(&err)
    }
}
