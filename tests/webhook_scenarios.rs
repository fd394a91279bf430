//! End-to-end webhook processing scenarios.
//!
//! These tests drive the full orchestrator over the in-memory store,
//! lock, and sinks: delivery in, outcome out, with the persisted event
//! row, order, wallet, and grants checked after each run. Redelivery
//! and race scenarios assert the exactly-once guarantees directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

use commerce_core::adapters::gateways::GatewayRegistry;
use commerce_core::adapters::jobs::RecordingSnapshotDispatcher;
use commerce_core::adapters::locks::{webhook_lock_key, InMemoryEventLock};
use commerce_core::adapters::memory::InMemoryCommerceStore;
use commerce_core::adapters::telemetry::RecordingEventRecorder;
use commerce_core::application::wallet;
use commerce_core::application::webhook::{WebhookDelivery, WebhookOrchestrator};
use commerce_core::config::PaymentConfig;
use commerce_core::domain::commerce::{
    Order, OrderStatus, PaymentEventStatus, PostCommitOutcome, Sku,
};
use commerce_core::domain::foundation::ErrorCode;
use commerce_core::ports::{CommerceStore, EventLock};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    store: Arc<InMemoryCommerceStore>,
    lock: Arc<InMemoryEventLock>,
    telemetry: Arc<RecordingEventRecorder>,
    snapshots: Arc<RecordingSnapshotDispatcher>,
    orchestrator: WebhookOrchestrator<InMemoryCommerceStore>,
}

fn build_harness(payment: PaymentConfig) -> Harness {
    build_harness_with_store(payment, InMemoryCommerceStore::new())
}

fn build_harness_with_store(payment: PaymentConfig, store: InMemoryCommerceStore) -> Harness {
    let store = Arc::new(store);
    let lock = Arc::new(InMemoryEventLock::new());
    let telemetry = Arc::new(RecordingEventRecorder::new());
    let snapshots = Arc::new(RecordingSnapshotDispatcher::new());
    let orchestrator = WebhookOrchestrator::new(
        Arc::clone(&store),
        GatewayRegistry::from_config(&payment),
        Arc::clone(&lock) as Arc<dyn EventLock>,
        Arc::clone(&telemetry) as _,
        Arc::clone(&snapshots) as _,
        payment,
    );
    Harness {
        store,
        lock,
        telemetry,
        snapshots,
        orchestrator,
    }
}

fn credit_pack_sku() -> Sku {
    Sku {
        sku: "CREDITS_10".to_string(),
        kind: "credit_pack".to_string(),
        benefit_code: "ASSESSMENT_CREDIT".to_string(),
        unit_qty: 10,
        scope: None,
        price_cents: 1999,
        currency: "USD".to_string(),
        is_active: true,
        meta: json!({}),
    }
}

fn report_unlock_sku() -> Sku {
    Sku {
        sku: "REPORT_FULL".to_string(),
        kind: "report_unlock".to_string(),
        benefit_code: "FULL_REPORT".to_string(),
        unit_qty: 1,
        scope: None,
        price_cents: 999,
        currency: "USD".to_string(),
        is_active: true,
        meta: json!({}),
    }
}

fn order(order_no: &str, sku: &str, amount_cents: i64, attempt: Option<&str>) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        order_no: order_no.to_string(),
        org_id: 1,
        user_id: Some("u1".to_string()),
        anon_id: None,
        provider: "billing".to_string(),
        status: OrderStatus::Created,
        sku: sku.to_string(),
        requested_sku: None,
        effective_sku: None,
        entitlement_id: None,
        quantity: 1,
        amount_cents,
        currency: "USD".to_string(),
        target_attempt_id: attempt.map(String::from),
        external_trade_no: None,
        idempotency_key: None,
        paid_at: None,
        fulfilled_at: None,
        refunded_at: None,
        refund_amount_cents: None,
        refund_reason: None,
        created_at: now,
        updated_at: now,
    }
}

fn payment_delivery(event_id: &str, order_no: &str, amount_cents: i64) -> WebhookDelivery {
    WebhookDelivery {
        provider: "billing".to_string(),
        payload: json!({
            "event_id": event_id,
            "order_no": order_no,
            "event_type": "payment_succeeded",
            "amount_cents": amount_cents,
            "currency": "USD",
            "transaction_id": format!("trade-{event_id}"),
        }),
        signature_ok: true,
        raw_sha256: None,
        raw_size_bytes: None,
        payload_s3_key: None,
    }
}

fn refund_delivery(event_id: &str, order_no: &str, amount_cents: i64) -> WebhookDelivery {
    WebhookDelivery {
        provider: "billing".to_string(),
        payload: json!({
            "event_id": event_id,
            "order_no": order_no,
            "event_type": "refund_succeeded",
            "refund_amount_cents": amount_cents,
            "refund_reason": "requested_by_customer",
            "currency": "USD",
        }),
        signature_ok: true,
        raw_sha256: None,
        raw_size_bytes: None,
        payload_s3_key: None,
    }
}

// =============================================================================
// Success path
// =============================================================================

#[tokio::test]
async fn credit_pack_payment_tops_up_wallet_and_settles_order() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let outcome = harness
        .orchestrator
        .handle(payment_delivery("evt_1", "ord_1", 1999))
        .await;

    assert!(outcome.ok, "{:?}", outcome);
    assert_eq!(outcome.status, 200);
    assert!(!outcome.duplicate);
    assert!(matches!(
        outcome.post_commit,
        Some(PostCommitOutcome::Completed { .. })
    ));

    let settled = harness.store.find_order("ord_1").await.unwrap().unwrap();
    assert_eq!(settled.status, OrderStatus::Fulfilled);
    assert!(settled.paid_at.is_some());
    assert_eq!(settled.external_trade_no.as_deref(), Some("trade-evt_1"));

    let balance = harness
        .store
        .wallet_balance(1, "ASSESSMENT_CREDIT")
        .await
        .unwrap();
    assert_eq!(balance, 10);
    let entries = harness.store.ledger_entries(1, "ASSESSMENT_CREDIT").await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].delta, 10);
    assert_eq!(entries[0].idempotency_key, "TOPUP:billing:evt_1");
    assert_eq!(entries[0].order_no.as_deref(), Some("ord_1"));

    let event = harness.store.find_event("billing", "evt_1").await.unwrap().unwrap();
    assert_eq!(event.status, PaymentEventStatus::Processed);
    assert_eq!(event.attempts, 1);
    assert!(event.processed_at.is_some());
    assert_eq!(event.order_id, Some(settled.id));

    let names = harness.telemetry.names().await;
    assert!(names.contains(&"payment_webhook_received"));
    assert!(names.contains(&"wallet_topped_up"));
    assert!(names.contains(&"purchase_success"));
}

#[tokio::test]
async fn report_unlock_grants_access_and_dispatches_snapshot() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(report_unlock_sku()).await;
    harness
        .store
        .insert_order(&order("ord_2", "REPORT_FULL", 999, Some("att_1")))
        .await
        .unwrap();

    let outcome = harness
        .orchestrator
        .handle(payment_delivery("evt_2", "ord_2", 999))
        .await;

    assert!(outcome.ok, "{:?}", outcome);
    assert_eq!(
        outcome.post_commit,
        Some(PostCommitOutcome::Completed {
            snapshot_dispatched: true
        })
    );

    let grants = harness
        .store
        .find_grants_by_attempt(1, "att_1")
        .await
        .unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].benefit_code, "FULL_REPORT");
    assert_eq!(grants[0].order_no.as_deref(), Some("ord_2"));
    assert_eq!(grants[0].user_id, "u1");

    let jobs = harness.snapshots.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempt_id, "att_1");
    assert_eq!(jobs[0].trigger, "payment");

    let granted: Vec<_> = harness
        .telemetry
        .events()
        .await
        .into_iter()
        .filter(|e| e.name == "entitlement_granted")
        .collect();
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].props["attempt_id"], "att_1");
}

// =============================================================================
// Idempotency and races
// =============================================================================

#[tokio::test]
async fn redelivery_of_processed_event_is_a_duplicate_with_no_second_topup() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let first = harness
        .orchestrator
        .handle(payment_delivery("evt_1", "ord_1", 1999))
        .await;
    let second = harness
        .orchestrator
        .handle(payment_delivery("evt_1", "ord_1", 1999))
        .await;

    assert!(first.ok && !first.duplicate);
    assert!(second.ok && second.duplicate);
    assert_eq!(second.status, 200);

    assert_eq!(
        harness.store.wallet_balance(1, "ASSESSMENT_CREDIT").await.unwrap(),
        10
    );
    let event = harness.store.find_event("billing", "evt_1").await.unwrap().unwrap();
    assert_eq!(event.attempts, 1);
}

#[tokio::test]
async fn distinct_events_for_same_order_topup_once_per_event() {
    // Two different provider events for the same order are both valid;
    // the second finds a settled order and only re-runs side effects
    // under its own idempotency key.
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let first = harness
        .orchestrator
        .handle(payment_delivery("evt_a", "ord_1", 1999))
        .await;
    let second = harness
        .orchestrator
        .handle(payment_delivery("evt_b", "ord_1", 1999))
        .await;

    assert!(first.ok && second.ok);
    // Each event carries its own TOPUP key, so each credits once.
    assert_eq!(
        harness.store.wallet_balance(1, "ASSESSMENT_CREDIT").await.unwrap(),
        20
    );
    assert_eq!(
        harness.store.ledger_sum(1, "ASSESSMENT_CREDIT").await.unwrap(),
        20
    );
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_settle_exactly_once() {
    let store = InMemoryCommerceStore::new().with_latency(Duration::from_millis(50));
    let harness = Arc::new(build_harness_with_store(PaymentConfig::default(), store));
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let a = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .orchestrator
                .handle(payment_delivery("evt_1", "ord_1", 1999))
                .await
        })
    };
    let b = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .orchestrator
                .handle(payment_delivery("evt_1", "ord_1", 1999))
                .await
        })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert!(a.ok && b.ok);
    assert!(
        a.duplicate != b.duplicate,
        "exactly one delivery should be the duplicate: {:?} / {:?}",
        a,
        b
    );
    assert_eq!(
        harness.store.wallet_balance(1, "ASSESSMENT_CREDIT").await.unwrap(),
        10
    );
}

#[tokio::test]
async fn lock_timeout_reports_webhook_busy() {
    let harness = build_harness(PaymentConfig {
        lock_block_secs: 0,
        ..Default::default()
    });
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    // Hold the event lock so the delivery cannot acquire it.
    let key = webhook_lock_key("billing", "evt_1");
    let lease = harness
        .lock
        .acquire(&key, Duration::from_secs(10), Duration::from_secs(1))
        .await
        .unwrap();

    let outcome = harness
        .orchestrator
        .handle(payment_delivery("evt_1", "ord_1", 1999))
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, 500);
    assert_eq!(outcome.error_code.as_deref(), Some("WEBHOOK_BUSY"));
    // Nothing persisted: the claim never ran.
    assert!(harness.store.find_event("billing", "evt_1").await.unwrap().is_none());

    harness.lock.release(lease).await.unwrap();
}

// =============================================================================
// Guards
// =============================================================================

#[tokio::test]
async fn amount_mismatch_rejects_and_leaves_order_untouched() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let outcome = harness
        .orchestrator
        .handle(payment_delivery("evt_1", "ord_1", 500))
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, 400);
    assert_eq!(outcome.error_code.as_deref(), Some("AMOUNT_MISMATCH"));

    let order = harness.store.find_order("ord_1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(
        harness.store.wallet_balance(1, "ASSESSMENT_CREDIT").await.unwrap(),
        0
    );

    // The rejection itself is durable and auditable.
    let event = harness.store.find_event("billing", "evt_1").await.unwrap().unwrap();
    assert_eq!(event.status, PaymentEventStatus::Rejected);
    assert_eq!(event.last_error_code.as_deref(), Some("AMOUNT_MISMATCH"));
}

#[tokio::test]
async fn invalid_signature_is_rejected_after_claim() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let mut delivery = payment_delivery("evt_1", "ord_1", 1999);
    delivery.signature_ok = false;
    let outcome = harness.orchestrator.handle(delivery).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code.as_deref(), Some("INVALID_SIGNATURE"));
    let event = harness.store.find_event("billing", "evt_1").await.unwrap().unwrap();
    assert_eq!(event.status, PaymentEventStatus::Rejected);
    assert!(!event.signature_ok);
}

#[tokio::test]
async fn unknown_order_is_recorded_as_orphan() {
    let harness = build_harness(PaymentConfig::default());

    let outcome = harness
        .orchestrator
        .handle(payment_delivery("evt_1", "ord_missing", 1999))
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, 404);
    assert_eq!(outcome.error_code.as_deref(), Some("ORDER_NOT_FOUND"));
    let event = harness
        .store
        .find_event("billing", "evt_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, PaymentEventStatus::Orphan);
}

#[tokio::test]
async fn provider_mismatch_is_rejected() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    let mut o = order("ord_1", "CREDITS_10", 1999, None);
    o.provider = "stripe".to_string();
    harness.store.insert_order(&o).await.unwrap();

    let outcome = harness
        .orchestrator
        .handle(payment_delivery("evt_1", "ord_1", 1999))
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code.as_deref(), Some("PROVIDER_MISMATCH"));
}

#[tokio::test]
async fn disallowed_event_type_is_rejected() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let mut delivery = payment_delivery("evt_1", "ord_1", 1999);
    delivery.payload["event_type"] = Value::String("payment.created".to_string());
    let outcome = harness.orchestrator.handle(delivery).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code.as_deref(), Some("EVENT_TYPE_NOT_ALLOWED"));
}

#[tokio::test]
async fn stub_provider_is_not_found_unless_enabled() {
    let harness = build_harness(PaymentConfig::default());
    let delivery = WebhookDelivery {
        provider: "stub".to_string(),
        payload: json!({
            "provider_event_id": "evt_1",
            "order_no": "ord_1",
            "amount_cents": 100,
            "currency": "USD",
        }),
        signature_ok: true,
        raw_sha256: None,
        raw_size_bytes: None,
        payload_s3_key: None,
    };

    let outcome = harness.orchestrator.handle(delivery.clone()).await;
    assert!(!outcome.ok);
    assert_eq!(outcome.status, 404);
    assert_eq!(outcome.error_code.as_deref(), Some("PROVIDER_DISABLED"));

    // With the stub allowed, the same delivery reaches order lookup.
    let enabled = build_harness(PaymentConfig {
        allow_stub: true,
        ..Default::default()
    });
    let outcome = enabled.orchestrator.handle(delivery).await;
    assert_eq!(outcome.error_code.as_deref(), Some("ORDER_NOT_FOUND"));
}

// =============================================================================
// Refunds
// =============================================================================

#[tokio::test]
async fn refund_reverses_report_access() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(report_unlock_sku()).await;
    harness
        .store
        .insert_order(&order("ord_2", "REPORT_FULL", 999, Some("att_1")))
        .await
        .unwrap();

    let paid = harness
        .orchestrator
        .handle(payment_delivery("evt_pay", "ord_2", 999))
        .await;
    assert!(paid.ok, "{:?}", paid);

    let refunded = harness
        .orchestrator
        .handle(refund_delivery("evt_refund", "ord_2", 999))
        .await;
    assert!(refunded.ok, "{:?}", refunded);
    assert!(refunded.refunded);
    assert_eq!(refunded.details.as_ref().unwrap()["revoked"], 1);

    let order = harness.store.find_order("ord_2").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.refund_amount_cents, Some(999));
    assert!(order.refunded_at.is_some());

    let grants = harness.store.grants().await;
    assert_eq!(grants.len(), 1);
    assert!(!grants[0].is_active(Utc::now()));

    let event = harness
        .store
        .find_event("billing", "evt_refund")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, PaymentEventStatus::Processed);
}

#[tokio::test]
async fn refund_of_unrefundable_order_rolls_back_entirely() {
    // Canceled is terminal, so the refund transition fails after the
    // refund stamps were already written; the rollback must discard
    // both.
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(report_unlock_sku()).await;
    let mut o = order("ord_2", "REPORT_FULL", 999, Some("att_1"));
    o.status = OrderStatus::Canceled;
    harness.store.insert_order(&o).await.unwrap();

    let outcome = harness
        .orchestrator
        .handle(refund_delivery("evt_refund", "ord_2", 999))
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code.as_deref(), Some("ORDER_STATUS_INVALID"));

    // The rollback also discarded the refund stamps.
    let order = harness.store.find_order("ord_2").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);
    assert!(order.refunded_at.is_none());
    assert!(order.refund_amount_cents.is_none());

    // The failure itself is re-recorded after the rollback.
    let event = harness
        .store
        .find_event("billing", "evt_refund")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, PaymentEventStatus::Failed);
}

// =============================================================================
// Post-commit failure isolation
// =============================================================================

#[tokio::test]
async fn snapshot_dispatch_failure_keeps_financial_state_committed() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(report_unlock_sku()).await;
    harness
        .store
        .insert_order(&order("ord_2", "REPORT_FULL", 999, Some("att_1")))
        .await
        .unwrap();
    harness.snapshots.fail_dispatches().await;

    let outcome = harness
        .orchestrator
        .handle(payment_delivery("evt_2", "ord_2", 999))
        .await;

    // Financial result is a success; the side-effect failure is
    // reported separately.
    assert!(outcome.ok, "{:?}", outcome);
    assert!(matches!(
        outcome.post_commit,
        Some(PostCommitOutcome::Failed { .. })
    ));

    let order = harness.store.find_order("ord_2").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert_eq!(harness.store.grants().await.len(), 1);

    let event = harness.store.find_event("billing", "evt_2").await.unwrap().unwrap();
    assert_eq!(event.status, PaymentEventStatus::PostCommitFailed);
    assert!(event.processed_at.is_none());
}

#[tokio::test]
async fn redelivery_after_post_commit_failure_only_reruns_side_effects() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(report_unlock_sku()).await;
    harness
        .store
        .insert_order(&order("ord_2", "REPORT_FULL", 999, Some("att_1")))
        .await
        .unwrap();
    harness.snapshots.fail_dispatches().await;

    let first = harness
        .orchestrator
        .handle(payment_delivery("evt_2", "ord_2", 999))
        .await;
    assert!(matches!(
        first.post_commit,
        Some(PostCommitOutcome::Failed { .. })
    ));

    // The queue recovers; the provider redelivers the same event.
    let recovered = build_harness_with_store_sinks(&harness);
    let second = recovered.handle(payment_delivery("evt_2", "ord_2", 999)).await;

    assert!(second.ok, "{:?}", second);
    assert_eq!(
        second.post_commit,
        Some(PostCommitOutcome::Completed {
            snapshot_dispatched: true
        })
    );

    // The financial mutation did not run twice.
    assert_eq!(harness.store.grants().await.len(), 1);
    let event = harness.store.find_event("billing", "evt_2").await.unwrap().unwrap();
    assert_eq!(event.status, PaymentEventStatus::Processed);
    assert_eq!(event.attempts, 2);
}

/// A second orchestrator over the same store but healthy sinks,
/// standing in for the system after the queue outage ends.
fn build_harness_with_store_sinks(
    harness: &Harness,
) -> WebhookOrchestrator<InMemoryCommerceStore> {
    WebhookOrchestrator::new(
        Arc::clone(&harness.store),
        GatewayRegistry::from_config(&PaymentConfig::default()),
        Arc::new(InMemoryEventLock::new()) as _,
        Arc::new(RecordingEventRecorder::new()) as _,
        Arc::new(RecordingSnapshotDispatcher::new()) as _,
        PaymentConfig::default(),
    )
}

// =============================================================================
// Dry run
// =============================================================================

#[tokio::test]
async fn dry_run_validates_without_persisting_anything() {
    let harness = build_harness(PaymentConfig::default());
    harness.store.put_sku(credit_pack_sku()).await;
    harness
        .store
        .insert_order(&order("ord_1", "CREDITS_10", 1999, None))
        .await
        .unwrap();

    let delivery = payment_delivery("evt_1", "ord_1", 1999);
    let outcome = harness.orchestrator.evaluate_dry_run(&delivery).await;

    assert!(outcome.ok);
    assert!(outcome.dry_run);
    assert_eq!(outcome.order_no.as_deref(), Some("ord_1"));

    // No event row, no status change, no wallet movement.
    assert!(harness.store.find_event("billing", "evt_1").await.unwrap().is_none());
    let order = harness.store.find_order("ord_1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(
        harness.store.wallet_balance(1, "ASSESSMENT_CREDIT").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn dry_run_surfaces_signature_and_event_type_failures() {
    let harness = build_harness(PaymentConfig::default());

    let mut delivery = payment_delivery("evt_1", "ord_1", 1999);
    delivery.signature_ok = false;
    let outcome = harness.orchestrator.evaluate_dry_run(&delivery).await;
    assert!(!outcome.ok && outcome.dry_run);
    assert_eq!(outcome.error_code.as_deref(), Some("INVALID_SIGNATURE"));

    let mut delivery = payment_delivery("evt_1", "ord_1", 1999);
    delivery.payload["event_type"] = Value::String("payment.created".to_string());
    let outcome = harness.orchestrator.evaluate_dry_run(&delivery).await;
    assert!(!outcome.ok && outcome.dry_run);
    assert_eq!(outcome.error_code.as_deref(), Some("EVENT_TYPE_NOT_ALLOWED"));
}

// =============================================================================
// Wallet invariant
// =============================================================================

#[tokio::test]
async fn consume_without_balance_is_a_402() {
    let harness = build_harness(PaymentConfig::default());
    let err = wallet::consume(
        harness.store.as_ref(),
        1,
        "ASSESSMENT_CREDIT",
        "att_1",
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InsufficientCredits);
    assert_eq!(err.status(), 402);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any interleaving of replayed top-ups and per-attempt consumes
    /// keeps the balance equal to the ledger sum and applies each
    /// idempotency key at most once.
    #[test]
    fn wallet_balance_always_equals_ledger_sum(
        ops in prop::collection::vec(
            prop_oneof![
                (0u8..4, 1i64..50).prop_map(|(key, delta)| (true, key, delta)),
                (0u8..4).prop_map(|attempt| (false, attempt, 0i64)),
            ],
            1..24,
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let store = InMemoryCommerceStore::new();
            let mut expected: i64 = 0;

            for (is_topup, key, delta) in ops {
                if is_topup {
                    let idempotency_key = format!("TOPUP:test:evt_{key}");
                    let view = wallet::top_up(
                        &store, 1, "ASSESSMENT_CREDIT", delta, &idempotency_key,
                        None, None, None,
                    )
                    .await
                    .unwrap();
                    if !view.idempotent {
                        expected += delta;
                    }
                } else {
                    let attempt = format!("att_{key}");
                    match wallet::consume(&store, 1, "ASSESSMENT_CREDIT", &attempt, None).await {
                        Ok(view) => {
                            if !view.idempotent {
                                expected -= 1;
                            }
                        }
                        Err(err) => {
                            prop_assert_eq!(err.code, ErrorCode::InsufficientCredits);
                            prop_assert!(expected <= 0);
                        }
                    }
                }

                let balance = store.wallet_balance(1, "ASSESSMENT_CREDIT").await.unwrap();
                let ledger = store.ledger_sum(1, "ASSESSMENT_CREDIT").await.unwrap();
                prop_assert_eq!(balance, ledger);
                prop_assert_eq!(balance, expected);
            }
            Ok(())
        })?;
    }
}
