//! PostgreSQL implementation of `CommerceStore`.
//!
//! Exactly-once primitives map onto the database directly:
//! `INSERT ... ON CONFLICT DO NOTHING` for first-sight claims and
//! idempotency-keyed ledger rows, `SELECT ... FOR UPDATE` for the
//! pessimistic paid transition, and compare-and-set `UPDATE ... WHERE
//! status = $from` for optimistic transitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::commerce::{
    consume_idempotency_key, normalize_code, BenefitGrant, GrantScope, GrantStatus, Order,
    OrderStatus, PaymentEvent, PaymentEventStatus, Sku, WalletView,
};
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::{
    CommerceStore, ConsumeRequest, EventClaim, EventMark, EventSeed, PaidTransition, TopupRequest,
    TransitionStamps,
};

/// PostgreSQL-backed commerce store.
#[derive(Clone)]
pub struct PostgresCommerceStore {
    pool: PgPool,
}

impl PostgresCommerceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const EVENT_COLUMNS: &str = "id, provider, provider_event_id, order_id, order_no, event_type, \
     status, attempts, signature_ok, requested_sku, effective_sku, entitlement_id, \
     last_error_code, last_error_message, payload_sha256, payload_size_bytes, payload_s3_key, \
     payload_excerpt, received_at, handled_at, processed_at";

const ORDER_COLUMNS: &str = "id, order_no, org_id, user_id, anon_id, provider, status, sku, \
     requested_sku, effective_sku, entitlement_id, quantity, amount_cents, currency, \
     target_attempt_id, external_trade_no, idempotency_key, paid_at, fulfilled_at, refunded_at, \
     refund_amount_cents, refund_reason, created_at, updated_at";

const SKU_COLUMNS: &str =
    "sku, kind, benefit_code, unit_qty, scope, price_cents, currency, is_active, meta";

const GRANT_COLUMNS: &str = "id, org_id, user_id, benefit_ref, benefit_code, scope, attempt_id, \
     order_no, status, expires_at, source_order_id, revoked_at, created_at, updated_at";

#[async_trait]
impl CommerceStore for PostgresCommerceStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, CommerceError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), CommerceError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), CommerceError> {
        Ok(tx.rollback().await?)
    }

    async fn claim_event(
        &self,
        tx: &mut Self::Tx,
        seed: &EventSeed,
    ) -> Result<EventClaim, CommerceError> {
        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO payment_events (
                id, provider, provider_event_id, order_no, event_type, status, attempts,
                signature_ok, payload_sha256, payload_size_bytes, payload_s3_key,
                payload_excerpt, received_at, handled_at
            ) VALUES ($1, $2, $3, $4, $5, 'received', 1, $6, $7, $8, $9, $10, $11, $11)
            ON CONFLICT (provider, provider_event_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&seed.provider)
        .bind(&seed.provider_event_id)
        .bind(&seed.order_no)
        .bind(&seed.event_type)
        .bind(seed.signature_ok)
        .bind(&seed.payload_sha256)
        .bind(seed.payload_size_bytes)
        .bind(&seed.payload_s3_key)
        .bind(&seed.payload_excerpt)
        .bind(now)
        .execute(&mut **tx)
        .await?
        .rows_affected()
            > 0;

        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events \
             WHERE provider = $1 AND provider_event_id = $2 FOR UPDATE"
        ))
        .bind(&seed.provider)
        .bind(&seed.provider_event_id)
        .fetch_one(&mut **tx)
        .await?;
        let mut event = row_to_event(row)?;

        // Redelivery of a non-processed event counts another attempt;
        // processed rows are never touched again.
        if !inserted && event.status != PaymentEventStatus::Processed {
            let row = sqlx::query(&format!(
                "UPDATE payment_events \
                 SET attempts = GREATEST(attempts, 0) + 1, handled_at = $2 \
                 WHERE id = $1 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(event.id)
            .bind(now)
            .fetch_one(&mut **tx)
            .await?;
            event = row_to_event(row)?;
        }

        Ok(EventClaim { inserted, event })
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
        let updated = sqlx::query(
            r#"
            UPDATE payment_events
            SET order_id = $2, requested_sku = $3, effective_sku = $4, entitlement_id = $5
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(order_id)
        .bind(requested_sku)
        .bind(effective_sku)
        .bind(entitlement_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(CommerceError::new(
                ErrorCode::EventInitFailed,
                "payment event disappeared mid-transaction",
            ));
        }
        Ok(())
    }

    async fn mark_event(
        &self,
        provider: &str,
        provider_event_id: &str,
        mark: EventMark,
    ) -> Result<(), CommerceError> {
        let now = Utc::now();
        let updated = sqlx::query(
            r#"
            UPDATE payment_events
            SET status = $3,
                last_error_code = $4,
                last_error_message = $5,
                order_id = COALESCE($6, order_id),
                handled_at = $7,
                processed_at = CASE WHEN $3 = 'processed' THEN $7 ELSE processed_at END
            WHERE provider = $1 AND provider_event_id = $2
            "#,
        )
        .bind(provider)
        .bind(provider_event_id)
        .bind(mark.status.as_str())
        .bind(&mark.error_code)
        .bind(&mark.error_message)
        .bind(mark.order_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(CommerceError::new(
                ErrorCode::EventInitFailed,
                "cannot mark a payment event that was never claimed",
            ));
        }
        Ok(())
    }

    async fn record_event_failure(
        &self,
        seed: &EventSeed,
        mark: EventMark,
    ) -> Result<(), CommerceError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO payment_events (
                id, provider, provider_event_id, order_no, event_type, status, attempts,
                signature_ok, last_error_code, last_error_message, payload_sha256,
                payload_size_bytes, payload_s3_key, payload_excerpt, received_at, handled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            ON CONFLICT (provider, provider_event_id) DO UPDATE
            SET status = EXCLUDED.status,
                last_error_code = EXCLUDED.last_error_code,
                last_error_message = EXCLUDED.last_error_message,
                handled_at = EXCLUDED.handled_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&seed.provider)
        .bind(&seed.provider_event_id)
        .bind(&seed.order_no)
        .bind(&seed.event_type)
        .bind(mark.status.as_str())
        .bind(seed.signature_ok)
        .bind(&mark.error_code)
        .bind(&mark.error_message)
        .bind(&seed.payload_sha256)
        .bind(seed.payload_size_bytes)
        .bind(&seed.payload_s3_key)
        .bind(&seed.payload_excerpt)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_event(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<PaymentEvent>, CommerceError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events \
             WHERE provider = $1 AND provider_event_id = $2"
        ))
        .bind(provider)
        .bind(provider_event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_event).transpose()
    }

    async fn find_order_for_update(
        &self,
        tx: &mut Self::Tx,
        order_no: &str,
    ) -> Result<Option<Order>, CommerceError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1 FOR UPDATE"
        ))
        .bind(order_no)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn find_order(&self, order_no: &str) -> Result<Option<Order>, CommerceError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1"
        ))
        .bind(order_no)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn insert_order(&self, order: &Order) -> Result<(), CommerceError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_no, org_id, user_id, anon_id, provider, status, sku,
                requested_sku, effective_sku, entitlement_id, quantity, amount_cents,
                currency, target_attempt_id, external_trade_no, idempotency_key,
                paid_at, fulfilled_at, refunded_at, refund_amount_cents, refund_reason,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_no)
        .bind(order.org_id)
        .bind(&order.user_id)
        .bind(&order.anon_id)
        .bind(&order.provider)
        .bind(order.status.as_str())
        .bind(&order.sku)
        .bind(&order.requested_sku)
        .bind(&order.effective_sku)
        .bind(&order.entitlement_id)
        .bind(order.quantity)
        .bind(order.amount_cents)
        .bind(&order.currency)
        .bind(&order.target_attempt_id)
        .bind(&order.external_trade_no)
        .bind(&order.idempotency_key)
        .bind(order.paid_at)
        .bind(order.fulfilled_at)
        .bind(order.refunded_at)
        .bind(order.refund_amount_cents)
        .bind(&order.refund_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_order_by_idempotency(
        &self,
        org_id: i64,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<Option<Order>, CommerceError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE org_id = $1 AND provider = $2 AND idempotency_key = $3 \
             ORDER BY created_at LIMIT 1"
        ))
        .bind(org_id)
        .bind(provider)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn try_transition(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        stamps: TransitionStamps,
    ) -> Result<Order, CommerceError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CommerceError::new(ErrorCode::OrderNotFound, "Order not found"))?;
        let order = row_to_order(row)?;

        if order.status == to {
            return Ok(order);
        }
        if !from.can_transition_to(to) {
            return Err(CommerceError::new(
                ErrorCode::OrderStatusInvalid,
                format!(
                    "Cannot transition order from {} to {}",
                    from.as_str(),
                    to.as_str()
                ),
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

        let row = sqlx::query(&format!(
            "UPDATE orders \
             SET status = $3, \
                 paid_at = COALESCE(paid_at, $4), \
                 fulfilled_at = COALESCE(fulfilled_at, $5), \
                 refunded_at = COALESCE(refunded_at, $6), \
                 external_trade_no = COALESCE(external_trade_no, $7), \
                 updated_at = $8 \
             WHERE id = $1 AND status = $2 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(stamps.paid_at)
        .bind(stamps.fulfilled_at)
        .bind(stamps.refunded_at)
        .bind(&stamps.external_trade_no)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;
        row_to_order(row)
    }

    async fn transition_paid_locked(
        &self,
        tx: &mut Self::Tx,
        order_no: &str,
        stamps: TransitionStamps,
    ) -> Result<PaidTransition, CommerceError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1 FOR UPDATE"
        ))
        .bind(order_no)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CommerceError::new(ErrorCode::OrderNotFound, "Order not found"))?;
        let order = row_to_order(row)?;

        if order.status.is_settled() {
            return Ok(PaidTransition {
                order,
                already_paid: true,
            });
        }
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(CommerceError::new(
                ErrorCode::OrderStatusInvalid,
                format!("Cannot mark a {} order paid", order.status.as_str()),
            ));
        }

        let row = sqlx::query(&format!(
            "UPDATE orders \
             SET status = 'paid', \
                 paid_at = COALESCE(paid_at, $2), \
                 external_trade_no = COALESCE(external_trade_no, $3), \
                 updated_at = $4 \
             WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.id)
        .bind(stamps.paid_at.unwrap_or_else(Utc::now))
        .bind(&stamps.external_trade_no)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;

        Ok(PaidTransition {
            order: row_to_order(row)?,
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
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET refund_amount_cents = COALESCE(refund_amount_cents, $2),
                refund_reason = COALESCE(refund_reason, $3),
                refunded_at = COALESCE(refunded_at, $4),
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(refund_amount_cents)
        .bind(refund_reason)
        .bind(refunded_at)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(CommerceError::new(ErrorCode::OrderNotFound, "Order not found"));
        }
        Ok(())
    }

    async fn insert_grant_if_absent(
        &self,
        tx: &mut Self::Tx,
        grant: &BenefitGrant,
    ) -> Result<bool, CommerceError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM benefit_grants
                WHERE org_id = $1 AND benefit_code = $2 AND scope = $3
                  AND attempt_id = $4 AND user_id = $5 AND status = 'active'
            )
            "#,
        )
        .bind(grant.org_id)
        .bind(&grant.benefit_code)
        .bind(grant.scope.as_str())
        .bind(&grant.attempt_id)
        .bind(&grant.user_id)
        .fetch_one(&mut **tx)
        .await?;
        if exists {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO benefit_grants (
                id, org_id, user_id, benefit_ref, benefit_code, scope, attempt_id,
                order_no, status, expires_at, source_order_id, revoked_at,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(grant.id)
        .bind(grant.org_id)
        .bind(&grant.user_id)
        .bind(&grant.benefit_ref)
        .bind(&grant.benefit_code)
        .bind(grant.scope.as_str())
        .bind(&grant.attempt_id)
        .bind(&grant.order_no)
        .bind(grant.status.as_str())
        .bind(grant.expires_at)
        .bind(grant.source_order_id)
        .bind(grant.revoked_at)
        .bind(grant.created_at)
        .bind(grant.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(true)
    }

    async fn revoke_grants_by_order_no(
        &self,
        tx: &mut Self::Tx,
        org_id: i64,
        order_no: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CommerceError> {
        Ok(sqlx::query(
            r#"
            UPDATE benefit_grants
            SET status = 'revoked', revoked_at = $3, updated_at = $3
            WHERE org_id = $1 AND order_no = $2 AND status = 'active'
            "#,
        )
        .bind(org_id)
        .bind(order_no)
        .bind(now)
        .execute(&mut **tx)
        .await?
        .rows_affected())
    }

    async fn revoke_grants_by_attempt(
        &self,
        tx: &mut Self::Tx,
        org_id: i64,
        benefit_code: &str,
        attempt_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CommerceError> {
        Ok(sqlx::query(
            r#"
            UPDATE benefit_grants
            SET status = 'revoked', revoked_at = $4, updated_at = $4
            WHERE org_id = $1 AND benefit_code = $2 AND attempt_id = $3
              AND status = 'active'
            "#,
        )
        .bind(org_id)
        .bind(normalize_code(benefit_code))
        .bind(attempt_id)
        .bind(now)
        .execute(&mut **tx)
        .await?
        .rows_affected())
    }

    async fn has_active_grant(
        &self,
        org_id: i64,
        benefit_code: &str,
        attempt_id: &str,
        subject_refs: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, CommerceError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM benefit_grants
                WHERE org_id = $1 AND benefit_code = $2 AND status = 'active'
                  AND (expires_at IS NULL OR expires_at > $3)
                  AND (scope = 'org' OR attempt_id = $4)
                  AND (user_id = ANY($5) OR benefit_ref = ANY($5))
            )
            "#,
        )
        .bind(org_id)
        .bind(normalize_code(benefit_code))
        .bind(now)
        .bind(attempt_id)
        .bind(subject_refs)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_grants_by_attempt(
        &self,
        org_id: i64,
        attempt_id: &str,
    ) -> Result<Vec<BenefitGrant>, CommerceError> {
        let rows = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM benefit_grants \
             WHERE org_id = $1 AND attempt_id = $2 ORDER BY created_at"
        ))
        .bind(org_id)
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_grant).collect()
    }

    async fn ledger_entry_exists(&self, idempotency_key: &str) -> Result<bool, CommerceError> {
        Ok(sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM benefit_wallet_ledgers WHERE idempotency_key = $1)",
        )
        .bind(idempotency_key)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn top_up(&self, request: TopupRequest) -> Result<WalletView, CommerceError> {
        let code = normalize_code(&request.benefit_code);
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO benefit_wallet_ledgers (
                org_id, benefit_code, delta, reason, idempotency_key,
                order_no, attempt_id, meta, created_at
            ) VALUES ($1, $2, $3, 'topup', $4, $5, $6, $7, $8)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(request.org_id)
        .bind(&code)
        .bind(request.delta)
        .bind(&request.idempotency_key)
        .bind(&request.order_no)
        .bind(&request.attempt_id)
        .bind(&request.meta)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            tx.commit().await?;
            let balance = self.wallet_balance(request.org_id, &code).await?;
            return Ok(WalletView {
                balance,
                idempotent: true,
            });
        }

        let balance: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO benefit_wallets (org_id, benefit_code, balance, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (org_id, benefit_code) DO UPDATE
            SET balance = benefit_wallets.balance + EXCLUDED.balance,
                updated_at = EXCLUDED.updated_at
            RETURNING balance
            "#,
        )
        .bind(request.org_id)
        .bind(&code)
        .bind(request.delta)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WalletView {
            balance,
            idempotent: false,
        })
    }

    async fn consume(&self, request: ConsumeRequest) -> Result<WalletView, CommerceError> {
        let code = normalize_code(&request.benefit_code);
        let key = consume_idempotency_key(&request.attempt_id, &code);
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Consumption marker first: one credit per attempt/benefit pair.
        let marked = sqlx::query(
            r#"
            INSERT INTO benefit_consumptions (org_id, benefit_code, attempt_id, order_no, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (org_id, benefit_code, attempt_id) DO NOTHING
            "#,
        )
        .bind(request.org_id)
        .bind(&code)
        .bind(&request.attempt_id)
        .bind(&request.order_no)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !marked {
            tx.commit().await?;
            let balance = self.wallet_balance(request.org_id, &code).await?;
            return Ok(WalletView {
                balance,
                idempotent: true,
            });
        }

        let balance: Option<i64> = sqlx::query_scalar(
            "SELECT balance FROM benefit_wallets \
             WHERE org_id = $1 AND benefit_code = $2 FOR UPDATE",
        )
        .bind(request.org_id)
        .bind(&code)
        .fetch_optional(&mut *tx)
        .await?;
        let balance = balance.unwrap_or(0);

        if balance <= 0 {
            tx.rollback().await?;
            return Err(CommerceError::new(
                ErrorCode::InsufficientCredits,
                "No credits available for this benefit",
            )
            .with_detail("benefit_code", code)
            .with_detail("balance", balance.to_string()));
        }

        let ledgered = sqlx::query(
            r#"
            INSERT INTO benefit_wallet_ledgers (
                org_id, benefit_code, delta, reason, idempotency_key,
                order_no, attempt_id, meta, created_at
            ) VALUES ($1, $2, -1, 'consume', $3, $4, $5, NULL, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(request.org_id)
        .bind(&code)
        .bind(&key)
        .bind(&request.order_no)
        .bind(&request.attempt_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !ledgered {
            tx.rollback().await?;
            let balance = self.wallet_balance(request.org_id, &code).await?;
            return Ok(WalletView {
                balance,
                idempotent: true,
            });
        }

        sqlx::query(
            "UPDATE benefit_wallets SET balance = balance - 1, updated_at = $3 \
             WHERE org_id = $1 AND benefit_code = $2",
        )
        .bind(request.org_id)
        .bind(&code)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
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
        let balance: Option<i64> = sqlx::query_scalar(
            "SELECT balance FROM benefit_wallets WHERE org_id = $1 AND benefit_code = $2",
        )
        .bind(org_id)
        .bind(normalize_code(benefit_code))
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn ledger_sum(&self, org_id: i64, benefit_code: &str) -> Result<i64, CommerceError> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(delta)::BIGINT FROM benefit_wallet_ledgers \
             WHERE org_id = $1 AND benefit_code = $2",
        )
        .bind(org_id)
        .bind(normalize_code(benefit_code))
        .fetch_one(&self.pool)
        .await?;
        Ok(sum.unwrap_or(0))
    }

    async fn find_sku(&self, sku: &str) -> Result<Option<Sku>, CommerceError> {
        let row = sqlx::query(&format!(
            "SELECT {SKU_COLUMNS} FROM skus WHERE UPPER(TRIM(sku)) = $1"
        ))
        .bind(normalize_code(sku))
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_sku).transpose()
    }

    async fn find_sku_by_anchor(
        &self,
        anchor_sku: &str,
    ) -> Result<Option<Sku>, CommerceError> {
        let rows = sqlx::query(&format!(
            "SELECT {SKU_COLUMNS} FROM skus \
             WHERE UPPER(TRIM(meta->>'anchor_sku')) = $1 ORDER BY sku"
        ))
        .bind(normalize_code(anchor_sku))
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let sku = row_to_sku(row)?;
            if !sku.is_anchor() {
                return Ok(Some(sku));
            }
        }
        Ok(None)
    }
}

fn row_to_event(row: PgRow) -> Result<PaymentEvent, CommerceError> {
    let status: String = row.try_get("status")?;
    Ok(PaymentEvent {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        provider_event_id: row.try_get("provider_event_id")?,
        order_id: row.try_get("order_id")?,
        order_no: row.try_get("order_no")?,
        event_type: row.try_get("event_type")?,
        status: PaymentEventStatus::parse(&status)?,
        attempts: row.try_get("attempts")?,
        signature_ok: row.try_get("signature_ok")?,
        requested_sku: row.try_get("requested_sku")?,
        effective_sku: row.try_get("effective_sku")?,
        entitlement_id: row.try_get("entitlement_id")?,
        last_error_code: row.try_get("last_error_code")?,
        last_error_message: row.try_get("last_error_message")?,
        payload_sha256: row.try_get("payload_sha256")?,
        payload_size_bytes: row.try_get("payload_size_bytes")?,
        payload_s3_key: row.try_get("payload_s3_key")?,
        payload_excerpt: row.try_get("payload_excerpt")?,
        received_at: row.try_get("received_at")?,
        handled_at: row.try_get("handled_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order, CommerceError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        order_no: row.try_get("order_no")?,
        org_id: row.try_get("org_id")?,
        user_id: row.try_get("user_id")?,
        anon_id: row.try_get("anon_id")?,
        provider: row.try_get("provider")?,
        status: OrderStatus::parse(&status)?,
        sku: row.try_get("sku")?,
        requested_sku: row.try_get("requested_sku")?,
        effective_sku: row.try_get("effective_sku")?,
        entitlement_id: row.try_get("entitlement_id")?,
        quantity: row.try_get("quantity")?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        target_attempt_id: row.try_get("target_attempt_id")?,
        external_trade_no: row.try_get("external_trade_no")?,
        idempotency_key: row.try_get("idempotency_key")?,
        paid_at: row.try_get("paid_at")?,
        fulfilled_at: row.try_get("fulfilled_at")?,
        refunded_at: row.try_get("refunded_at")?,
        refund_amount_cents: row.try_get("refund_amount_cents")?,
        refund_reason: row.try_get("refund_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_sku(row: PgRow) -> Result<Sku, CommerceError> {
    Ok(Sku {
        sku: row.try_get("sku")?,
        kind: row.try_get("kind")?,
        benefit_code: row.try_get("benefit_code")?,
        unit_qty: row.try_get("unit_qty")?,
        scope: row.try_get("scope")?,
        price_cents: row.try_get("price_cents")?,
        currency: row.try_get("currency")?,
        is_active: row.try_get("is_active")?,
        meta: row.try_get("meta")?,
    })
}

fn row_to_grant(row: PgRow) -> Result<BenefitGrant, CommerceError> {
    let scope: String = row.try_get("scope")?;
    let status: String = row.try_get("status")?;
    Ok(BenefitGrant {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        user_id: row.try_get("user_id")?,
        benefit_ref: row.try_get("benefit_ref")?,
        benefit_code: row.try_get("benefit_code")?,
        scope: GrantScope::parse_or_attempt(&scope),
        attempt_id: row.try_get("attempt_id")?,
        order_no: row.try_get("order_no")?,
        status: parse_grant_status(&status)?,
        expires_at: row.try_get("expires_at")?,
        source_order_id: row.try_get("source_order_id")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_grant_status(raw: &str) -> Result<GrantStatus, CommerceError> {
    match raw.trim().to_lowercase().as_str() {
        "active" => Ok(GrantStatus::Active),
        "revoked" => Ok(GrantStatus::Revoked),
        other => Err(CommerceError::database(format!(
            "Invalid grant status value: {}",
            other
        ))),
    }
}
