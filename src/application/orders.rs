//! Order creation (the checkout-side primitive).

use chrono::Utc;
use uuid::Uuid;

use super::catalog;
use crate::domain::commerce::{normalize_code, normalize_provider, trim_or_none, Order, OrderStatus};
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::CommerceStore;

const MAX_ORDER_QUANTITY: i32 = 1000;

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub org_id: i64,
    pub user_id: Option<String>,
    pub anon_id: Option<String>,
    pub sku: String,
    pub quantity: i32,
    pub target_attempt_id: Option<String>,
    pub provider: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    /// True when the idempotency key matched an existing order and no
    /// new row was created.
    pub idempotent: bool,
}

/// Creates an order for a catalog SKU.
///
/// Amount is unit price times quantity, priced in the SKU row's
/// currency. A caller idempotency key makes retried checkouts return
/// the first order instead of creating another.
pub async fn create_order<S: CommerceStore>(
    store: &S,
    allowed_providers: &[&str],
    request: CreateOrderRequest,
) -> Result<CreatedOrder, CommerceError> {
    let requested = normalize_code(&request.sku);
    if requested.is_empty() {
        return Err(CommerceError::new(ErrorCode::SkuRequired, "sku is required."));
    }

    if request.quantity < 1 || request.quantity > MAX_ORDER_QUANTITY {
        return Err(CommerceError::new(
            ErrorCode::QuantityInvalid,
            "quantity out of range.",
        )
        .with_detail("quantity", request.quantity.to_string()));
    }

    let resolved = catalog::resolve_sku_meta(store, &requested).await?;
    let Some(sku_row) = resolved.sku_row else {
        return Err(CommerceError::new(ErrorCode::SkuNotFound, "sku not found."));
    };

    let unit_price = sku_row.price_cents;
    if unit_price < 0 {
        return Err(CommerceError::new(ErrorCode::PriceInvalid, "price invalid."));
    }
    if unit_price > 0 && request.quantity as i64 > (i32::MAX as i64) / unit_price {
        return Err(CommerceError::new(
            ErrorCode::AmountTooLarge,
            "amount too large.",
        ));
    }

    let provider = normalize_provider(&request.provider);
    if provider.is_empty() || !allowed_providers.contains(&provider.as_str()) {
        return Err(CommerceError::new(
            ErrorCode::ProviderNotSupported,
            "provider not supported.",
        )
        .with_detail("provider", provider));
    }

    let idempotency_key = trim_or_none(request.idempotency_key.as_deref());
    if let Some(key) = idempotency_key.as_deref() {
        if let Some(existing) = store
            .find_order_by_idempotency(request.org_id, &provider, key)
            .await?
        {
            return Ok(CreatedOrder {
                order: existing,
                idempotent: true,
            });
        }
    }

    let effective_sku = resolved
        .effective_sku
        .clone()
        .unwrap_or_else(|| requested.clone());
    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        order_no: format!("ord_{}", Uuid::new_v4()),
        org_id: request.org_id,
        user_id: trim_or_none(request.user_id.as_deref()),
        anon_id: trim_or_none(request.anon_id.as_deref()),
        provider,
        status: OrderStatus::Created,
        sku: effective_sku.clone(),
        requested_sku: resolved.requested_sku,
        effective_sku: Some(effective_sku),
        entitlement_id: resolved.entitlement_id,
        quantity: request.quantity,
        amount_cents: unit_price * request.quantity as i64,
        currency: sku_row.currency.clone(),
        target_attempt_id: trim_or_none(request.target_attempt_id.as_deref()),
        external_trade_no: None,
        idempotency_key,
        paid_at: None,
        fulfilled_at: None,
        refunded_at: None,
        refund_amount_cents: None,
        refund_reason: None,
        created_at: now,
        updated_at: now,
    };

    store.insert_order(&order).await?;
    Ok(CreatedOrder {
        order,
        idempotent: false,
    })
}

/// Loads an order visible to the given subject: the order must belong
/// to the organization and be owned by the user or anon identity.
pub async fn get_order<S: CommerceStore>(
    store: &S,
    org_id: i64,
    user_id: Option<&str>,
    anon_id: Option<&str>,
    order_no: &str,
) -> Result<Option<Order>, CommerceError> {
    let Some(order) = store.find_order(order_no.trim()).await? else {
        return Ok(None);
    };
    if order.org_id != org_id {
        return Ok(None);
    }

    let user_id = trim_or_none(user_id);
    let anon_id = trim_or_none(anon_id);
    let owns = (user_id.is_some() && order.user_id == user_id)
        || (anon_id.is_some() && order.anon_id == anon_id);
    Ok(owns.then_some(order))
}
