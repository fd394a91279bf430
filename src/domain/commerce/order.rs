//! Purchase orders and their lifecycle.
//!
//! An order only ever moves forward along the transition table in
//! [`OrderStatus::can_transition_to`]; amount and currency are immutable
//! after creation and a refund is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::foundation::{CommerceError, ErrorCode};

/// Lifecycle status of a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Pending,
    Paid,
    Fulfilled,
    Failed,
    Canceled,
    Refunded,
}

impl OrderStatus {
    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (Created, Pending | Paid | Failed | Canceled | Refunded) => true,
            (Pending, Paid | Failed | Canceled | Refunded) => true,
            (Paid, Fulfilled) => true,
            (Fulfilled, Refunded) => true,
            _ => false,
        }
    }

    /// Whether the order has reached a state where a success webhook has
    /// nothing financial left to do.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Fulfilled | OrderStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Failed => "failed",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CommerceError> {
        match s.trim().to_lowercase().as_str() {
            // Empty status on legacy rows means the order never left creation.
            "" | "created" => Ok(OrderStatus::Created),
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "fulfilled" => Ok(OrderStatus::Fulfilled),
            "failed" => Ok(OrderStatus::Failed),
            "canceled" => Ok(OrderStatus::Canceled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(CommerceError::new(
                ErrorCode::DatabaseError,
                format!("Invalid order status value: {}", other),
            )),
        }
    }
}

/// A purchase order, keyed by a globally unique order number and scoped
/// to an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub org_id: i64,
    pub user_id: Option<String>,
    pub anon_id: Option<String>,
    pub provider: String,
    pub status: OrderStatus,
    pub sku: String,
    pub requested_sku: Option<String>,
    pub effective_sku: Option<String>,
    pub entitlement_id: Option<String>,
    pub quantity: i32,
    pub amount_cents: i64,
    pub currency: String,
    pub target_attempt_id: Option<String>,
    pub external_trade_no: Option<String>,
    pub idempotency_key: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_amount_cents: Option<i64>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The SKU to fulfill against: effective SKU when resolved, else the
    /// ordered SKU.
    pub fn fulfillment_sku(&self) -> String {
        self.effective_sku
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.sku)
            .trim()
            .to_uppercase()
    }
}
