//! Catalog SKUs and their fulfillment effect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::grant::GrantScope;
use crate::domain::foundation::{CommerceError, ErrorCode};

/// A purchasable catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sku {
    pub sku: String,
    pub kind: String,
    pub benefit_code: String,
    pub unit_qty: i32,
    pub scope: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub is_active: bool,
    pub meta: Value,
}

/// What fulfilling a SKU does, matched exhaustively in the orchestrator
/// so adding a kind is a compiler-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkuEffect {
    /// Adds `unit_qty` credits per ordered unit to the org wallet.
    CreditPack { unit_qty: i32 },
    /// Grants report access at the given scope.
    ReportUnlock { scope: GrantScope },
}

impl Sku {
    /// Parses the row's `kind` column into its fulfillment effect.
    pub fn effect(&self) -> Result<SkuEffect, CommerceError> {
        match self.kind.trim().to_lowercase().as_str() {
            "credit_pack" => Ok(SkuEffect::CreditPack {
                unit_qty: self.unit_qty,
            }),
            "report_unlock" => Ok(SkuEffect::ReportUnlock {
                scope: self.grant_scope(),
            }),
            other => Err(CommerceError::new(
                ErrorCode::SkuKindInvalid,
                format!("unsupported sku kind: {}", other),
            )),
        }
    }

    /// The grant scope for this SKU: the row override, or attempt scope.
    pub fn grant_scope(&self) -> GrantScope {
        self.scope
            .as_deref()
            .map(GrantScope::parse_or_attempt)
            .unwrap_or(GrantScope::Attempt)
    }

    /// Whether this row is an alias anchor rather than a sellable row.
    pub fn is_anchor(&self) -> bool {
        meta_flag(&self.meta, "anchor") || meta_flag(&self.meta, "is_anchor")
    }

    /// The effective SKU named by an anchor row's meta, if any.
    pub fn meta_effective_sku(&self) -> Option<String> {
        meta_code(&self.meta, "effective_sku")
    }

    /// The anchor this row points back at, if any.
    pub fn meta_anchor_sku(&self) -> Option<String> {
        meta_code(&self.meta, "anchor_sku")
    }

    /// An entitlement identifier carried in the meta, if any.
    pub fn entitlement_id(&self) -> Option<String> {
        self.meta
            .get("entitlement_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    /// Grant lifetime in days carried in the meta, when positive.
    pub fn duration_days(&self) -> Option<i64> {
        self.meta
            .get("duration_days")
            .and_then(Value::as_i64)
            .filter(|d| *d > 0)
    }
}

/// Result of resolving a requested product code through the alias chain.
#[derive(Debug, Clone, Default)]
pub struct SkuResolution {
    pub requested_sku: Option<String>,
    pub effective_sku: Option<String>,
    pub anchor_sku: Option<String>,
    pub entitlement_id: Option<String>,
    pub sku_row: Option<Sku>,
}

fn meta_flag(meta: &Value, key: &str) -> bool {
    match meta.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::String(s)) => !s.trim().is_empty() && s.trim() != "0" && s.trim() != "false",
        _ => false,
    }
}

fn meta_code(meta: &Value, key: &str) -> Option<String> {
    meta.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
}
