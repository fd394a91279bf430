//! SKU catalog: active-row lookup and alias-chain resolution.
//!
//! Pricing rows can be renamed without breaking stored references by
//! anchoring: an *anchor* row (`meta.anchor`) is a stable name that
//! points at the sellable row via `meta.effective_sku`, or is pointed
//! back at by a row carrying `meta.anchor_sku`.

use crate::domain::commerce::{normalize_code, Sku, SkuResolution};
use crate::domain::foundation::CommerceError;
use crate::ports::CommerceStore;

/// Looks up an active catalog row by code.
pub async fn active_sku<S: CommerceStore>(
    store: &S,
    code: &str,
) -> Result<Option<Sku>, CommerceError> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Ok(None);
    }
    Ok(store.find_sku(&code).await?.filter(|s| s.is_active))
}

/// Resolves a requested product code through the alias chain.
///
/// The result always carries the normalized requested code; the
/// effective row is the active sellable row the chain lands on, or
/// `None` when nothing sellable matches.
pub async fn resolve_sku_meta<S: CommerceStore>(
    store: &S,
    code: &str,
) -> Result<SkuResolution, CommerceError> {
    let requested = normalize_code(code);
    if requested.is_empty() {
        return Ok(SkuResolution::default());
    }

    let Some(requested_row) = store.find_sku(&requested).await? else {
        return Ok(SkuResolution {
            requested_sku: Some(requested),
            ..SkuResolution::default()
        });
    };

    let mut anchor_sku = None;
    let mut effective = requested.clone();

    if requested_row.is_anchor() {
        anchor_sku = Some(requested.clone());
        effective = match requested_row.meta_effective_sku() {
            Some(named) => named,
            None => store
                .find_sku_by_anchor(&requested)
                .await?
                .filter(|row| row.is_active)
                .map(|row| row.sku)
                .unwrap_or_else(|| requested.clone()),
        };
    } else if let Some(anchor) = requested_row.meta_anchor_sku() {
        anchor_sku = Some(anchor);
    }

    // Anchor rows are names, never sellable rows themselves.
    let mut effective_row = active_sku(store, &effective)
        .await?
        .filter(|row| !row.is_anchor());
    if effective_row.is_none() && effective != requested {
        effective_row = active_sku(store, &requested)
            .await?
            .filter(|row| !row.is_anchor());
    }

    let entitlement_id = effective_row
        .as_ref()
        .unwrap_or(&requested_row)
        .entitlement_id();

    let effective_sku = effective_row
        .as_ref()
        .map(|row| row.sku.clone())
        .or(Some(effective));

    Ok(SkuResolution {
        requested_sku: Some(requested),
        effective_sku,
        anchor_sku,
        entitlement_id,
        sku_row: effective_row,
    })
}
