//! Entitlement service: granting, revoking, and checking report access.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::commerce::{
    normalize_code, trim_or_none, BenefitGrant, GrantScope, GrantStatus, GrantSubject, Order,
};
use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::CommerceStore;

/// Everything needed to grant report access for one attempt.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub org_id: i64,
    pub user_id: Option<String>,
    pub anon_id: Option<String>,
    pub benefit_code: String,
    pub attempt_id: String,
    pub order_no: Option<String>,
    pub scope: GrantScope,
    pub expires_at: Option<DateTime<Utc>>,
    pub source_order_id: Uuid,
}

/// Grants attempt access inside the caller's transaction. Returns the
/// grant and whether an equivalent grant already existed.
pub async fn grant_attempt_unlock<S: CommerceStore>(
    store: &S,
    tx: &mut S::Tx,
    request: GrantRequest,
) -> Result<(BenefitGrant, bool), CommerceError> {
    let benefit_code = normalize_code(&request.benefit_code);
    let attempt_id = request.attempt_id.trim().to_string();
    if benefit_code.is_empty() || attempt_id.is_empty() {
        return Err(CommerceError::new(
            ErrorCode::BenefitRequired,
            "benefit_code and attempt_id are required.",
        ));
    }

    let subject = GrantSubject::derive(
        request.user_id.as_deref(),
        request.anon_id.as_deref(),
        &attempt_id,
    );
    let now = Utc::now();
    let grant = BenefitGrant {
        id: Uuid::new_v4(),
        org_id: request.org_id,
        user_id: subject.subject_ref,
        benefit_ref: subject.benefit_ref,
        benefit_code,
        scope: request.scope,
        attempt_id,
        order_no: trim_or_none(request.order_no.as_deref()),
        status: GrantStatus::Active,
        expires_at: request.expires_at,
        source_order_id: request.source_order_id,
        revoked_at: None,
        created_at: now,
        updated_at: now,
    };

    let inserted = store.insert_grant_if_absent(tx, &grant).await?;
    Ok((grant, !inserted))
}

/// Revokes the grants a refunded order sourced.
///
/// The benefit code comes from the order's fulfillment SKU, resolved by
/// the caller before the transaction opened. A missing benefit code or
/// target attempt resolves to zero revocations rather than an error:
/// there is nothing to take back. Grants are matched by source order
/// first; when the order stamped no grants (legacy rows), matching
/// falls back to benefit code and attempt.
pub async fn revoke_for_order<S: CommerceStore>(
    store: &S,
    tx: &mut S::Tx,
    order: &Order,
    benefit_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<u64, CommerceError> {
    let benefit_code = benefit_code.map(normalize_code).unwrap_or_default();
    let attempt_id = order
        .target_attempt_id
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if benefit_code.is_empty() || attempt_id.is_empty() {
        return Ok(0);
    }

    let by_order = store
        .revoke_grants_by_order_no(tx, order.org_id, &order.order_no, now)
        .await?;
    if by_order > 0 {
        return Ok(by_order);
    }

    store
        .revoke_grants_by_attempt(tx, order.org_id, &benefit_code, attempt_id, now)
        .await
}

/// Whether the subject can see the full report for an attempt.
///
/// Anonymous callers match on the benefit reference; identified callers
/// match on the stored subject or, when they also carry an anon id, on
/// either. A caller with neither identity has no access.
pub async fn has_full_access<S: CommerceStore>(
    store: &S,
    org_id: i64,
    user_id: Option<&str>,
    anon_id: Option<&str>,
    attempt_id: &str,
    benefit_code: &str,
) -> Result<bool, CommerceError> {
    let benefit_code = normalize_code(benefit_code);
    let attempt_id = attempt_id.trim();
    if benefit_code.is_empty() || attempt_id.is_empty() {
        return Ok(false);
    }

    let mut subject_refs = Vec::new();
    if let Some(user) = trim_or_none(user_id) {
        subject_refs.push(user);
    }
    if let Some(anon) = trim_or_none(anon_id) {
        subject_refs.push(anon);
    }
    if subject_refs.is_empty() {
        return Ok(false);
    }

    store
        .has_active_grant(org_id, &benefit_code, attempt_id, &subject_refs, Utc::now())
        .await
}
