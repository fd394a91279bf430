//! Report-access entitlement grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope of a benefit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantScope {
    /// Unlocks a single assessment attempt.
    Attempt,
    /// Unlocks every attempt in the organization.
    Org,
}

impl GrantScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantScope::Attempt => "attempt",
            GrantScope::Org => "org",
        }
    }

    /// Parses a scope string, defaulting anything unrecognized (or
    /// blank) to attempt scope.
    pub fn parse_or_attempt(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "org" => GrantScope::Org,
            _ => GrantScope::Attempt,
        }
    }
}

/// Lifecycle status of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Revoked => "revoked",
        }
    }
}

/// Who a grant belongs to. Every grant gets a non-null subject, even for
/// anonymous purchases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantSubject {
    /// Stored subject reference: user id, else anon id, else synthetic.
    pub subject_ref: String,
    /// Secondary reference preferring the anon id, used for anonymous
    /// access checks.
    pub benefit_ref: String,
}

impl GrantSubject {
    /// Derives the subject for a grant: user id first, anon id second,
    /// and a synthetic `attempt:<id>` token as the final fallback.
    pub fn derive(user_id: Option<&str>, anon_id: Option<&str>, attempt_id: &str) -> GrantSubject {
        let user_id = user_id.map(str::trim).filter(|s| !s.is_empty());
        let anon_id = anon_id.map(str::trim).filter(|s| !s.is_empty());
        let synthetic = format!("attempt:{}", attempt_id.trim());

        GrantSubject {
            subject_ref: user_id
                .or(anon_id)
                .map(String::from)
                .unwrap_or_else(|| synthetic.clone()),
            benefit_ref: anon_id
                .or(user_id)
                .map(String::from)
                .unwrap_or(synthetic),
        }
    }
}

/// A per-organization, per-subject, per-benefit access grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenefitGrant {
    pub id: Uuid,
    pub org_id: i64,
    pub user_id: String,
    pub benefit_ref: String,
    pub benefit_code: String,
    pub scope: GrantScope,
    pub attempt_id: String,
    pub order_no: Option<String>,
    pub status: GrantStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub source_order_id: Uuid,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BenefitGrant {
    /// Whether this grant is usable right now.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn subject_prefers_user_id() {
        let subject = GrantSubject::derive(Some("u1"), Some("anon1"), "att_1");
        assert_eq!(subject.subject_ref, "u1");
        assert_eq!(subject.benefit_ref, "anon1");
    }

    #[test]
    fn subject_falls_back_to_anon_id() {
        let subject = GrantSubject::derive(None, Some("anon1"), "att_1");
        assert_eq!(subject.subject_ref, "anon1");
        assert_eq!(subject.benefit_ref, "anon1");
    }

    #[test]
    fn subject_synthesizes_attempt_token_for_anonymous_purchases() {
        let subject = GrantSubject::derive(None, None, "att_1");
        assert_eq!(subject.subject_ref, "attempt:att_1");
        assert_eq!(subject.benefit_ref, "attempt:att_1");
    }

    #[test]
    fn blank_ids_count_as_missing() {
        let subject = GrantSubject::derive(Some("  "), Some(""), "att_1");
        assert_eq!(subject.subject_ref, "attempt:att_1");
    }

    #[test]
    fn scope_parse_defaults_to_attempt() {
        assert_eq!(GrantScope::parse_or_attempt("org"), GrantScope::Org);
        assert_eq!(GrantScope::parse_or_attempt(" ORG "), GrantScope::Org);
        assert_eq!(GrantScope::parse_or_attempt(""), GrantScope::Attempt);
        assert_eq!(GrantScope::parse_or_attempt("team"), GrantScope::Attempt);
    }

    #[test]
    fn expiry_controls_activity() {
        let now = Utc::now();
        let grant = BenefitGrant {
            id: Uuid::new_v4(),
            org_id: 1,
            user_id: "u1".to_string(),
            benefit_ref: "u1".to_string(),
            benefit_code: "FULL_REPORT".to_string(),
            scope: GrantScope::Attempt,
            attempt_id: "att_1".to_string(),
            order_no: Some("ord_1".to_string()),
            status: GrantStatus::Active,
            expires_at: Some(now + Duration::days(1)),
            source_order_id: Uuid::new_v4(),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(grant.is_active(now));

        let expired = BenefitGrant {
            expires_at: Some(now - Duration::days(1)),
            ..grant.clone()
        };
        assert!(!expired.is_active(now));

        let revoked = BenefitGrant {
            status: GrantStatus::Revoked,
            ..grant
        };
        assert!(!revoked.is_active(now));
    }
}
