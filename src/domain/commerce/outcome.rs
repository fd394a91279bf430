//! The tagged result returned to the (out-of-scope) HTTP layer.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{CommerceError, ErrorCode};

/// Outcome of the post-commit side-effect phase.
///
/// Kept separate from the financial result: a failure here never undoes
/// the committed mutation, it only flags the event for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PostCommitOutcome {
    Completed {
        snapshot_dispatched: bool,
    },
    Failed {
        code: String,
        message: String,
    },
}

impl PostCommitOutcome {
    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        PostCommitOutcome::Failed {
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, PostCommitOutcome::Completed { .. })
    }
}

/// Result of handling one inbound webhook delivery.
///
/// `status` is an HTTP-ish code for the caller to surface; duplicate
/// deliveries of a processed event are a success (`duplicate: true`),
/// never an error, so provider retry storms stay invisible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookOutcome {
    pub ok: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_event_id: Option<String>,
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_commit: Option<PostCommitOutcome>,
}

impl WebhookOutcome {
    pub fn success(order_no: impl Into<String>, provider_event_id: impl Into<String>) -> Self {
        WebhookOutcome {
            ok: true,
            status: 200,
            order_no: Some(order_no.into()),
            provider_event_id: Some(provider_event_id.into()),
            duplicate: false,
            refunded: false,
            dry_run: false,
            error_code: None,
            message: None,
            details: None,
            post_commit: None,
        }
    }

    pub fn duplicate(order_no: impl Into<String>, provider_event_id: impl Into<String>) -> Self {
        WebhookOutcome {
            duplicate: true,
            ..WebhookOutcome::success(order_no, provider_event_id)
        }
    }

    pub fn error(err: &CommerceError) -> Self {
        let details = if err.details.is_empty() {
            None
        } else {
            serde_json::to_value(&err.details).ok()
        };
        WebhookOutcome {
            ok: false,
            status: err.status(),
            order_no: None,
            provider_event_id: None,
            duplicate: false,
            refunded: false,
            dry_run: false,
            error_code: Some(err.code.as_str().to_string()),
            message: Some(err.message.clone()),
            details,
            post_commit: None,
        }
    }

    pub fn with_refs(
        mut self,
        order_no: Option<String>,
        provider_event_id: Option<String>,
    ) -> Self {
        self.order_no = order_no.filter(|s| !s.is_empty()).or(self.order_no);
        self.provider_event_id = provider_event_id
            .filter(|s| !s.is_empty())
            .or(self.provider_event_id);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_outcome_is_200() {
        let outcome = WebhookOutcome::success("ord_1", "evt_1");
        assert!(outcome.ok);
        assert_eq!(outcome.status, 200);
        assert!(!outcome.duplicate);
    }

    #[test]
    fn duplicate_outcome_stays_ok() {
        let outcome = WebhookOutcome::duplicate("ord_1", "evt_1");
        assert!(outcome.ok);
        assert!(outcome.duplicate);
        assert_eq!(outcome.status, 200);
    }

    #[test]
    fn error_outcome_carries_code_and_status() {
        let err = CommerceError::new(ErrorCode::AmountMismatch, "amount mismatch.");
        let outcome = WebhookOutcome::error(&err);
        assert!(!outcome.ok);
        assert_eq!(outcome.status, 400);
        assert_eq!(outcome.error_code.as_deref(), Some("AMOUNT_MISMATCH"));
    }

    #[test]
    fn error_details_serialize_when_present() {
        let err = CommerceError::new(ErrorCode::ProviderMismatch, "provider mismatch")
            .with_detail("order_provider", "stripe");
        let outcome = WebhookOutcome::error(&err);
        assert!(outcome.details.is_some());
    }

    #[test]
    fn with_refs_does_not_clobber_existing_values() {
        let outcome = WebhookOutcome::success("ord_1", "evt_1")
            .with_refs(None, Some(String::new()));
        assert_eq!(outcome.order_no.as_deref(), Some("ord_1"));
        assert_eq!(outcome.provider_event_id.as_deref(), Some("evt_1"));
    }

    #[test]
    fn post_commit_failure_knows_it_failed() {
        let failed = PostCommitOutcome::failed(ErrorCode::SeedSnapshotFailed, "dispatch down");
        assert!(!failed.is_ok());
        assert!(PostCommitOutcome::Completed {
            snapshot_dispatched: true
        }
        .is_ok());
    }
}
