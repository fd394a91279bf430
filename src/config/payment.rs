//! Payment webhook configuration

use serde::Deserialize;
use std::collections::HashMap;

use super::error::ValidationError;

/// Payment webhook configuration.
///
/// Controls the per-event distributed lock, the gated stub provider, and
/// the per-provider allow-list of success event types.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// TTL of the per-event named lock, in seconds
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Bounded wait for the per-event named lock, in seconds
    #[serde(default = "default_lock_block")]
    pub lock_block_secs: u64,

    /// Whether the non-production stub gateway may be registered.
    /// Never enable this in production.
    #[serde(default)]
    pub allow_stub: bool,

    /// Per-provider overrides for the success event-type allow-list.
    /// Providers without an override use built-in defaults.
    #[serde(default)]
    pub success_event_types: HashMap<String, Vec<String>>,

    /// Maximum bytes of the payload summary persisted as an excerpt
    #[serde(default = "default_excerpt_max_bytes")]
    pub payload_excerpt_max_bytes: usize,
}

impl PaymentConfig {
    /// Allowed success event types for a provider, lowercased.
    ///
    /// Configured overrides win; otherwise each known provider gets its
    /// built-in list, and unknown providers accept only the generic
    /// `payment_succeeded`.
    pub fn allowed_success_event_types(&self, provider: &str) -> Vec<String> {
        let provider = provider.trim().to_lowercase();

        let configured = self
            .success_event_types
            .get(&provider)
            .map(|types| {
                types
                    .iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if !configured.is_empty() {
            return configured;
        }

        let defaults: &[&str] = match provider.as_str() {
            "stripe" => &[
                "payment_succeeded",
                "payment_intent.succeeded",
                "charge.succeeded",
                "checkout.session.completed",
                "invoice.payment_succeeded",
            ],
            "billing" => &[
                "payment_succeeded",
                "payment.success",
                "payment_completed",
                "paid",
            ],
            _ => &["payment_succeeded"],
        };
        defaults.iter().map(|t| t.to_string()).collect()
    }

    /// Whether `event_type` is an allowed success event for `provider`.
    pub fn is_allowed_success_event_type(&self, provider: &str, event_type: &str) -> bool {
        let event_type = event_type.trim().to_lowercase();
        if event_type.is_empty() {
            return false;
        }
        self.allowed_success_event_types(provider)
            .iter()
            .any(|t| t == &event_type)
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lock_ttl_secs == 0 {
            return Err(ValidationError::InvalidLockTtl);
        }
        if self.payload_excerpt_max_bytes == 0 {
            return Err(ValidationError::InvalidExcerptCap);
        }
        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl(),
            lock_block_secs: default_lock_block(),
            allow_stub: false,
            success_event_types: HashMap::new(),
            payload_excerpt_max_bytes: default_excerpt_max_bytes(),
        }
    }
}

fn default_lock_ttl() -> u64 {
    10
}

fn default_lock_block() -> u64 {
    5
}

fn default_excerpt_max_bytes() -> usize {
    8192
}
