//! Payment gateway port: provider payload normalization.

use serde_json::Value;

use crate::domain::commerce::NormalizedEvent;
use crate::domain::foundation::CommerceError;

/// Turns a raw provider webhook payload into the provider-neutral
/// normalized shape.
///
/// Normalization is pure extraction: no validation beyond shape, no
/// persistence, no network. Signature verification happens upstream at
/// the transport layer; adapters only report what the payload says.
pub trait PaymentGateway: Send + Sync {
    /// The provider name this adapter handles, lowercase.
    fn provider(&self) -> &'static str;

    /// Extracts the normalized event from a raw payload.
    ///
    /// # Errors
    ///
    /// `PAYLOAD_INVALID` when the payload is structurally unusable
    /// (not an object, no event id at all).
    fn normalize(&self, payload: &Value) -> Result<NormalizedEvent, CommerceError>;
}
