//! Payment gateway adapters: per-provider payload normalizers.

mod billing;
mod stripe;
mod stub;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::PaymentConfig;
use crate::ports::PaymentGateway;

pub use billing::BillingGateway;
pub use stripe::StripeGateway;
pub use stub::StubGateway;

/// The set of registered gateways, built once at startup and shared.
///
/// The stub gateway is only registered when configuration allows it, so
/// a `stub` webhook in production resolves to no provider at all.
#[derive(Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<&'static str, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    /// Builds the registry from configuration.
    pub fn from_config(payment: &PaymentConfig) -> Self {
        let mut registry = GatewayRegistry {
            gateways: HashMap::new(),
        };
        registry.register(Arc::new(StripeGateway));
        registry.register(Arc::new(BillingGateway));
        if payment.allow_stub {
            registry.register(Arc::new(StubGateway));
        }
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn get(&self, provider: &str) -> Option<&Arc<dyn PaymentGateway>> {
        self.gateways.get(provider)
    }

    pub fn providers(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.gateways.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Reads an integer amount that providers send either as a JSON number
/// or as a numeric string.
pub(crate) fn amount_from(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// First non-empty string among the given keys on an object.
pub(crate) fn first_string<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        obj.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

/// First present integer amount among the given keys on an object.
pub(crate) fn first_amount(obj: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| amount_from(obj.get(*key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payment_config(allow_stub: bool) -> PaymentConfig {
        PaymentConfig {
            allow_stub,
            ..PaymentConfig::default()
        }
    }

    #[test]
    fn registry_gates_the_stub_provider() {
        let closed = GatewayRegistry::from_config(&payment_config(false));
        assert!(closed.get("stripe").is_some());
        assert!(closed.get("billing").is_some());
        assert!(closed.get("stub").is_none());

        let open = GatewayRegistry::from_config(&payment_config(true));
        assert!(open.get("stub").is_some());
        assert_eq!(open.providers(), vec!["billing", "stripe", "stub"]);
    }

    #[test]
    fn amounts_accept_numbers_and_numeric_strings() {
        let obj = json!({"a": 1999, "b": "250", "c": "x"});
        assert_eq!(first_amount(&obj, &["a"]), Some(1999));
        assert_eq!(first_amount(&obj, &["c", "b"]), Some(250));
        assert_eq!(first_amount(&obj, &["missing", "c"]), None);
    }
}
