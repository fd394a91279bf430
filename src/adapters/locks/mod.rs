//! Event lock adapters.

mod in_memory;
mod redis;

pub use in_memory::InMemoryEventLock;
pub use redis::RedisEventLock;

/// The per-event lock key: one lock per provider delivery identity.
pub fn webhook_lock_key(provider: &str, provider_event_id: &str) -> String {
    format!("webhook_pay:{}:{}", provider, provider_event_id)
}
