//! Webhook orchestration: exactly-once processing of payment provider
//! notifications.

mod orchestrator;

pub use orchestrator::{WebhookDelivery, WebhookOrchestrator};
