//! Telemetry sink port.

use async_trait::async_trait;
use serde_json::Value;

/// One analytics event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub name: &'static str,
    pub org_id: i64,
    pub subject_ref: Option<String>,
    pub props: Value,
}

impl TelemetryEvent {
    pub fn new(name: &'static str, org_id: i64) -> Self {
        TelemetryEvent {
            name,
            org_id,
            subject_ref: None,
            props: Value::Null,
        }
    }

    pub fn subject(mut self, subject_ref: impl Into<String>) -> Self {
        self.subject_ref = Some(subject_ref.into());
        self
    }

    pub fn props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }
}

/// Fire-and-forget analytics recording.
///
/// Infallible by contract: a sink that can fail must swallow and log its
/// own errors, because telemetry never changes a webhook outcome.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: TelemetryEvent);
}
