//! Telemetry sinks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::ports::{EventRecorder, TelemetryEvent};

/// Production sink: structured log lines, picked up by the analytics
/// pipeline downstream.
#[derive(Clone, Default)]
pub struct TracingEventRecorder;

#[async_trait]
impl EventRecorder for TracingEventRecorder {
    async fn record(&self, event: TelemetryEvent) {
        info!(
            event = event.name,
            org_id = event.org_id,
            subject = event.subject_ref.as_deref().unwrap_or("-"),
            props = %event.props,
            "telemetry event"
        );
    }
}

/// Test sink: captures events for assertions.
#[derive(Clone, Default)]
pub struct RecordingEventRecorder {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().await.clone()
    }

    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.name).collect()
    }
}

#[async_trait]
impl EventRecorder for RecordingEventRecorder {
    async fn record(&self, event: TelemetryEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_captures_in_order() {
        let sink = RecordingEventRecorder::new();
        sink.record(TelemetryEvent::new("payment_webhook_received", 1))
            .await;
        sink.record(TelemetryEvent::new("purchase_success", 1)).await;
        assert_eq!(
            sink.names().await,
            vec!["payment_webhook_received", "purchase_success"]
        );
    }
}
