//! Snapshot job dispatchers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::{SnapshotJob, SnapshotJobDispatcher};

/// Production dispatcher: logs the job for the queue worker to pick up.
///
/// The actual queue transport lives with the consumer of this crate;
/// this sink is the default wiring for single-process deployments where
/// the worker tails the log stream.
#[derive(Clone, Default)]
pub struct TracingSnapshotDispatcher;

#[async_trait]
impl SnapshotJobDispatcher for TracingSnapshotDispatcher {
    async fn dispatch(&self, job: SnapshotJob) -> Result<(), CommerceError> {
        info!(
            org_id = job.org_id,
            attempt_id = %job.attempt_id,
            trigger = %job.trigger,
            order_no = job.order_no.as_deref().unwrap_or("-"),
            "snapshot job dispatched"
        );
        Ok(())
    }
}

/// Test dispatcher: records jobs and optionally fails on demand.
#[derive(Clone, Default)]
pub struct RecordingSnapshotDispatcher {
    jobs: Arc<Mutex<Vec<SnapshotJob>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingSnapshotDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<SnapshotJob> {
        self.jobs.lock().await.clone()
    }

    /// Makes every subsequent dispatch fail.
    pub async fn fail_dispatches(&self) {
        *self.fail.lock().await = true;
    }
}

#[async_trait]
impl SnapshotJobDispatcher for RecordingSnapshotDispatcher {
    async fn dispatch(&self, job: SnapshotJob) -> Result<(), CommerceError> {
        if *self.fail.lock().await {
            return Err(CommerceError::new(
                ErrorCode::SeedSnapshotFailed,
                "snapshot queue unavailable",
            ));
        }
        self.jobs.lock().await.push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_dispatcher_fails_on_demand() {
        let dispatcher = RecordingSnapshotDispatcher::new();
        let job = SnapshotJob {
            org_id: 1,
            attempt_id: "att_1".to_string(),
            trigger: "payment".to_string(),
            order_no: Some("ord_1".to_string()),
        };
        dispatcher.dispatch(job.clone()).await.unwrap();
        assert_eq!(dispatcher.jobs().await.len(), 1);

        dispatcher.fail_dispatches().await;
        let err = dispatcher.dispatch(job).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SeedSnapshotFailed);
    }
}
