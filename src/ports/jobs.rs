//! Report snapshot job dispatch port.

use async_trait::async_trait;

use crate::domain::foundation::CommerceError;

/// A request to (re)build the report snapshot for an attempt, queued
/// after a purchase unlocks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotJob {
    pub org_id: i64,
    pub attempt_id: String,
    /// What caused the rebuild, e.g. `payment`.
    pub trigger: String,
    pub order_no: Option<String>,
}

/// Hands snapshot jobs to the queue. Called only after the financial
/// transaction committed; a dispatch failure flags the event for
/// reconciliation instead of undoing anything.
#[async_trait]
pub trait SnapshotJobDispatcher: Send + Sync {
    async fn dispatch(&self, job: SnapshotJob) -> Result<(), CommerceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn SnapshotJobDispatcher) {}
}
