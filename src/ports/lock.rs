//! Named distributed lock with bounded blocking acquisition.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::foundation::CommerceError;

/// Proof of lock ownership, released back through the same lock.
#[derive(Debug, Clone)]
pub struct LockLease {
    pub key: String,
    pub token: String,
}

/// Mutual exclusion for one webhook event across processes.
///
/// Acquisition blocks up to `block` then fails with `WEBHOOK_BUSY`; the
/// lease expires after `ttl` on its own if the holder dies. Release is
/// token-checked so an expired holder cannot free a successor's lease.
#[async_trait]
pub trait EventLock: Send + Sync {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        block: Duration,
    ) -> Result<LockLease, CommerceError>;

    /// Releases the lease. A lease that already expired is a no-op.
    async fn release(&self, lease: LockLease) -> Result<(), CommerceError>;
}
