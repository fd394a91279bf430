//! In-process event lock for tests and single-server runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::{EventLock, LockLease};

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

struct Holder {
    token: String,
    expires_at: Instant,
}

/// Lock table shared by cloning.
#[derive(Clone, Default)]
pub struct InMemoryEventLock {
    held: Arc<Mutex<HashMap<String, Holder>>>,
}

impl InMemoryEventLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> bool {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        match held.get(key) {
            Some(holder) if holder.expires_at > now => false,
            _ => {
                held.insert(
                    key.to_string(),
                    Holder {
                        token: token.to_string(),
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }
}

#[async_trait]
impl EventLock for InMemoryEventLock {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        block: Duration,
    ) -> Result<LockLease, CommerceError> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + block;
        loop {
            if self.try_acquire(key, &token, ttl).await {
                return Ok(LockLease {
                    key: key.to_string(),
                    token,
                });
            }
            if Instant::now() >= deadline {
                return Err(CommerceError::new(
                    ErrorCode::WebhookBusy,
                    "Event is being processed by another worker",
                )
                .with_detail("lock_key", key));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn release(&self, lease: LockLease) -> Result<(), CommerceError> {
        let mut held = self.held.lock().await;
        if held
            .get(&lease.key)
            .map(|holder| holder.token == lease.token)
            .unwrap_or(false)
        {
            held.remove(&lease.key);
        }
        Ok(())
    }
}
