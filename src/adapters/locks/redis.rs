//! Redis-backed event lock for multi-server deployments.
//!
//! `SET key token NX PX ttl` to acquire, polled with a short backoff
//! until the block window runs out; release runs a token-compare-and-delete script
//! so an expired holder cannot free a successor's lease.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::aio::MultiplexedConnection;

use crate::domain::foundation::{CommerceError, ErrorCode};
use crate::ports::{EventLock, LockLease};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisEventLock {
    conn: MultiplexedConnection,
}

impl RedisEventLock {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CommerceError> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(lock_unavailable)?;
        Ok(acquired.is_some())
    }
}

#[async_trait]
impl EventLock for RedisEventLock {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        block: Duration,
    ) -> Result<LockLease, CommerceError> {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(22)
            .map(char::from)
            .collect();

        let deadline = Instant::now() + block;
        loop {
            if self.try_acquire(key, &token, ttl).await? {
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
        let mut conn = self.conn.clone();
        let _released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(lock_unavailable)?;
        Ok(())
    }
}

fn lock_unavailable(err: redis::RedisError) -> CommerceError {
    CommerceError::new(ErrorCode::WebhookBusy, "Event lock backend unavailable")
        .with_detail("redis_error", err.to_string())
}
