//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, error};

use super::{blocked_key, CounterStore, StoreError, StoreResult};

/// Increments the window counter and attaches the expiry only when the
/// increment opened the window, in a single round trip.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// A counter store backed by a Redis (or protocol-compatible) server.
pub struct RedisStore {
    manager: ConnectionManager,
    increment: Script,
}

impl RedisStore {
    /// Connect to `addr`, which is either a `redis://` URL or a bare
    /// `host:port`.
    pub async fn connect(addr: &str) -> StoreResult<Self> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}")
        };

        let client = redis::Client::open(url.as_str()).map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to create Redis client");
            unavailable(e)
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to connect to Redis");
            unavailable(e)
        })?;

        debug!(addr = %addr, "Connected to Redis counter store");

        Ok(Self {
            manager,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Redis expiries are whole seconds; never hand it zero.
fn expiry_secs(duration: Duration) -> i64 {
    duration.as_secs().max(1) as i64
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection();
        let count: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis GET failed");
                unavailable(e)
            })?;
        Ok(count.unwrap_or(0))
    }

    async fn is_blocked(&self, key: &str) -> StoreResult<bool> {
        let count = self.get(&blocked_key(key)).await?;
        Ok(count >= 1)
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let mut conn = self.connection();
        let count: u64 = self
            .increment
            .key(key)
            .arg(expiry_secs(window))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis window increment failed");
                unavailable(e)
            })?;
        Ok(count)
    }

    async fn block(&self, key: &str, lockout: Duration) -> StoreResult<()> {
        let blocked = blocked_key(key);
        let mut conn = self.connection();
        redis::pipe()
            .atomic()
            .incr(&blocked, 1)
            .ignore()
            .expire(&blocked, expiry_secs(lockout))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| {
                error!(key = %blocked, error = %e, "Redis lockout activation failed");
                unavailable(e)
            })?;
        Ok(())
    }
}
