//! Counter storage for rate limit state.
//!
//! The decision engine never keeps counters in-process. Every count and
//! lockout flag lives behind [`CounterStore`], which must provide atomic
//! increments so that concurrent requests for the same identity never lose
//! updates.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Suffix appended to an identity key to form its lockout counter key.
pub const BLOCKED_SUFFIX: &str = ":blocked";

/// Key under which the lockout counter for `key` is stored.
pub fn blocked_key(key: &str) -> String {
    format!("{key}{BLOCKED_SUFFIX}")
}

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key-value counter storage with expiry.
///
/// Implementations must keep the same atomicity contract whether they are
/// in-process or networked.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current window count for `key`. A missing key counts as zero.
    async fn get(&self, key: &str) -> StoreResult<u64>;

    /// Whether the lockout counter for `key` is at least one.
    async fn is_blocked(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increment the window counter for `key` and return the new
    /// value.
    ///
    /// The expiry is attached only when the new value is 1. Later increments
    /// leave it alone, so a window is fixed rather than sliding.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64>;

    /// Increment the lockout counter for `key` and reset its expiry to
    /// `lockout`.
    async fn block(&self, key: &str, lockout: Duration) -> StoreResult<()>;
}
