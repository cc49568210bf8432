//! In-process counter store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::{blocked_key, CounterStore, StoreResult};

/// A counter slot and its optional expiry deadline.
#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// A counter store held in a sharded concurrent map.
///
/// Each read-modify-write runs under the shard lock for its key, which gives
/// the same atomic increment guarantee a networked store provides. Expired
/// slots are treated as absent on access and swept by [`purge_expired`].
///
/// [`purge_expired`]: MemoryStore::purge_expired
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every slot whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        trace!(removed, remaining = self.slots.len(), "Purged expired counters");
        removed
    }

    /// Time left before `key` expires, if it is live and has an expiry.
    pub fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slot = self.slots.get(key)?;
        if slot.is_expired(now) {
            return None;
        }
        slot.expires_at.map(|deadline| deadline - now)
    }

    /// Number of slots currently held, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn read(&self, key: &str) -> u64 {
        let now = Instant::now();
        match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => slot.count,
            _ => 0,
        }
    }

    /// Increment `key`, resetting it first if expired. `expiry` decides the new
    /// deadline from the post-increment slot.
    fn bump(&self, key: &str, expiry: impl FnOnce(&Slot) -> Option<Instant>) -> u64 {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert(Slot {
            count: 0,
            expires_at: None,
        });

        if slot.is_expired(now) {
            *slot = Slot {
                count: 0,
                expires_at: None,
            };
        }

        slot.count += 1;
        slot.expires_at = expiry(&*slot);
        slot.count
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        Ok(self.read(key))
    }

    async fn is_blocked(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read(&blocked_key(key)) >= 1)
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let count = self.bump(key, |slot| {
            if slot.count == 1 {
                Some(Instant::now() + window)
            } else {
                slot.expires_at
            }
        });
        Ok(count)
    }

    async fn block(&self, key: &str, lockout: Duration) -> StoreResult<()> {
        self.bump(&blocked_key(key), |_| Some(Instant::now() + lockout));
        Ok(())
    }
}
