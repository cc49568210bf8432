//! Core rate limit decision engine.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::identity::Identity;
use super::rules::LimitPolicies;
use crate::store::{CounterStore, StoreResult};

/// Outcome of a rate limit decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the request upstream
    Allow,
    /// The identity is already locked out
    Blocked,
    /// This request crossed the limit and started a lockout
    LimitExceeded,
}

/// Decides, per request, whether an identity may proceed.
///
/// The limiter keeps no counters of its own. Every decision re-reads the
/// store, so many tasks can share one limiter without locking.
pub struct RateLimiter<S: CounterStore> {
    /// Where window counts and lockout flags live
    store: Arc<S>,
    /// Default and per-identity limits
    policies: Arc<LimitPolicies>,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a new rate limiter over `store` with the given policies.
    pub fn new(store: Arc<S>, policies: Arc<LimitPolicies>) -> Self {
        Self { store, policies }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decide whether a request from `identity` is admitted.
    ///
    /// A locked-out identity is rejected before anything else is read or
    /// written. Otherwise the window count is compared with the limit before
    /// incrementing it, so the request that brings the count to the limit is
    /// still admitted and the next one starts the lockout.
    ///
    /// Store failures are returned as errors, never folded into a verdict.
    #[instrument(skip(self, identity), fields(key = %identity.key, kind = %identity.kind))]
    pub async fn decide(&self, identity: &Identity) -> StoreResult<Verdict> {
        let key = identity.key.as_str();

        if self.store.is_blocked(key).await.map_err(|e| {
            warn!(error = %e, "Lockout check failed");
            e
        })? {
            debug!("Identity is locked out");
            return Ok(Verdict::Blocked);
        }

        let policy = self.policies.resolve(key, identity.kind);
        let count = self.store.get(key).await?;

        if count >= policy.max_requests {
            self.store.block(key, policy.lockout()).await?;
            info!(
                count,
                limit = policy.max_requests,
                lockout_secs = policy.lockout_secs,
                "Rate limit exceeded, lockout started"
            );
            return Ok(Verdict::LimitExceeded);
        }

        let count = self.store.increment(key, policy.window()).await?;
        debug!(
            count,
            limit = policy.max_requests,
            window_secs = policy.window_secs,
            "Request admitted"
        );

        Ok(Verdict::Allow)
    }
}
