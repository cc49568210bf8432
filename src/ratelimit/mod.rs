//! Rate limiting decisions: identities, policies and the limiter itself.

mod identity;
mod limiter;
mod rules;

pub use identity::{Identity, IdentityKind};
pub use limiter::{RateLimiter, Verdict};
pub use rules::{
    IpOverride, LimitPolicies, LimitPolicy, OverrideEntry, OverrideFields, RateLimitOverrides,
    TokenOverride,
};

pub(crate) use rules::lenient_section;
