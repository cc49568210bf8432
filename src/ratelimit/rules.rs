//! Limit policies and per-identity overrides.
//!
//! Every identity kind has a default policy. Individual addresses and tokens
//! can override any of its three fields; a field the override leaves out, or
//! gets wrong, falls back to the default on its own.
//!
//! Override documents are read leniently. A list that is not a list, an entry
//! that is not a map with a string key, or a field that is not a positive
//! integer is ignored instead of failing the whole configuration.

use std::time::Duration;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use tracing::trace;

use super::identity::IdentityKind;

/// The limit, window and lockout applied to one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Requests counted in a window before lockout kicks in
    pub max_requests: u64,
    /// Length of the fixed counting window, in seconds
    pub window_secs: u64,
    /// Length of the lockout, in seconds
    pub lockout_secs: u64,
}

impl LimitPolicy {
    pub fn new(max_requests: u64, window_secs: u64, lockout_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            lockout_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }
}

/// Optional per-identity replacements for the default policy fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OverrideFields {
    /// Replacement for `max_requests`
    #[serde(default, deserialize_with = "lenient_positive")]
    pub limit: Option<u64>,
    /// Replacement for `window_secs`
    #[serde(default, deserialize_with = "lenient_positive")]
    pub expiration: Option<u64>,
    /// Replacement for `lockout_secs`
    #[serde(default, deserialize_with = "lenient_positive")]
    pub block: Option<u64>,
}

impl OverrideFields {
    /// Apply these overrides on top of `defaults`, field by field.
    pub fn apply(&self, defaults: LimitPolicy) -> LimitPolicy {
        LimitPolicy {
            max_requests: self.limit.unwrap_or(defaults.max_requests),
            window_secs: self.expiration.unwrap_or(defaults.window_secs),
            lockout_secs: self.block.unwrap_or(defaults.lockout_secs),
        }
    }
}

/// An override entry matched against IP identities.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IpOverride {
    pub ip: String,
    #[serde(flatten)]
    pub fields: OverrideFields,
}

/// An override entry matched against token identities.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenOverride {
    pub token: String,
    #[serde(flatten)]
    pub fields: OverrideFields,
}

/// Common view over the per-kind override entries.
pub trait OverrideEntry {
    /// Literal key compared against the identity key.
    fn match_key(&self) -> &str;

    fn fields(&self) -> &OverrideFields;
}

impl OverrideEntry for IpOverride {
    fn match_key(&self) -> &str {
        &self.ip
    }

    fn fields(&self) -> &OverrideFields {
        &self.fields
    }
}

impl OverrideEntry for TokenOverride {
    fn match_key(&self) -> &str {
        &self.token
    }

    fn fields(&self) -> &OverrideFields {
        &self.fields
    }
}

/// The `rate_limit` section of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RateLimitOverrides {
    #[serde(default, deserialize_with = "lenient_entries")]
    pub ips: Vec<IpOverride>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub tokens: Vec<TokenOverride>,
}

impl RateLimitOverrides {
    /// Parse a `rate_limit` section from YAML. Never fails on malformed
    /// content, only on a document that is not YAML at all.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let section: Lenient<Self> = serde_yaml::from_str(yaml)?;
        Ok(section.into_option().unwrap_or_default())
    }

    /// First override entry whose key equals `key` exactly.
    pub fn find(&self, key: &str, kind: IdentityKind) -> Option<&OverrideFields> {
        match kind {
            IdentityKind::Ip => find_entry(&self.ips, key),
            IdentityKind::Token => find_entry(&self.tokens, key),
        }
    }
}

fn find_entry<'a, E: OverrideEntry>(entries: &'a [E], key: &str) -> Option<&'a OverrideFields> {
    entries
        .iter()
        .find(|entry| entry.match_key() == key)
        .map(OverrideEntry::fields)
}

/// Default policies per identity kind plus the override lists.
///
/// Built once at startup and shared read-only by every decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicies {
    pub ip_defaults: LimitPolicy,
    pub token_defaults: LimitPolicy,
    pub overrides: RateLimitOverrides,
}

impl LimitPolicies {
    pub fn new(ip_defaults: LimitPolicy, token_defaults: LimitPolicy) -> Self {
        Self {
            ip_defaults,
            token_defaults,
            overrides: RateLimitOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: RateLimitOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn defaults(&self, kind: IdentityKind) -> LimitPolicy {
        match kind {
            IdentityKind::Ip => self.ip_defaults,
            IdentityKind::Token => self.token_defaults,
        }
    }

    /// Resolve the policy for an identity key of the given kind.
    pub fn resolve(&self, key: &str, kind: IdentityKind) -> LimitPolicy {
        let defaults = self.defaults(kind);

        match self.overrides.find(key, kind) {
            Some(fields) => {
                let policy = fields.apply(defaults);
                trace!(key = %key, kind = %kind, ?policy, "Resolved override policy");
                policy
            }
            None => defaults,
        }
    }
}

/// A value that either deserialized as `T` or was something else entirely.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Valid(T),
    Malformed(IgnoredAny),
}

impl<T> Lenient<T> {
    fn into_option(self) -> Option<T> {
        match self {
            Lenient::Valid(value) => Some(value),
            Lenient::Malformed(_) => None,
        }
    }
}

/// Deserialize a positive integer, mapping anything else to `None`.
fn lenient_positive<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Lenient::<u64>::deserialize(deserializer)?;
    Ok(value.into_option().filter(|v| *v > 0))
}

/// Deserialize a list of entries, dropping entries that do not parse and
/// treating a non-list as empty.
fn lenient_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let list = Lenient::<Vec<Lenient<T>>>::deserialize(deserializer)?;
    Ok(list
        .into_option()
        .unwrap_or_default()
        .into_iter()
        .filter_map(Lenient::into_option)
        .collect())
}

/// Deserialize a whole `rate_limit` section, treating a non-map as empty.
pub(crate) fn lenient_section<'de, D>(deserializer: D) -> Result<RateLimitOverrides, D::Error>
where
    D: Deserializer<'de>,
{
    let section = Lenient::<RateLimitOverrides>::deserialize(deserializer)?;
    Ok(section.into_option().unwrap_or_default())
}
