//! Requester identity derivation.

use std::fmt;

/// What kind of value an identity key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// Source address from the forwarded-for header or the peer socket
    Ip,
    /// Access token presented by the client
    Token,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Ip => "ip",
            IdentityKind::Token => "token",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key a request is rate limited against, and its kind.
///
/// Recomputed for every request and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Literal key used for counters and override matching
    pub key: String,
    /// Whether the key is an address or a token
    pub kind: IdentityKind,
}

impl Identity {
    /// Identity for an access token.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            key: token.into(),
            kind: IdentityKind::Token,
        }
    }

    /// Identity for a source address.
    pub fn ip(addr: impl Into<String>) -> Self {
        Self {
            key: addr.into(),
            kind: IdentityKind::Ip,
        }
    }

    /// Derive the identity of a request.
    ///
    /// A non-empty token wins outright. Otherwise the forwarded-for value is
    /// used, or the peer address when that is empty, and only the part before
    /// the first comma is kept. Nothing is trimmed or validated.
    pub fn derive(token: Option<&str>, forwarded_for: Option<&str>, remote_addr: &str) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            return Self::token(token);
        }

        let source = forwarded_for
            .filter(|f| !f.is_empty())
            .unwrap_or(remote_addr);
        let first = source.split(',').next().unwrap_or_default();

        Self::ip(first)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_wins_over_addresses() {
        let identity = Identity::derive(
            Some("tokenPotato"),
            Some("10.0.0.1, 10.0.0.2"),
            "127.0.0.1:5000",
        );
        assert_eq!(identity, Identity::token("tokenPotato"));
    }

    #[test]
    fn test_empty_token_falls_through_to_ip() {
        let identity = Identity::derive(Some(""), Some("192.168.1.1"), "127.0.0.1:5000");
        assert_eq!(identity.kind, IdentityKind::Ip);
        assert_eq!(identity.key, "192.168.1.1");
    }

    #[test]
    fn test_forwarded_for_uses_first_entry() {
        let identity = Identity::derive(None, Some("203.0.113.7,10.0.0.1,10.0.0.2"), "127.0.0.1:5000");
        assert_eq!(identity, Identity::ip("203.0.113.7"));
    }

    #[test]
    fn test_forwarded_for_is_not_trimmed() {
        let identity = Identity::derive(None, Some(" 203.0.113.7 , 10.0.0.1"), "127.0.0.1:5000");
        assert_eq!(identity.key, " 203.0.113.7 ");
    }

    #[test]
    fn test_remote_addr_fallback() {
        let identity = Identity::derive(None, None, "127.0.0.1:5000");
        assert_eq!(identity, Identity::ip("127.0.0.1:5000"));

        let identity = Identity::derive(None, Some(""), "127.0.0.1:5000");
        assert_eq!(identity, Identity::ip("127.0.0.1:5000"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Identity::ip("10.0.0.1").to_string(), "ip:10.0.0.1");
        assert_eq!(Identity::token("abc").to_string(), "token:abc");
    }
}
