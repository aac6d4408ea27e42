//! Opaque session tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Capability identifying one user session.
///
/// Always issued by the registry (random UUID v4), never chosen by the
/// client. Presenting an unknown token is not an error: the registry
/// silently provisions a fresh session and hands back a new token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Issues a fresh, unguessable token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a client-presented token. No validation is performed; an
    /// unrecognized value simply misses the registry lookup.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the empty token, which always means "new session".
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shortened form for logs, so full capabilities never hit log files.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_short_form() {
        let token = SessionToken::new("0123456789abcdef");
        assert_eq!(token.short(), "01234567");

        let tiny = SessionToken::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn test_empty_token() {
        assert!(SessionToken::new("").is_empty());
        assert!(!SessionToken::generate().is_empty());
    }
}
