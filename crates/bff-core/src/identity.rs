//! Caller identity and the redacting token carrier
//!
//! Any field that stores a token is a [`RedactedToken`]. Its `Debug` and
//! `Display` output is the fixed sentinel `[REDACTED]`, so formatting an
//! identity into a log line can never leak the secret. The raw value is only
//! reachable through [`RedactedToken::expose`].

use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Sentinel printed in place of any token
pub const REDACTED: &str = "[REDACTED]";

/// Registry/cache key used for identities without a token
pub const ANONYMOUS_FINGERPRINT: &str = "anonymous";

/// Opaque secret whose string forms are always `[REDACTED]`
///
/// The backing buffer is zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct RedactedToken(Zeroizing<String>);

impl RedactedToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// The raw token, for the few call sites that must forward it
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the token, safe to use as a map key or log field
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for RedactedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for RedactedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// The caller on whose behalf upstream calls are made
///
/// Lives for one request; never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    token: Option<RedactedToken>,
    tool_token: Option<RedactedToken>,
}

impl Identity {
    /// Identity carrying a primary bearer token
    pub fn with_token(token: RedactedToken) -> Self {
        Self {
            token: Some(token),
            tool_token: None,
        }
    }

    /// Identity with no credentials (auth disabled)
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Attach a secondary token for a downstream tool server
    pub fn with_tool_token(mut self, tool_token: Option<RedactedToken>) -> Self {
        self.tool_token = tool_token;
        self
    }

    /// Whether this identity carries no primary token
    pub fn is_anonymous(&self) -> bool {
        self.token.is_none()
    }

    /// Primary bearer token, if any
    pub fn token(&self) -> Option<&RedactedToken> {
        self.token.as_ref()
    }

    /// Secondary tool-server token, if any
    pub fn tool_token(&self) -> Option<&RedactedToken> {
        self.tool_token.as_ref()
    }

    /// Key identifying this caller in the client registry and capability cache
    pub fn fingerprint(&self) -> String {
        match &self.token {
            Some(token) => token.fingerprint(),
            None => ANONYMOUS_FINGERPRINT.to_string(),
        }
    }
}
