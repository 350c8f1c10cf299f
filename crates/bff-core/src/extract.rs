//! Identity extraction from request headers
//!
//! Reads the configured token header, checks and strips the configured
//! prefix, and produces an [`Identity`]. Nothing here performs I/O or logs
//! token material.

use axum::http::HeaderMap;

use crate::config::{AuthConfig, AuthMethod};
use crate::error::{Error, Result};
use crate::identity::{Identity, RedactedToken};

/// Header-to-identity extractor built from [`AuthConfig`]
#[derive(Clone, Debug)]
pub struct TokenExtractor {
    method: AuthMethod,
    header: String,
    prefix: String,
    tool_header: Option<String>,
}

impl TokenExtractor {
    /// Build an extractor from the token carrier rules
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            method: config.method,
            header: config.token_header.clone(),
            prefix: config.token_prefix.clone(),
            tool_header: config.tool_token_header.clone(),
        }
    }

    /// Authentication mode this extractor runs under
    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// Extract the caller identity
    ///
    /// With auth disabled the primary header is ignored and every request is
    /// anonymous; a malformed tool-token header is dropped instead of failing.
    pub fn extract(&self, headers: &HeaderMap) -> Result<Identity> {
        if self.method == AuthMethod::Disabled {
            let tool_token = self
                .tool_header
                .as_ref()
                .and_then(|header| parse_token(headers, header, &self.prefix).ok());
            return Ok(Identity::anonymous().with_tool_token(tool_token));
        }

        let token = parse_token(headers, &self.header, &self.prefix)?;

        let tool_token = match &self.tool_header {
            Some(header) => match parse_token(headers, header, &self.prefix) {
                Ok(token) => Some(token),
                Err(Error::MissingCredentials) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(Identity::with_token(token).with_tool_token(tool_token))
    }
}

/// Read and normalize one token header
fn parse_token(headers: &HeaderMap, header: &str, prefix: &str) -> Result<RedactedToken> {
    let value = headers
        .get(header)
        .ok_or(Error::MissingCredentials)?
        .to_str()
        .map_err(|_| Error::MalformedCredentials(format!("{} is not valid ASCII", header)))?;

    if value.trim().is_empty() {
        return Err(Error::MissingCredentials);
    }

    let remainder = if prefix.is_empty() {
        value
    } else {
        value
            .strip_prefix(prefix)
            .ok_or_else(|| Error::MalformedCredentials(format!("{} lacks expected prefix", header)))?
    };

    let token = remainder.trim();
    if token.is_empty() {
        return Err(Error::MalformedCredentials(format!(
            "{} has an empty token",
            header
        )));
    }

    Ok(RedactedToken::new(token))
}
