//! Identity validation against an external user-info endpoint
//!
//! The validator issues `GET <user-info>` with the caller's bearer token and
//! classifies the answer. Response bodies of failed validations are never
//! surfaced or logged; only their status and length are.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{AuthMethod, FactoryConfig, ValidatorConfig};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::tls::TlsProfile;

/// Verifies that an identity is accepted by the identity provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityValidator: Send + Sync {
    /// Validate `identity` before `deadline`
    ///
    /// Anonymous identities always succeed.
    async fn validate(&self, identity: &Identity, deadline: Deadline) -> Result<()>;
}

/// Validator that accepts everything (auth disabled)
#[derive(Clone, Debug, Default)]
pub struct NoopValidator;

#[async_trait]
impl IdentityValidator for NoopValidator {
    async fn validate(&self, _identity: &Identity, _deadline: Deadline) -> Result<()> {
        Ok(())
    }
}

/// Validator for the configured auth mode
///
/// With auth disabled no identity provider is ever contacted.
pub fn build_validator(
    config: &FactoryConfig,
    tls: &TlsProfile,
) -> Result<Arc<dyn IdentityValidator>> {
    match config.auth.method {
        AuthMethod::Disabled => Ok(Arc::new(NoopValidator)),
        AuthMethod::UserToken => Ok(Arc::new(UserInfoValidator::new(&config.validator, tls)?)),
    }
}

/// Validator backed by a user-info endpoint
#[derive(Clone, Debug)]
pub struct UserInfoValidator {
    endpoint: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl UserInfoValidator {
    /// Build a validator with the given TLS profile
    pub fn new(config: &ValidatorConfig, tls: &TlsProfile) -> Result<Self> {
        let (endpoint, fallback) = config.resolve_endpoint();
        if fallback {
            warn!(
                endpoint = %endpoint,
                "No user-info endpoint or cluster API URL configured, using in-cluster default"
            );
        }

        let http = tls
            .apply_to_reqwest(reqwest::Client::builder())?
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        info!(endpoint = %endpoint, "Identity validator configured");

        Ok(Self {
            endpoint,
            http,
            timeout: config.timeout,
        })
    }

    /// Endpoint this validator calls
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, token: &str) -> Result<()> {
        let response = self.http.get(&self.endpoint).bearer_auth(token).send().await?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Identity validated");
            return Ok(());
        }

        // Drain the body for its length only; the content never leaves this function
        let body_len = response.bytes().await.map(|b| b.len()).unwrap_or(0);

        if status.is_server_error() {
            warn!(
                status = status.as_u16(),
                body_len,
                endpoint = %self.endpoint,
                "User-info endpoint failed"
            );
            return Err(Error::UpstreamUnreachable(format!(
                "user-info endpoint returned {}",
                status.as_u16()
            )));
        }

        info!(
            status = status.as_u16(),
            body_len,
            "User-info endpoint rejected token"
        );
        Err(Error::Unauthorized(format!(
            "user-info endpoint returned {}",
            status.as_u16()
        )))
    }
}

#[async_trait]
impl IdentityValidator for UserInfoValidator {
    async fn validate(&self, identity: &Identity, deadline: Deadline) -> Result<()> {
        let Some(token) = identity.token() else {
            return Ok(());
        };

        deadline
            .capped(self.timeout)
            .run("identity validation", self.call(token.expose()))
            .await
    }
}
