//! Identity-scoped upstream clients and the factories that issue them
//!
//! A [`ScopedClient`] acts on behalf of exactly one identity for its whole
//! lifetime. A [`ClientFactory`] turns request headers into an identity,
//! validates it, and hands out the scoped client for that identity, creating
//! it on first use and reusing it afterwards.
//!
//! Three backends share the factory contract:
//!
//! | Backend | Token handling |
//! |---|---|
//! | [`RealClientFactory`] | token attached as bearer on every upstream call |
//! | [`EnvtestClientFactory`] | token mapped to a test user that is impersonated |
//! | [`StubClientFactory`] | token ignored, canned data returned |

mod cluster;
mod envtest;
mod registry;
mod stub;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use k8s_openapi::api::core::v1::Namespace;
use tracing::info;

use crate::capability::ResourceAttributes;
use crate::config::{BackendConfig, BackendKind, FactoryConfig};
use crate::crd::{DataSciencePipelinesApplication, LlamaStackDistribution, TokenRateLimitPolicy};
use crate::deadline::Deadline;
use crate::error::Result;
use crate::identity::{Identity, RedactedToken};
use crate::inference::InferenceClient;

pub use self::cluster::{
    load_base_config, scoped_bearer_config, KubeScopedClient, RealClientFactory,
};
pub use self::envtest::{scoped_impersonation_config, EnvtestClientFactory};
pub use self::registry::ClientRegistry;
pub use self::stub::{StubClientFactory, StubData, StubScopedClient};

/// Upstream handle bound to one identity
///
/// Handlers borrow a scoped client for the duration of one request and must
/// not retain it.
#[async_trait]
pub trait ScopedClient: Send + Sync {
    /// Namespaces visible to the identity
    async fn list_namespaces(&self, deadline: Deadline) -> Result<Vec<Namespace>>;

    /// Inference-service distributions in `namespace`
    async fn list_distributions(
        &self,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Vec<LlamaStackDistribution>>;

    /// One distribution by name
    async fn get_distribution(
        &self,
        namespace: &str,
        name: &str,
        deadline: Deadline,
    ) -> Result<LlamaStackDistribution>;

    /// Pipeline applications in `namespace`
    async fn list_pipeline_applications(
        &self,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Vec<DataSciencePipelinesApplication>>;

    /// Token rate-limit policies in `namespace`
    async fn list_token_policies(
        &self,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Vec<TokenRateLimitPolicy>>;

    /// Issue one self-access review, uncached and without retries
    async fn self_access_review(
        &self,
        attributes: &ResourceAttributes,
        deadline: Deadline,
    ) -> Result<bool>;

    /// Whether the identity may do anything to anything
    async fn is_cluster_admin(&self, deadline: Deadline) -> Result<bool> {
        self.self_access_review(&ResourceAttributes::cluster_admin(), deadline)
            .await
    }

    /// Raw bearer token for handlers that must forward the caller's credentials
    fn bearer_token(&self) -> Option<&RedactedToken>;

    /// Log-safe description of how this client authenticates
    fn identity_label(&self) -> String;
}

/// Issues scoped clients for the process
///
/// One implementation per backend; which one runs is decided at start-up.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Backend this factory implements
    fn backend(&self) -> BackendKind;

    /// Read the caller identity from request headers
    fn extract(&self, headers: &HeaderMap) -> Result<Identity>;

    /// Check the identity with the identity provider
    async fn validate(&self, identity: &Identity, deadline: Deadline) -> Result<()>;

    /// Scoped client for `identity`, created on first use
    async fn get(&self, identity: &Identity, deadline: Deadline) -> Result<Arc<dyn ScopedClient>>;

    /// Inference client for `identity` in `namespace`, located through `client`
    async fn inference(
        &self,
        identity: &Identity,
        client: Arc<dyn ScopedClient>,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Arc<InferenceClient>>;
}

/// Build the factory selected by `config.backend`
pub async fn build_factory(config: &FactoryConfig) -> Result<Arc<dyn ClientFactory>> {
    info!(
        backend = %config.backend.kind(),
        auth_method = %config.auth.method,
        "Building client factory"
    );

    let factory: Arc<dyn ClientFactory> = match &config.backend {
        BackendConfig::Real { source } => {
            Arc::new(RealClientFactory::from_source(source, config).await?)
        }
        BackendConfig::Envtest { source, users } => {
            let base = load_base_config(source).await?;
            Arc::new(EnvtestClientFactory::new(base, users.clone(), config)?)
        }
        BackendConfig::Stub => Arc::new(StubClientFactory::new(StubData::default(), config)),
    };

    Ok(factory)
}
