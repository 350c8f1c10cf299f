//! Stub backend: canned data and no cluster
//!
//! Used for local UI development and for tests that exercise the request
//! pipeline without an upstream. Tokens are still extracted (and kept on the
//! client so token forwarding can be tested) but never sent anywhere by the
//! Kubernetes side.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use tracing::debug;

use crate::capability::ResourceAttributes;
use crate::config::{BackendKind, FactoryConfig};
use crate::crd::{DataSciencePipelinesApplication, LlamaStackDistribution, TokenRateLimitPolicy};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::extract::TokenExtractor;
use crate::identity::{Identity, RedactedToken};
use crate::inference::{InferenceClient, InferenceClients};
use crate::tls::TlsProfile;

use super::{ClientFactory, ClientRegistry, ScopedClient};

/// Canned responses served by the stub backend
#[derive(Clone, Debug)]
pub struct StubData {
    /// Namespace names
    pub namespaces: Vec<String>,
    /// Distributions by namespace
    pub distributions: HashMap<String, Vec<LlamaStackDistribution>>,
    /// Pipeline applications by namespace
    pub pipeline_applications: HashMap<String, Vec<DataSciencePipelinesApplication>>,
    /// Token rate-limit policies by namespace
    pub token_policies: HashMap<String, Vec<TokenRateLimitPolicy>>,
    /// Verdict of every access review
    pub allow_all: bool,
}

impl Default for StubData {
    fn default() -> Self {
        Self {
            namespaces: vec!["default".to_string(), "stub-project".to_string()],
            distributions: HashMap::new(),
            pipeline_applications: HashMap::new(),
            token_policies: HashMap::new(),
            allow_all: true,
        }
    }
}

/// Scoped client answering from [`StubData`]
#[derive(Clone, Debug)]
pub struct StubScopedClient {
    data: Arc<StubData>,
    token: Option<RedactedToken>,
}

impl StubScopedClient {
    /// Client over shared canned data, remembering the caller's token
    pub fn new(data: Arc<StubData>, token: Option<RedactedToken>) -> Self {
        Self { data, token }
    }
}

#[async_trait]
impl ScopedClient for StubScopedClient {
    async fn list_namespaces(&self, _deadline: Deadline) -> Result<Vec<Namespace>> {
        Ok(self
            .data
            .namespaces
            .iter()
            .map(|name| Namespace {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect())
    }

    async fn list_distributions(
        &self,
        namespace: &str,
        _deadline: Deadline,
    ) -> Result<Vec<LlamaStackDistribution>> {
        Ok(self
            .data
            .distributions
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_distribution(
        &self,
        namespace: &str,
        name: &str,
        _deadline: Deadline,
    ) -> Result<LlamaStackDistribution> {
        self.data
            .distributions
            .get(namespace)
            .and_then(|items| {
                items
                    .iter()
                    .find(|d| d.metadata.name.as_deref() == Some(name))
            })
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("distribution {}/{}", namespace, name)))
    }

    async fn list_pipeline_applications(
        &self,
        namespace: &str,
        _deadline: Deadline,
    ) -> Result<Vec<DataSciencePipelinesApplication>> {
        Ok(self
            .data
            .pipeline_applications
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_token_policies(
        &self,
        namespace: &str,
        _deadline: Deadline,
    ) -> Result<Vec<TokenRateLimitPolicy>> {
        Ok(self
            .data
            .token_policies
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn self_access_review(
        &self,
        _attributes: &ResourceAttributes,
        _deadline: Deadline,
    ) -> Result<bool> {
        Ok(self.data.allow_all)
    }

    fn bearer_token(&self) -> Option<&RedactedToken> {
        self.token.as_ref()
    }

    fn identity_label(&self) -> String {
        "stub".to_string()
    }
}

/// Factory for the stub backend
pub struct StubClientFactory {
    data: Arc<StubData>,
    extractor: TokenExtractor,
    clients: ClientRegistry<dyn ScopedClient>,
    inference: InferenceClients,
}

impl StubClientFactory {
    /// Factory serving `data` to every identity
    pub fn new(data: StubData, config: &FactoryConfig) -> Self {
        Self {
            data: Arc::new(data),
            extractor: TokenExtractor::from_config(&config.auth),
            clients: ClientRegistry::new(config.registry),
            inference: InferenceClients::new(TlsProfile::default(), config.registry),
        }
    }

    /// Number of identities that have been issued a client
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl ClientFactory for StubClientFactory {
    fn backend(&self) -> BackendKind {
        BackendKind::Stub
    }

    fn extract(&self, headers: &HeaderMap) -> Result<Identity> {
        self.extractor.extract(headers)
    }

    async fn validate(&self, _identity: &Identity, _deadline: Deadline) -> Result<()> {
        Ok(())
    }

    async fn get(&self, identity: &Identity, _deadline: Deadline) -> Result<Arc<dyn ScopedClient>> {
        let key = identity.fingerprint();
        self.clients
            .get_or_try_insert_with(&key, move || async move {
                debug!("Creating stub scoped client");
                let client: Arc<dyn ScopedClient> = Arc::new(StubScopedClient::new(
                    self.data.clone(),
                    identity.token().cloned(),
                ));
                Ok(client)
            })
            .await
    }

    async fn inference(
        &self,
        identity: &Identity,
        client: Arc<dyn ScopedClient>,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Arc<InferenceClient>> {
        self.inference
            .get(identity, client.as_ref(), namespace, deadline)
            .await
    }
}
