//! Kubernetes-backed scoped clients and the real backend
//!
//! A scoped client is a `kube::Client` built from a copy of the base cluster
//! config whose credentials were replaced by the caller's. The base config is
//! loaded once at start-up from an explicit source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use k8s_openapi::api::authorization::v1::{SelfSubjectAccessReview, SelfSubjectAccessReviewSpec};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, PostParams};
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::{debug, info, warn};

use crate::capability::ResourceAttributes;
use crate::config::{BackendKind, FactoryConfig, KubeConfigSource, KUBE_LIST_TIMEOUT};
use crate::crd::{DataSciencePipelinesApplication, LlamaStackDistribution, TokenRateLimitPolicy};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::extract::TokenExtractor;
use crate::identity::{Identity, RedactedToken};
use crate::inference::{InferenceClient, InferenceClients};
use crate::tls::TlsProfile;
use crate::validator::{build_validator, IdentityValidator};

use super::{ClientFactory, ClientRegistry, ScopedClient};

/// Connection timeout for scoped clients
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Load the base cluster config from `source`
///
/// `Infer` prefers the in-cluster service account and falls back to the
/// ambient kubeconfig.
pub async fn load_base_config(source: &KubeConfigSource) -> Result<kube::Config> {
    match source {
        KubeConfigSource::Infer => match kube::Config::incluster() {
            Ok(config) => {
                info!("Using in-cluster base config");
                Ok(config)
            }
            Err(e) => {
                debug!(error = %e, "In-cluster config unavailable, trying kubeconfig");
                kube::Config::infer()
                    .await
                    .map_err(|e| Error::Config(format!("failed to infer cluster config: {}", e)))
            }
        },
        KubeConfigSource::InCluster => kube::Config::incluster()
            .map_err(|e| Error::Config(format!("failed to load in-cluster config: {}", e))),
        KubeConfigSource::Kubeconfig(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::Config(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        Error::Config(format!(
                            "failed to load kubeconfig {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
            info!(path = %path.display(), "Using kubeconfig base config");
            Ok(config)
        }
    }
}

/// Copy `base` with the caller's token as the only credential
///
/// Token file, basic auth, exec plugins, auth providers, client certificates
/// and impersonation are all dropped.
pub fn scoped_bearer_config(base: &kube::Config, token: &RedactedToken) -> kube::Config {
    let mut config = base.clone();
    config.auth_info = AuthInfo {
        token: Some(token.expose().to_string().into()),
        ..Default::default()
    };
    config
}

/// Kubernetes client bound to one identity
#[derive(Clone)]
pub struct KubeScopedClient {
    client: Client,
    token: Option<RedactedToken>,
    label: String,
}

impl KubeScopedClient {
    /// Build a client from an already-scoped config
    ///
    /// `token` is kept only for forwarding; authentication is whatever
    /// `config` carries.
    pub fn new(
        mut config: kube::Config,
        token: Option<RedactedToken>,
        label: impl Into<String>,
    ) -> Result<Self> {
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(KUBE_LIST_TIMEOUT);

        let client = Client::try_from(config)
            .map_err(|e| Error::Config(format!("failed to create scoped client: {}", e)))?;

        Ok(Self {
            client,
            token,
            label: label.into(),
        })
    }
}

impl std::fmt::Debug for KubeScopedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeScopedClient")
            .field("label", &self.label)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ScopedClient for KubeScopedClient {
    async fn list_namespaces(&self, deadline: Deadline) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        deadline
            .capped(KUBE_LIST_TIMEOUT)
            .run("list namespaces", async {
                Ok(api.list(&ListParams::default()).await?.items)
            })
            .await
    }

    async fn list_distributions(
        &self,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Vec<LlamaStackDistribution>> {
        let api: Api<LlamaStackDistribution> = Api::namespaced(self.client.clone(), namespace);
        deadline
            .capped(KUBE_LIST_TIMEOUT)
            .run("list distributions", async {
                Ok(api.list(&ListParams::default()).await?.items)
            })
            .await
    }

    async fn get_distribution(
        &self,
        namespace: &str,
        name: &str,
        deadline: Deadline,
    ) -> Result<LlamaStackDistribution> {
        let api: Api<LlamaStackDistribution> = Api::namespaced(self.client.clone(), namespace);
        deadline
            .run("get distribution", async { Ok(api.get(name).await?) })
            .await
    }

    async fn list_pipeline_applications(
        &self,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Vec<DataSciencePipelinesApplication>> {
        let api: Api<DataSciencePipelinesApplication> =
            Api::namespaced(self.client.clone(), namespace);
        deadline
            .capped(KUBE_LIST_TIMEOUT)
            .run("list pipeline applications", async {
                Ok(api.list(&ListParams::default()).await?.items)
            })
            .await
    }

    async fn list_token_policies(
        &self,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Vec<TokenRateLimitPolicy>> {
        let api: Api<TokenRateLimitPolicy> = Api::namespaced(self.client.clone(), namespace);
        deadline
            .capped(KUBE_LIST_TIMEOUT)
            .run("list token policies", async {
                Ok(api.list(&ListParams::default()).await?.items)
            })
            .await
    }

    async fn self_access_review(
        &self,
        attributes: &ResourceAttributes,
        deadline: Deadline,
    ) -> Result<bool> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(attributes.into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());

        deadline
            .run("self access review", async {
                let created = api.create(&PostParams::default(), &review).await?;
                Ok(created.status.map(|s| s.allowed).unwrap_or(false))
            })
            .await
    }

    fn bearer_token(&self) -> Option<&RedactedToken> {
        self.token.as_ref()
    }

    fn identity_label(&self) -> String {
        self.label.clone()
    }
}

/// Factory for real clusters: the caller's token is the upstream credential
pub struct RealClientFactory {
    base: kube::Config,
    extractor: TokenExtractor,
    validator: Arc<dyn IdentityValidator>,
    clients: ClientRegistry<dyn ScopedClient>,
    inference: InferenceClients,
}

impl RealClientFactory {
    /// Factory over an already-loaded base config
    ///
    /// `tls` is installed on the base config and on inference clients.
    pub fn new(
        mut base: kube::Config,
        tls: TlsProfile,
        extractor: TokenExtractor,
        validator: Arc<dyn IdentityValidator>,
        config: &FactoryConfig,
    ) -> Self {
        tls.apply_to_kube(&mut base);
        info!(cluster = %base.cluster_url, "Real client factory ready");

        Self {
            base,
            extractor,
            validator,
            clients: ClientRegistry::new(config.registry),
            inference: InferenceClients::new(tls, config.registry),
        }
    }

    /// Load the base config from `source` and build the factory
    pub async fn from_source(source: &KubeConfigSource, config: &FactoryConfig) -> Result<Self> {
        let base = load_base_config(source).await?;
        let tls = TlsProfile::load(&config.tls)?;
        let validator = build_validator(config, &tls)?;
        Ok(Self::new(
            base,
            tls,
            TokenExtractor::from_config(&config.auth),
            validator,
            config,
        ))
    }

    /// Number of identities that have been issued a client
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl ClientFactory for RealClientFactory {
    fn backend(&self) -> BackendKind {
        BackendKind::Real
    }

    fn extract(&self, headers: &HeaderMap) -> Result<Identity> {
        self.extractor.extract(headers)
    }

    async fn validate(&self, identity: &Identity, deadline: Deadline) -> Result<()> {
        if identity.is_anonymous() {
            return Ok(());
        }
        self.validator.validate(identity, deadline).await
    }

    async fn get(&self, identity: &Identity, deadline: Deadline) -> Result<Arc<dyn ScopedClient>> {
        if deadline.is_expired() {
            return Err(Error::Timeout("scoped client lookup exceeded deadline".into()));
        }

        let key = identity.fingerprint();
        self.clients
            .get_or_try_insert_with(&key, move || async move {
                let (config, label) = match identity.token() {
                    Some(token) => (scoped_bearer_config(&self.base, token), "bearer"),
                    None => {
                        warn!("Building scoped client from ambient credentials for anonymous identity");
                        (self.base.clone(), "anonymous")
                    }
                };
                let client = KubeScopedClient::new(config, identity.token().cloned(), label)?;
                debug!(client = %label, "Created scoped client");
                Ok(Arc::new(client) as Arc<dyn ScopedClient>)
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
