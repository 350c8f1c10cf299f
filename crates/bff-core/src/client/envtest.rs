//! Envtest backend: impersonation against a test API server
//!
//! Test API servers evaluate RBAC but do not authenticate real tokens. Each
//! fake token maps to a configured test user, and the scoped client
//! impersonates that user using the privileged base credential.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use tracing::{debug, info};

use crate::config::{BackendKind, FactoryConfig};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::extract::TokenExtractor;
use crate::identity::Identity;
use crate::inference::{InferenceClient, InferenceClients};
use crate::tls::TlsProfile;

use super::{ClientFactory, ClientRegistry, KubeScopedClient, ScopedClient};

/// Copy `base` so that every request impersonates `user`
///
/// Bearer tokens, token files, basic auth, exec plugins and auth providers
/// are dropped. Client certificates are kept: they are the privileged
/// credential that performs the impersonation.
pub fn scoped_impersonation_config(base: &kube::Config, user: &str) -> kube::Config {
    let mut config = base.clone();
    let auth = &mut config.auth_info;
    auth.token = None;
    auth.token_file = None;
    auth.username = None;
    auth.password = None;
    auth.exec = None;
    auth.auth_provider = None;
    auth.impersonate = Some(user.to_string());
    auth.impersonate_groups = None;
    config
}

/// Factory for envtest clusters
pub struct EnvtestClientFactory {
    base: kube::Config,
    users: HashMap<String, String>,
    extractor: TokenExtractor,
    clients: ClientRegistry<dyn ScopedClient>,
    inference: InferenceClients,
}

impl EnvtestClientFactory {
    /// Factory impersonating the users in `users` (fake token to user name)
    pub fn new(
        mut base: kube::Config,
        users: HashMap<String, String>,
        config: &FactoryConfig,
    ) -> Result<Self> {
        let tls = TlsProfile::load(&config.tls)?;
        tls.apply_to_kube(&mut base);
        info!(
            cluster = %base.cluster_url,
            users = users.len(),
            "Envtest client factory ready"
        );

        Ok(Self {
            base,
            users,
            extractor: TokenExtractor::from_config(&config.auth),
            clients: ClientRegistry::new(config.registry),
            inference: InferenceClients::new(tls, config.registry),
        })
    }

    fn user_for(&self, identity: &Identity) -> Result<Option<&str>> {
        match identity.token() {
            Some(token) => self
                .users
                .get(token.expose())
                .map(|user| Some(user.as_str()))
                .ok_or(Error::UnknownTestIdentity),
            None => Ok(None),
        }
    }

    /// Number of identities that have been issued a client
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl ClientFactory for EnvtestClientFactory {
    fn backend(&self) -> BackendKind {
        BackendKind::Envtest
    }

    fn extract(&self, headers: &HeaderMap) -> Result<Identity> {
        self.extractor.extract(headers)
    }

    async fn validate(&self, identity: &Identity, _deadline: Deadline) -> Result<()> {
        self.user_for(identity).map(|_| ())
    }

    async fn get(&self, identity: &Identity, deadline: Deadline) -> Result<Arc<dyn ScopedClient>> {
        if deadline.is_expired() {
            return Err(Error::Timeout("scoped client lookup exceeded deadline".into()));
        }

        let user = self.user_for(identity)?;
        let key = identity.fingerprint();
        self.clients
            .get_or_try_insert_with(&key, move || async move {
                let (config, label) = match user {
                    Some(user) => (
                        scoped_impersonation_config(&self.base, user),
                        format!("impersonating:{}", user),
                    ),
                    None => (self.base.clone(), "anonymous".to_string()),
                };
                let client = KubeScopedClient::new(config, identity.token().cloned(), label)?;
                debug!(client = %client.identity_label(), "Created scoped client");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RedactedToken;
    use std::time::Duration;

    fn base_config() -> kube::Config {
        let mut config = kube::Config::new("https://127.0.0.1:6443".parse().unwrap());
        config.auth_info.token = Some("admin-token".to_string().into());
        config.auth_info.username = Some("admin".into());
        config.auth_info.password = Some("hunter2".to_string().into());
        config
    }

    fn users() -> HashMap<String, String> {
        HashMap::from([
            ("FAKE_BEARER_TOKEN".to_string(), "test-user-A".to_string()),
            ("OTHER_TOKEN".to_string(), "test-user-B".to_string()),
        ])
    }

    fn factory() -> EnvtestClientFactory {
        EnvtestClientFactory::new(base_config(), users(), &FactoryConfig::default()).unwrap()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[test]
    fn test_impersonation_config_has_only_impersonation() {
        let mut base = base_config();
        base.auth_info.client_certificate_data = Some("Y2VydA==".into());
        let scoped = scoped_impersonation_config(&base, "test-user-A");
        let auth = &scoped.auth_info;

        assert_eq!(auth.impersonate.as_deref(), Some("test-user-A"));
        assert!(auth.token.is_none());
        assert!(auth.token_file.is_none());
        assert!(auth.username.is_none());
        assert!(auth.password.is_none());
        assert!(auth.exec.is_none());
        assert!(auth.auth_provider.is_none());
        // The privileged credential survives
        assert_eq!(auth.client_certificate_data.as_deref(), Some("Y2VydA=="));
    }

    #[tokio::test]
    async fn test_get_maps_token_to_user() {
        let factory = factory();
        let identity = Identity::with_token(RedactedToken::new("FAKE_BEARER_TOKEN"));

        factory.validate(&identity, deadline()).await.unwrap();
        let client = factory.get(&identity, deadline()).await.unwrap();
        assert_eq!(client.identity_label(), "impersonating:test-user-A");

        let again = factory.get(&identity, deadline()).await.unwrap();
        assert!(Arc::ptr_eq(&client, &again));
    }

    #[tokio::test]
    async fn test_round_trip_every_configured_user() {
        let factory = factory();
        for (token, user) in users() {
            let client = factory
                .get(&Identity::with_token(RedactedToken::new(token)), deadline())
                .await
                .unwrap();
            assert_eq!(client.identity_label(), format!("impersonating:{}", user));
        }
        assert_eq!(factory.cached_clients(), 2);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let factory = factory();
        let identity = Identity::with_token(RedactedToken::new("nobody"));

        assert!(matches!(
            factory.validate(&identity, deadline()).await,
            Err(Error::UnknownTestIdentity)
        ));
        assert!(matches!(
            factory.get(&identity, deadline()).await,
            Err(Error::UnknownTestIdentity)
        ));
        assert_eq!(factory.cached_clients(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_uses_base_config() {
        let factory = factory();
        let client = factory.get(&Identity::anonymous(), deadline()).await.unwrap();
        assert_eq!(client.identity_label(), "anonymous");
    }
}
