//! Identity-scoped inference-service access
//!
//! The endpoint for a namespace is located on first use per (identity,
//! namespace) through the caller's scoped client, and the resulting client is
//! cached next to the Kubernetes client for that identity.

mod client;
mod locator;

use std::sync::Arc;

use tracing::debug;

pub use self::client::{InferenceClient, IssuedToken, Model, ResponseRequest};
pub use self::locator::{InferenceEndpoint, ServiceLocator};

use crate::client::{ClientRegistry, ScopedClient};
use crate::config::ClientRegistryConfig;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::identity::Identity;
use crate::tls::TlsProfile;

/// Inference clients keyed by (identity fingerprint, namespace)
pub struct InferenceClients {
    locator: ServiceLocator,
    registry: ClientRegistry<InferenceClient>,
}

impl InferenceClients {
    /// Empty cache whose clients use `tls`
    pub fn new(tls: TlsProfile, registry: ClientRegistryConfig) -> Self {
        Self {
            locator: ServiceLocator::new(tls),
            registry: ClientRegistry::new(registry),
        }
    }

    /// Inference client for `identity` in `namespace`, located on first use
    pub async fn get(
        &self,
        identity: &Identity,
        client: &dyn ScopedClient,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<Arc<InferenceClient>> {
        let key = format!("{}/{}", identity.fingerprint(), namespace);

        self.registry
            .get_or_try_insert_with(&key, move || async move {
                let endpoint = self.locator.locate(client, namespace, deadline).await?;
                debug!(
                    namespace = %namespace,
                    client = %client.identity_label(),
                    "Creating inference client"
                );
                Ok(Arc::new(InferenceClient::new(
                    &endpoint,
                    identity.token().cloned(),
                )?))
            })
            .await
    }

    /// Number of cached inference clients
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no inference client has been created yet
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}
