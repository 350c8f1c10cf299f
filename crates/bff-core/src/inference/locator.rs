//! Inference-service discovery
//!
//! The service for a namespace is advertised by a ready
//! `LlamaStackDistribution`. Lookups go through the caller's scoped client so
//! an identity can only discover services it is allowed to see.

use tracing::debug;

use crate::client::ScopedClient;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::tls::TlsProfile;

/// Where and how to reach an inference service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InferenceEndpoint {
    /// Base URL without a trailing slash
    pub base_url: String,
    /// TLS profile used for the connection
    pub tls: TlsProfile,
}

/// Resolves a namespace to its inference endpoint
#[derive(Clone, Debug, Default)]
pub struct ServiceLocator {
    tls: TlsProfile,
}

impl ServiceLocator {
    /// Locator handing out endpoints with the given TLS profile
    pub fn new(tls: TlsProfile) -> Self {
        Self { tls }
    }

    /// Find the first ready distribution in `namespace`
    pub async fn locate(
        &self,
        client: &dyn ScopedClient,
        namespace: &str,
        deadline: Deadline,
    ) -> Result<InferenceEndpoint> {
        let distributions = client.list_distributions(namespace, deadline).await?;

        let (name, url) = distributions
            .iter()
            .find_map(|d| {
                let url = d.ready_service_url()?;
                Some((d.metadata.name.as_deref().unwrap_or_default(), url))
            })
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no ready inference distribution in namespace {}",
                    namespace
                ))
            })?;

        debug!(namespace = %namespace, distribution = %name, url = %url, "Located inference service");

        Ok(InferenceEndpoint {
            base_url: url.trim_end_matches('/').to_string(),
            tls: self.tls.clone(),
        })
    }
}
