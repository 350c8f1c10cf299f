//! TLS profile for upstream clients
//!
//! A profile is a root-CA pool assembled from configured PEM bundles plus the
//! `insecure-skip-verify` switch. The same profile is installed on scoped
//! Kubernetes clients, the identity validator and inference clients.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::TlsConfig;
use crate::error::{Error, Result};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Loaded TLS settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsProfile {
    /// DER-encoded root certificates
    roots: Vec<Vec<u8>>,
    /// Skip certificate verification
    insecure_skip_verify: bool,
}

impl TlsProfile {
    /// Load every configured bundle
    ///
    /// Paths that do not exist are skipped. A path that exists but cannot be
    /// read or parsed is a configuration error.
    pub fn load(config: &TlsConfig) -> Result<Self> {
        let mut roots = Vec::new();

        for path in &config.bundle_paths {
            if !path.exists() {
                debug!(path = %path.display(), "TLS bundle not present, skipping");
                continue;
            }
            let certs = read_bundle(path)?;
            debug!(path = %path.display(), count = certs.len(), "Loaded TLS bundle");
            roots.extend(certs);
        }

        if config.insecure_skip_verify {
            warn!("TLS certificate verification is disabled for upstream clients");
        }

        Ok(Self {
            roots,
            insecure_skip_verify: config.insecure_skip_verify,
        })
    }

    /// DER-encoded root certificates in load order
    pub fn roots(&self) -> &[Vec<u8>] {
        &self.roots
    }

    /// Whether verification is disabled
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Install this profile on a Kubernetes client config
    ///
    /// Configured roots are added to any CA data the base config already carries.
    pub fn apply_to_kube(&self, config: &mut kube::Config) {
        if !self.roots.is_empty() {
            config
                .root_cert
                .get_or_insert_with(Vec::new)
                .extend(self.roots.iter().cloned());
        }
        if self.insecure_skip_verify {
            config.accept_invalid_certs = true;
        }
    }

    /// Install this profile on an HTTP client builder
    pub fn apply_to_reqwest(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder> {
        for der in &self.roots {
            let cert = reqwest::Certificate::from_der(der)
                .map_err(|e| Error::Config(format!("invalid root certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if self.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(builder)
    }
}

/// Read all certificates from one PEM bundle
fn read_bundle(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data = std::fs::read(path).map_err(|e| {
        Error::Config(format!("failed to read TLS bundle {}: {}", path.display(), e))
    })?;

    let blocks = pem::parse_many(&data).map_err(|e| {
        Error::Config(format!("failed to parse TLS bundle {}: {}", path.display(), e))
    })?;

    Ok(blocks
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| block.into_contents())
        .collect())
}
