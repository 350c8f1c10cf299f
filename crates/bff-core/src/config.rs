//! Process-start configuration for the core
//!
//! These types are built once at start-up (the server binary fills them from
//! CLI flags and environment variables) and handed to the factory
//! constructors. Defaults match the documented option defaults.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default inbound header carrying the caller's token
pub const DEFAULT_TOKEN_HEADER: &str = "Authorization";

/// Default prefix stripped from the token header (note the trailing space)
pub const DEFAULT_TOKEN_PREFIX: &str = "Bearer ";

/// Path appended to the cluster API base URL to reach the user-info endpoint
pub const USER_INFO_PATH: &str = "/apis/user.openshift.io/v1/users/~";

/// Cluster API URL used to derive the user-info endpoint when nothing is configured
pub const FALLBACK_CLUSTER_API_URL: &str = "https://kubernetes.default.svc";

/// Upper bound on a single identity validation
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single Kubernetes list call
pub const KUBE_LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TTL for cached capability verdicts (both allow and deny)
pub const DEFAULT_CAPABILITY_TTL: Duration = Duration::from_secs(10);

/// Authentication mode, fixed at process start
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Every request is accepted as an anonymous identity
    Disabled,
    /// A bearer token is required and validated
    #[default]
    UserToken,
}

impl FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(AuthMethod::Disabled),
            "user_token" => Ok(AuthMethod::UserToken),
            other => Err(Error::Config(format!(
                "unknown auth method '{}', expected 'disabled' or 'user_token'",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Disabled => f.write_str("disabled"),
            AuthMethod::UserToken => f.write_str("user_token"),
        }
    }
}

/// Token carrier rules for inbound requests
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    /// Authentication mode
    pub method: AuthMethod,
    /// Header holding the primary token
    pub token_header: String,
    /// Prefix stripped from header values; empty means the whole value is the token
    pub token_prefix: String,
    /// Optional header holding a secondary token for a downstream tool server
    pub tool_token_header: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: AuthMethod::default(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            tool_token_header: None,
        }
    }
}

/// Identity validator settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Absolute user-info URL; takes precedence over derivation
    pub user_info_endpoint: Option<String>,
    /// Cluster API base URL the user-info endpoint is derived from
    pub cluster_api_base_url: Option<String>,
    /// Internal upper bound on one validation
    pub timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            user_info_endpoint: None,
            cluster_api_base_url: None,
            timeout: VALIDATION_TIMEOUT,
        }
    }
}

impl ValidatorConfig {
    /// Resolve the endpoint the validator should call
    ///
    /// Explicit endpoint first, then the configured cluster API base URL, then
    /// the in-cluster fallback. The boolean is true when the fallback was used.
    pub fn resolve_endpoint(&self) -> (String, bool) {
        if let Some(endpoint) = self.user_info_endpoint.as_deref().filter(|e| !e.is_empty()) {
            return (endpoint.to_string(), false);
        }
        match self.cluster_api_base_url.as_deref().filter(|u| !u.is_empty()) {
            Some(base) => (derive_user_info_endpoint(base), false),
            None => (derive_user_info_endpoint(FALLBACK_CLUSTER_API_URL), true),
        }
    }
}

/// Append the user-info path to a cluster API base URL
pub fn derive_user_info_endpoint(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), USER_INFO_PATH)
}

/// TLS profile inputs shared by every upstream client
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM bundles added to the root-CA pool; missing files are skipped
    pub bundle_paths: Vec<PathBuf>,
    /// Disable certificate verification (only honoured when explicitly set)
    pub insecure_skip_verify: bool,
}

/// Capability cache TTLs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapabilityCacheConfig {
    /// How long an `allow` verdict is served from cache
    pub allow_ttl: Duration,
    /// How long a `deny` verdict is served from cache
    pub deny_ttl: Duration,
}

impl Default for CapabilityCacheConfig {
    fn default() -> Self {
        Self {
            allow_ttl: DEFAULT_CAPABILITY_TTL,
            deny_ttl: DEFAULT_CAPABILITY_TTL,
        }
    }
}

/// Bounds for the per-identity client registry
///
/// With `max_entries` unset the registry grows for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientRegistryConfig {
    /// Maximum number of cached clients
    pub max_entries: Option<usize>,
    /// Entries untouched for this long are evicted first when the bound is hit
    pub idle_ttl: Duration,
}

impl Default for ClientRegistryConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            idle_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Where the base cluster configuration comes from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KubeConfigSource {
    /// In-cluster service account if available, otherwise the ambient kubeconfig
    #[default]
    Infer,
    /// In-cluster service account only
    InCluster,
    /// An explicit kubeconfig file
    Kubeconfig(PathBuf),
}

/// Which scoped-client backend the process runs with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Bearer-token scoped clients against a real cluster
    #[default]
    Real,
    /// Impersonating clients against a test API server
    Envtest,
    /// Canned data, no cluster
    Stub,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "real" => Ok(BackendKind::Real),
            "envtest" => Ok(BackendKind::Envtest),
            "stub" => Ok(BackendKind::Stub),
            other => Err(Error::Config(format!(
                "unknown backend '{}', expected 'real', 'envtest' or 'stub'",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Real => f.write_str("real"),
            BackendKind::Envtest => f.write_str("envtest"),
            BackendKind::Stub => f.write_str("stub"),
        }
    }
}

/// Backend selection plus the data only that backend needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    /// Real cluster
    Real {
        /// Base cluster config source
        source: KubeConfigSource,
    },
    /// Test API server with impersonation
    Envtest {
        /// Base cluster config source (must carry a privileged credential)
        source: KubeConfigSource,
        /// Fake token to test user name
        users: HashMap<String, String>,
    },
    /// Canned responses
    Stub,
}

impl BackendConfig {
    /// The backend kind this config selects
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Real { .. } => BackendKind::Real,
            BackendConfig::Envtest { .. } => BackendKind::Envtest,
            BackendConfig::Stub => BackendKind::Stub,
        }
    }
}

/// Everything needed to build a client factory
#[derive(Clone, Debug)]
pub struct FactoryConfig {
    /// Token carrier rules
    pub auth: AuthConfig,
    /// Identity validator settings
    pub validator: ValidatorConfig,
    /// TLS profile inputs
    pub tls: TlsConfig,
    /// Client registry bounds
    pub registry: ClientRegistryConfig,
    /// Backend selection
    pub backend: BackendConfig,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            validator: ValidatorConfig::default(),
            tls: TlsConfig::default(),
            registry: ClientRegistryConfig::default(),
            backend: BackendConfig::Real {
                source: KubeConfigSource::Infer,
            },
        }
    }
}
