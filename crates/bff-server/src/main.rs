//! BFF Server - identity-scoped backend for the cluster and inference UI

mod server;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bff_core::config::{
    AuthConfig, AuthMethod, BackendConfig, BackendKind, CapabilityCacheConfig,
    ClientRegistryConfig, FactoryConfig, KubeConfigSource, TlsConfig, ValidatorConfig,
    DEFAULT_TOKEN_HEADER, DEFAULT_TOKEN_PREFIX,
};
use bff_core::build_factory;

use crate::server::{router, start_server, AppState};

/// Upper bound for `--request-timeout`, one day
const MAX_REQUEST_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// BFF server - every upstream call runs with the caller's own credentials
#[derive(Parser, Debug)]
#[command(name = "bff-server", version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Authentication mode: `user_token` or `disabled`
    #[arg(long, env = "AUTH_METHOD", default_value = "user_token")]
    auth_method: AuthMethod,

    /// Header carrying the caller's token
    #[arg(long, env = "AUTH_TOKEN_HEADER", default_value = DEFAULT_TOKEN_HEADER)]
    auth_token_header: String,

    /// Prefix stripped from the token header; empty means the whole value
    #[arg(long, env = "AUTH_TOKEN_PREFIX", default_value = DEFAULT_TOKEN_PREFIX)]
    auth_token_prefix: String,

    /// Optional header carrying a secondary token for a tool server
    #[arg(long, env = "TOOL_TOKEN_HEADER")]
    tool_token_header: Option<String>,

    /// Absolute user-info URL used to validate tokens
    #[arg(long, env = "USER_INFO_ENDPOINT")]
    user_info_endpoint: Option<String>,

    /// Cluster API base URL the user-info endpoint is derived from
    #[arg(long, env = "CLUSTER_API_BASE_URL")]
    cluster_api_base_url: Option<String>,

    /// Comma-separated PEM bundles added to the root-CA pool
    #[arg(long, env = "TLS_BUNDLE_PATHS", value_delimiter = ',')]
    tls_bundle_paths: Vec<PathBuf>,

    /// Skip upstream certificate verification
    #[arg(long, env = "INSECURE_SKIP_VERIFY")]
    insecure_skip_verify: bool,

    /// Seconds an allow verdict is cached
    #[arg(long, env = "ALLOW_CACHE_TTL", default_value_t = 10)]
    allow_cache_ttl: u64,

    /// Seconds a deny verdict is cached
    #[arg(long, env = "DENY_CACHE_TTL", default_value_t = 10)]
    deny_cache_ttl: u64,

    /// Scoped-client backend: `real`, `envtest` or `stub`
    #[arg(long, env = "BFF_BACKEND", default_value = "real")]
    backend: BackendKind,

    /// Kubeconfig for the base cluster config
    #[arg(long, env = "BFF_KUBECONFIG", conflicts_with = "in_cluster")]
    kubeconfig: Option<PathBuf>,

    /// Use only the in-cluster service account for the base config
    #[arg(long, env = "IN_CLUSTER")]
    in_cluster: bool,

    /// YAML file mapping fake tokens to test user names (envtest backend)
    #[arg(long, env = "ENVTEST_USERS")]
    envtest_users: Option<PathBuf>,

    /// Seconds before an inbound request is cut off, at most one day
    #[arg(
        long,
        env = "REQUEST_TIMEOUT",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..=MAX_REQUEST_TIMEOUT_SECS)
    )]
    request_timeout: u64,

    /// Maximum cached scoped clients, at least one; unbounded when unset
    #[arg(long, env = "CLIENT_CACHE_MAX_ENTRIES")]
    client_cache_max_entries: Option<NonZeroUsize>,

    /// Seconds after which an unused scoped client is evicted first
    #[arg(long, env = "CLIENT_CACHE_IDLE_TTL", default_value_t = 900)]
    client_cache_idle_ttl: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn kube_source(&self) -> KubeConfigSource {
        match (&self.kubeconfig, self.in_cluster) {
            (Some(path), _) => KubeConfigSource::Kubeconfig(path.clone()),
            (None, true) => KubeConfigSource::InCluster,
            (None, false) => KubeConfigSource::Infer,
        }
    }

    fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        Ok(match self.backend {
            BackendKind::Real => BackendConfig::Real {
                source: self.kube_source(),
            },
            BackendKind::Envtest => {
                let path = self
                    .envtest_users
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("--envtest-users is required for the envtest backend"))?;
                BackendConfig::Envtest {
                    source: self.kube_source(),
                    users: load_envtest_users(path)?,
                }
            }
            BackendKind::Stub => BackendConfig::Stub,
        })
    }

    fn factory_config(&self) -> anyhow::Result<FactoryConfig> {
        Ok(FactoryConfig {
            auth: AuthConfig {
                method: self.auth_method,
                token_header: self.auth_token_header.clone(),
                token_prefix: self.auth_token_prefix.clone(),
                tool_token_header: self.tool_token_header.clone(),
            },
            validator: ValidatorConfig {
                user_info_endpoint: self.user_info_endpoint.clone(),
                cluster_api_base_url: self.cluster_api_base_url.clone(),
                ..Default::default()
            },
            tls: TlsConfig {
                bundle_paths: self.tls_bundle_paths.clone(),
                insecure_skip_verify: self.insecure_skip_verify,
            },
            registry: ClientRegistryConfig {
                max_entries: self.client_cache_max_entries.map(NonZeroUsize::get),
                idle_ttl: Duration::from_secs(self.client_cache_idle_ttl),
            },
            backend: self.backend_config()?,
        })
    }

    fn capability_config(&self) -> CapabilityCacheConfig {
        CapabilityCacheConfig {
            allow_ttl: Duration::from_secs(self.allow_cache_ttl),
            deny_ttl: Duration::from_secs(self.deny_cache_ttl),
        }
    }
}

/// Read the fake-token to user-name table
fn load_envtest_users(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let users: HashMap<String, String> = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    if users.is_empty() {
        anyhow::bail!("{} maps no test users", path.display());
    }
    Ok(users)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bff_core=debug,kube=info,tower=warn,hyper=warn"));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli.factory_config()?;
    let factory = build_factory(&config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to build client factory: {}", e))?;
    info!(
        backend = %factory.backend(),
        auth_method = %config.auth.method,
        "Client factory ready"
    );

    let state = AppState::new(factory, cli.capability_config());
    let app = router(state, Duration::from_secs(cli.request_timeout));

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    start_server(addr, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["bff-server"]).unwrap();
        let config = cli.factory_config().unwrap();

        assert_eq!(config.auth, AuthConfig::default());
        assert_eq!(config.validator, ValidatorConfig::default());
        assert_eq!(
            config.backend,
            BackendConfig::Real {
                source: KubeConfigSource::Infer
            }
        );
        assert_eq!(cli.capability_config(), CapabilityCacheConfig::default());
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_flags_map_to_config() {
        let cli = Cli::try_parse_from([
            "bff-server",
            "--auth-method",
            "disabled",
            "--auth-token-header",
            "X-Forwarded-Access-Token",
            "--auth-token-prefix",
            "",
            "--tls-bundle-paths",
            "/etc/pki/a.crt,/etc/pki/b.crt",
            "--deny-cache-ttl",
            "2",
            "--kubeconfig",
            "/tmp/kubeconfig",
            "--client-cache-max-entries",
            "100",
        ])
        .unwrap();
        let config = cli.factory_config().unwrap();

        assert_eq!(config.auth.method, AuthMethod::Disabled);
        assert_eq!(config.auth.token_header, "X-Forwarded-Access-Token");
        assert_eq!(config.auth.token_prefix, "");
        assert_eq!(config.tls.bundle_paths.len(), 2);
        assert_eq!(cli.capability_config().deny_ttl, Duration::from_secs(2));
        assert_eq!(config.registry.max_entries, Some(100));
        assert_eq!(
            config.backend,
            BackendConfig::Real {
                source: KubeConfigSource::Kubeconfig("/tmp/kubeconfig".into())
            }
        );
    }

    #[test]
    fn test_unknown_auth_method_rejected() {
        assert!(Cli::try_parse_from(["bff-server", "--auth-method", "oauth"]).is_err());
    }

    #[test]
    fn test_zero_client_cache_bound_rejected() {
        assert!(Cli::try_parse_from(["bff-server", "--client-cache-max-entries", "0"]).is_err());

        let cli = Cli::try_parse_from(["bff-server", "--client-cache-max-entries", "1"]).unwrap();
        assert_eq!(cli.factory_config().unwrap().registry.max_entries, Some(1));
    }

    #[test]
    fn test_request_timeout_bounded() {
        assert!(Cli::try_parse_from(["bff-server", "--request-timeout", "0"]).is_err());
        assert!(Cli::try_parse_from([
            "bff-server",
            "--request-timeout",
            "18446744073709551615"
        ])
        .is_err());

        let max = MAX_REQUEST_TIMEOUT_SECS.to_string();
        let cli = Cli::try_parse_from(["bff-server", "--request-timeout", max.as_str()]).unwrap();
        assert_eq!(cli.request_timeout, MAX_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_envtest_requires_users() {
        let cli = Cli::try_parse_from(["bff-server", "--backend", "envtest"]).unwrap();
        assert!(cli.factory_config().is_err());
    }

    #[test]
    fn test_envtest_users_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "FAKE_BEARER_TOKEN: test-user-A").unwrap();
        writeln!(file, "OTHER_TOKEN: test-user-B").unwrap();

        let path = file.path().to_str().unwrap();
        let cli = Cli::try_parse_from([
            "bff-server",
            "--backend",
            "envtest",
            "--envtest-users",
            path,
            "--in-cluster",
        ])
        .unwrap();

        match cli.factory_config().unwrap().backend {
            BackendConfig::Envtest { source, users } => {
                assert_eq!(source, KubeConfigSource::InCluster);
                assert_eq!(users["FAKE_BEARER_TOKEN"], "test-user-A");
                assert_eq!(users.len(), 2);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }
}
