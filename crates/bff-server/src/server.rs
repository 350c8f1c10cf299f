//! HTTP surface of the BFF
//!
//! Every route except `/healthz` runs behind the identity pipeline, so each
//! handler receives the caller's scoped client and never touches the
//! server's own credentials.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use bff_core::config::CapabilityCacheConfig;
use bff_core::context::{RequestClient, RequestDeadline, RequestIdentity};
use bff_core::crd::{DataSciencePipelinesApplication, LlamaStackDistribution, TokenRateLimitPolicy};
use bff_core::inference::Model;
use bff_core::{middleware, CapabilityGate, ClientFactory, Error, ResourceAttributes, Result, Verdict};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Factory the pipeline and handlers share
    pub factory: Arc<dyn ClientFactory>,
    /// Cached access reviews
    pub gate: Arc<CapabilityGate>,
}

impl AppState {
    /// State with a fresh capability gate whose expired verdicts are swept
    /// in the background; must be called inside a tokio runtime
    pub fn new(factory: Arc<dyn ClientFactory>, capability: CapabilityCacheConfig) -> Self {
        let gate = Arc::new(CapabilityGate::new(capability));
        CapabilityGate::spawn_purge_task(&gate);
        Self { factory, gate }
    }
}

/// Response envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    data: T,
}

fn envelope<T>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { data })
}

/// Namespace as returned to the UI
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct NamespaceSummary {
    name: String,
}

/// Caller capabilities as returned to the UI
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    cluster_admin: bool,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_namespaces(
    RequestClient(client): RequestClient,
    RequestDeadline(deadline): RequestDeadline,
) -> Result<Json<Envelope<Vec<NamespaceSummary>>>> {
    let namespaces = client
        .list_namespaces(deadline)
        .await?
        .into_iter()
        .filter_map(|ns| ns.metadata.name)
        .map(|name| NamespaceSummary { name })
        .collect();
    Ok(envelope(namespaces))
}

async fn list_distributions(
    RequestClient(client): RequestClient,
    RequestDeadline(deadline): RequestDeadline,
    Path(namespace): Path<String>,
) -> Result<Json<Envelope<Vec<LlamaStackDistribution>>>> {
    let distributions = client.list_distributions(&namespace, deadline).await?;
    Ok(envelope(distributions))
}

async fn list_pipelines(
    RequestClient(client): RequestClient,
    RequestDeadline(deadline): RequestDeadline,
    Path(namespace): Path<String>,
) -> Result<Json<Envelope<Vec<DataSciencePipelinesApplication>>>> {
    let applications = client.list_pipeline_applications(&namespace, deadline).await?;
    Ok(envelope(applications))
}

async fn list_token_policies(
    RequestClient(client): RequestClient,
    RequestDeadline(deadline): RequestDeadline,
    Path(namespace): Path<String>,
) -> Result<Json<Envelope<Vec<TokenRateLimitPolicy>>>> {
    let policies = client.list_token_policies(&namespace, deadline).await?;
    Ok(envelope(policies))
}

async fn current_user(
    State(state): State<AppState>,
    RequestIdentity(identity): RequestIdentity,
    RequestClient(client): RequestClient,
    RequestDeadline(deadline): RequestDeadline,
) -> Result<Json<Envelope<UserSummary>>> {
    let verdict = state
        .gate
        .may_i(
            &identity,
            client.as_ref(),
            &ResourceAttributes::cluster_admin(),
            deadline,
        )
        .await;

    let cluster_admin = match verdict {
        Verdict::Allow => true,
        Verdict::Deny => false,
        Verdict::Indeterminate => {
            return Err(Error::Internal("cluster-admin review indeterminate".into()))
        }
    };
    Ok(envelope(UserSummary { cluster_admin }))
}

async fn list_models(
    State(state): State<AppState>,
    RequestIdentity(identity): RequestIdentity,
    RequestClient(client): RequestClient,
    RequestDeadline(deadline): RequestDeadline,
    Path(namespace): Path<String>,
) -> Result<Json<Envelope<Vec<Model>>>> {
    let inference = state
        .factory
        .inference(&identity, client, &namespace, deadline)
        .await?;
    let models = inference.list_models(deadline).await?;
    Ok(envelope(models))
}

/// Build the full router
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let factory = state.factory.clone();

    let api = Router::new()
        .route("/api/v1/namespaces", get(list_namespaces))
        .route(
            "/api/v1/namespaces/{namespace}/distributions",
            get(list_distributions),
        )
        .route("/api/v1/namespaces/{namespace}/models", get(list_models))
        .route("/api/v1/namespaces/{namespace}/pipelines", get(list_pipelines))
        .route(
            "/api/v1/namespaces/{namespace}/token-policies",
            get(list_token_policies),
        )
        .route("/api/v1/user", get(current_user))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .merge(middleware::attach(api, factory, request_timeout))
}

/// Serve `app` on `addr` until ctrl-c
pub async fn start_server(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    info!(addr = %addr, "Starting BFF server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("BFF server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
