//! Fake upstreams for pipeline integration tests
//!
//! One axum server plays the cluster API, the user-info endpoint and an
//! inference service. Every request it receives is recorded so tests can
//! assert on the credentials that actually went over the wire.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// One request as the fake saw it
#[derive(Clone, Debug)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub impersonate_user: Option<String>,
}

#[derive(Default)]
struct Inner {
    seen: Vec<SeenRequest>,
    valid_tokens: HashSet<String>,
    forbidden_users: HashSet<String>,
    user_info_delay: Duration,
    ssar_allowed: bool,
}

/// Handle on a running fake upstream
#[derive(Clone)]
pub struct FakeUpstream {
    pub url: String,
    inner: Arc<Mutex<Inner>>,
}

impl FakeUpstream {
    /// Start the fake on an ephemeral local port
    pub async fn start() -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            ssar_allowed: true,
            ..Default::default()
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = AppState {
            inner: inner.clone(),
            url: url.clone(),
        };
        let app = Router::new()
            .route("/apis/user.openshift.io/v1/users/~", get(user_info))
            .route("/api/v1/namespaces", get(list_namespaces))
            .route(
                "/apis/llamastack.io/v1alpha1/namespaces/{ns}/llamastackdistributions",
                get(list_distributions),
            )
            .route(
                "/apis/kuadrant.io/v1alpha1/namespaces/{ns}/tokenratelimitpolicies",
                get(list_token_policies),
            )
            .route(
                "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews",
                post(access_review),
            )
            .route("/v1/models", get(list_models))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, inner }
    }

    /// Accept `token` at the user-info endpoint
    pub fn accept_token(&self, token: &str) {
        self.inner.lock().valid_tokens.insert(token.to_string());
    }

    /// Stop accepting `token`
    pub fn revoke_token(&self, token: &str) {
        self.inner.lock().valid_tokens.remove(token);
    }

    /// Answer 403 to any request impersonating `user`
    pub fn forbid_user(&self, user: &str) {
        self.inner.lock().forbidden_users.insert(user.to_string());
    }

    /// Delay every user-info answer
    pub fn delay_user_info(&self, delay: Duration) {
        self.inner.lock().user_info_delay = delay;
    }

    /// Verdict of every access review
    pub fn set_ssar_allowed(&self, allowed: bool) {
        self.inner.lock().ssar_allowed = allowed;
    }

    /// Everything received so far
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.inner.lock().seen.clone()
    }

    /// Requests received on `path`
    pub fn seen_on(&self, path: &str) -> Vec<SeenRequest> {
        self.seen().into_iter().filter(|r| r.path == path).collect()
    }
}

#[derive(Clone)]
struct AppState {
    inner: Arc<Mutex<Inner>>,
    url: String,
}

impl AppState {
    fn record(&self, method: &str, path: String, headers: &HeaderMap) -> SeenRequest {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let seen = SeenRequest {
            method: method.to_string(),
            path,
            authorization: header("authorization"),
            impersonate_user: header("impersonate-user"),
        };
        self.inner.lock().seen.push(seen.clone());
        seen
    }

    fn is_forbidden(&self, seen: &SeenRequest) -> bool {
        seen.impersonate_user
            .as_ref()
            .is_some_and(|user| self.inner.lock().forbidden_users.contains(user))
    }
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": "forbidden",
            "reason": "Forbidden",
            "code": 403
        })),
    )
        .into_response()
}

async fn user_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let seen = state.record("GET", "/apis/user.openshift.io/v1/users/~".into(), &headers);

    let delay = state.inner.lock().user_info_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let token = seen
        .authorization
        .as_deref()
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    if state.inner.lock().valid_tokens.contains(&token) {
        (StatusCode::OK, Json(json!({"kind": "User", "metadata": {"name": "alice"}})))
            .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "token rejected: internal detail").into_response()
    }
}

async fn list_namespaces(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let seen = state.record("GET", "/api/v1/namespaces".into(), &headers);
    if state.is_forbidden(&seen) {
        return forbidden();
    }

    Json(json!({
        "apiVersion": "v1",
        "kind": "NamespaceList",
        "metadata": {"resourceVersion": "1"},
        "items": [
            {"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "team-a"}},
            {"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "team-b"}}
        ]
    }))
    .into_response()
}

async fn list_distributions(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    headers: HeaderMap,
) -> Response {
    let seen = state.record(
        "GET",
        format!(
            "/apis/llamastack.io/v1alpha1/namespaces/{}/llamastackdistributions",
            ns
        ),
        &headers,
    );
    if state.is_forbidden(&seen) {
        return forbidden();
    }

    Json(json!({
        "apiVersion": "llamastack.io/v1alpha1",
        "kind": "LlamaStackDistributionList",
        "metadata": {"resourceVersion": "1"},
        "items": [{
            "apiVersion": "llamastack.io/v1alpha1",
            "kind": "LlamaStackDistribution",
            "metadata": {"name": "lsd", "namespace": ns},
            "spec": {"server": {"distribution": {"name": "rh-dev"}}},
            "status": {"phase": "Ready", "serviceURL": format!("{}/", state.url)}
        }]
    }))
    .into_response()
}

async fn list_token_policies(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    headers: HeaderMap,
) -> Response {
    let seen = state.record(
        "GET",
        format!("/apis/kuadrant.io/v1alpha1/namespaces/{}/tokenratelimitpolicies", ns),
        &headers,
    );
    if state.is_forbidden(&seen) {
        return forbidden();
    }

    Json(json!({
        "apiVersion": "kuadrant.io/v1alpha1",
        "kind": "TokenRateLimitPolicyList",
        "metadata": {"resourceVersion": "1"},
        "items": [{
            "apiVersion": "kuadrant.io/v1alpha1",
            "kind": "TokenRateLimitPolicy",
            "metadata": {"name": "tier-limits", "namespace": ns},
            "spec": {
                "targetRef": {"group": "gateway.networking.k8s.io", "kind": "Gateway", "name": "maas"},
                "limits": {"free": {"rates": [{"limit": 10000, "window": "1m"}]}}
            }
        }]
    }))
    .into_response()
}

async fn access_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    let seen = state.record(
        "POST",
        "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews".into(),
        &headers,
    );
    if state.is_forbidden(&seen) {
        return forbidden();
    }

    let allowed = state.inner.lock().ssar_allowed;
    body["status"] = json!({"allowed": allowed});
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.record("GET", "/v1/models".into(), &headers);
    Json(json!({
        "object": "list",
        "data": [{"id": "llama-3", "object": "model", "created": 1, "owned_by": "rh"}]
    }))
    .into_response()
}

/// Base cluster config pointing at the fake, carrying no credentials
pub fn base_config(url: &str) -> kube::Config {
    kube::Config::new(url.parse().unwrap())
}
