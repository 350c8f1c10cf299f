//! Request pipeline: trace, deadline, authenticate
//!
//! Within one request the order is fixed: a trace id and span are attached,
//! the deadline starts, the identity is extracted and validated, the scoped
//! client is looked up, and only then does the handler run. Any failure ends
//! the request with the generic error response for its status.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::{from_fn, from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::client::{ClientFactory, ScopedClient};
use crate::context;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::identity::Identity;

/// Header carrying an inbound request id, echoed on the response
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Budget used when no deadline layer ran
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const MAX_REQUEST_ID_LEN: usize = 128;

/// Attach a trace id and a span to the request
///
/// A well-formed inbound `X-Request-Id` is reused; otherwise a UUID is minted.
pub async fn trace_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path()
    );
    context::insert_trace(request.extensions_mut(), trace_id.clone(), span.clone());

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

/// Start the request deadline and enforce it on everything downstream
pub async fn deadline_middleware(
    State(budget): State<Duration>,
    mut request: Request,
    next: Next,
) -> Response {
    let deadline = Deadline::after(budget);
    context::insert_deadline(request.extensions_mut(), deadline);

    match deadline
        .run("request", async move { Ok(next.run(request).await) })
        .await
    {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Extract, validate and scope the caller, then store the results in context
pub async fn auth_middleware(
    State(factory): State<Arc<dyn ClientFactory>>,
    mut request: Request,
    next: Next,
) -> Response {
    let deadline = context::deadline(request.extensions())
        .unwrap_or_else(|_| Deadline::after(DEFAULT_REQUEST_TIMEOUT));

    match authenticate(factory.as_ref(), request.headers(), deadline).await {
        Ok((identity, client)) => {
            debug!(client = %client.identity_label(), "Request authenticated");
            context::insert_identity(request.extensions_mut(), identity);
            context::insert_scoped_client(request.extensions_mut(), client);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Run extract, validate and get for one request
pub async fn authenticate(
    factory: &dyn ClientFactory,
    headers: &HeaderMap,
    deadline: Deadline,
) -> Result<(Identity, Arc<dyn ScopedClient>)> {
    let identity = factory.extract(headers)?;
    if !identity.is_anonymous() {
        factory.validate(&identity, deadline).await?;
    }
    let client = factory.get(&identity, deadline).await?;
    Ok((identity, client))
}

/// Wrap `router` in the full pipeline
///
/// Layers run outermost first: trace, deadline, auth.
pub fn attach<S>(
    router: Router<S>,
    factory: Arc<dyn ClientFactory>,
    request_timeout: Duration,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(from_fn_with_state(factory, auth_middleware))
        .layer(from_fn_with_state(request_timeout, deadline_middleware))
        .layer(from_fn(trace_middleware))
}
