//! Per-request context
//!
//! The pipeline stores the identity, scoped client, trace id, trace span and
//! deadline in the request extensions. Each is wrapped in a private key type,
//! so only this module can insert or read them; a value of the same inner
//! type stored by another layer never satisfies a lookup.
//!
//! Handlers read the context through the extractors at the bottom of this
//! module. A missing value means the pipeline was not attached and surfaces as
//! [`Error::InvalidState`].

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::Extensions;
use tracing::Span;

use crate::client::ScopedClient;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::identity::Identity;

#[derive(Clone)]
struct IdentityKey(Identity);

#[derive(Clone)]
struct ScopedClientKey(Arc<dyn ScopedClient>);

#[derive(Clone)]
struct TraceIdKey(String);

#[derive(Clone)]
struct TraceLoggerKey(Span);

#[derive(Clone, Copy)]
struct DeadlineKey(Deadline);

/// Store the validated identity
pub fn insert_identity(extensions: &mut Extensions, identity: Identity) {
    extensions.insert(IdentityKey(identity));
}

/// Store the identity's scoped client
pub fn insert_scoped_client(extensions: &mut Extensions, client: Arc<dyn ScopedClient>) {
    extensions.insert(ScopedClientKey(client));
}

/// Store the trace id and the span carrying it
pub fn insert_trace(extensions: &mut Extensions, trace_id: String, span: Span) {
    extensions.insert(TraceIdKey(trace_id));
    extensions.insert(TraceLoggerKey(span));
}

/// Store the request deadline
pub fn insert_deadline(extensions: &mut Extensions, deadline: Deadline) {
    extensions.insert(DeadlineKey(deadline));
}

/// The validated identity
pub fn identity(extensions: &Extensions) -> Result<&Identity> {
    extensions
        .get::<IdentityKey>()
        .map(|key| &key.0)
        .ok_or_else(|| Error::InvalidState("no identity in request context".into()))
}

/// The identity's scoped client
pub fn scoped_client(extensions: &Extensions) -> Result<Arc<dyn ScopedClient>> {
    extensions
        .get::<ScopedClientKey>()
        .map(|key| key.0.clone())
        .ok_or_else(|| Error::InvalidState("no scoped client in request context".into()))
}

/// The request trace id
pub fn trace_id(extensions: &Extensions) -> Result<&str> {
    extensions
        .get::<TraceIdKey>()
        .map(|key| key.0.as_str())
        .ok_or_else(|| Error::InvalidState("no trace id in request context".into()))
}

/// The request span
pub fn trace_logger(extensions: &Extensions) -> Result<&Span> {
    extensions
        .get::<TraceLoggerKey>()
        .map(|key| &key.0)
        .ok_or_else(|| Error::InvalidState("no trace logger in request context".into()))
}

/// The request deadline
pub fn deadline(extensions: &Extensions) -> Result<Deadline> {
    extensions
        .get::<DeadlineKey>()
        .map(|key| key.0)
        .ok_or_else(|| Error::InvalidState("no deadline in request context".into()))
}

/// Extractor for the validated identity
#[derive(Clone, Debug)]
pub struct RequestIdentity(pub Identity);

/// Extractor for the scoped client
#[derive(Clone)]
pub struct RequestClient(pub Arc<dyn ScopedClient>);

/// Extractor for the trace id
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

/// Extractor for the request span
#[derive(Clone, Debug)]
pub struct TraceLogger(pub Span);

/// Extractor for the request deadline
#[derive(Clone, Copy, Debug)]
pub struct RequestDeadline(pub Deadline);

impl<S: Send + Sync> FromRequestParts<S> for RequestIdentity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        identity(&parts.extensions).cloned().map(Self)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestClient {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        scoped_client(&parts.extensions).map(Self)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for TraceId {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        trace_id(&parts.extensions).map(|id| Self(id.to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for TraceLogger {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        trace_logger(&parts.extensions).cloned().map(Self)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestDeadline {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        deadline(&parts.extensions).map(Self)
    }
}
