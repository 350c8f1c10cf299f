//! Error types for the BFF core
//!
//! Every failure the core can surface maps to exactly one HTTP status. The
//! response body only ever carries a fixed, generic message for that status;
//! the detail string inside each variant is for logs and is never sent to the
//! client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

/// Result type for BFF core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for BFF core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credentials were presented on the configured header
    #[error("missing credentials")]
    MissingCredentials,

    /// Credentials were presented but could not be parsed
    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),

    /// The identity provider rejected the token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A test-environment token has no configured user mapping
    #[error("unknown test identity")]
    UnknownTestIdentity,

    /// The identity is not allowed to perform the action
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An upstream returned 5xx or could not be reached
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// An upstream call exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Client construction failed (TLS bundle, kube config, HTTP client)
    #[error("configuration error: {0}")]
    Config(String),

    /// A request reached a handler without the state the pipeline should have attached
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A requested upstream resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else, including indeterminate capability checks
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify an upstream HTTP status code
    ///
    /// `context` names the upstream call for logging; it never reaches the client.
    pub fn from_status(status: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            401 => Error::Unauthorized(context),
            403 => Error::Forbidden(context),
            404 => Error::NotFound(context),
            408 | 504 => Error::Timeout(context),
            500..=599 => Error::UpstreamUnreachable(context),
            _ => Error::Internal(format!("{} (status {})", context, status)),
        }
    }

    /// HTTP status this error surfaces as
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingCredentials
            | Error::MalformedCredentials(_)
            | Error::Unauthorized(_)
            | Error::UnknownTestIdentity => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Config(_) | Error::InvalidState(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Generic message sent to the client in place of the internal detail
    pub fn public_message(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "authentication required",
            StatusCode::FORBIDDEN => "access denied",
            StatusCode::NOT_FOUND => "resource not found",
            StatusCode::BAD_GATEWAY => "upstream service unavailable",
            StatusCode::GATEWAY_TIMEOUT => "upstream request timed out",
            _ => "internal server error",
        }
    }

    /// Whether a retry of the failing operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::UpstreamUnreachable(_) | Error::Timeout(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = serde_json::json!({
            "error": {
                "code": status.as_u16().to_string(),
                "message": self.public_message(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => Error::from_status(resp.code, resp.message),
            kube::Error::InferConfig(e) => Error::Config(e.to_string()),
            kube::Error::Auth(e) => Error::Config(e.to_string()),
            kube::Error::SerdeError(e) => Error::Internal(e.to_string()),
            other => Error::UpstreamUnreachable(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Strip the URL so query strings never end up in logs
        let e = e.without_url();
        if e.is_timeout() {
            return Error::Timeout(e.to_string());
        }
        if let Some(status) = e.status() {
            return Error::from_status(status.as_u16(), e.to_string());
        }
        if e.is_builder() {
            return Error::Config(e.to_string());
        }
        Error::UpstreamUnreachable(e.to_string())
    }
}
