//! OpenAI-compatible inference-service client
//!
//! Thin reqwest wrapper over the four operations the BFF uses. The caller's
//! bearer token is forwarded when the identity carries one.

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::identity::RedactedToken;

use super::locator::InferenceEndpoint;

/// A model served by the inference service
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Model {
    /// Model identifier
    pub id: String,
    /// Object type, `model`
    #[serde(default)]
    pub object: String,
    /// Creation time (unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    /// Owning provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<Model>,
}

/// Body of `POST /v1/responses`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResponseRequest {
    /// Model to run
    pub model: String,
    /// Prompt or structured input
    pub input: serde_json::Value,
    /// System instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Tool definitions passed through unchanged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Serialize)]
struct TokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<String>,
}

/// A short-lived token issued by the inference service
#[derive(Clone, Debug)]
pub struct IssuedToken {
    /// The token itself
    pub token: RedactedToken,
    /// Expiry as reported by the service
    pub expires_at: Option<String>,
}

/// Inference client bound to one identity and one endpoint
#[derive(Clone, Debug)]
pub struct InferenceClient {
    base_url: String,
    http: reqwest::Client,
    token: Option<RedactedToken>,
}

impl InferenceClient {
    /// Build a client for `endpoint` that forwards `token`
    pub fn new(endpoint: &InferenceEndpoint, token: Option<RedactedToken>) -> Result<Self> {
        let http = endpoint
            .tls
            .apply_to_reqwest(reqwest::Client::builder())?
            .build()
            .map_err(|e| Error::Config(format!("failed to create inference client: {}", e)))?;

        Ok(Self {
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            http,
            token,
        })
    }

    /// Base URL requests go to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose()),
            None => builder,
        }
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(operation = %operation, status = status.as_u16(), "Inference call succeeded");
            return Ok(response);
        }

        let body_len = response.bytes().await.map(|b| b.len()).unwrap_or(0);
        warn!(
            operation = %operation,
            status = status.as_u16(),
            body_len,
            "Inference call failed"
        );
        Err(Error::from_status(
            status.as_u16(),
            format!("inference {} returned {}", operation, status.as_u16()),
        ))
    }

    /// `GET /v1/models`
    pub async fn list_models(&self, deadline: Deadline) -> Result<Vec<Model>> {
        deadline
            .run("list models", async {
                let response = self
                    .send("list_models", self.request(Method::GET, "/v1/models"))
                    .await?;
                Ok(response.json::<ModelList>().await?.data)
            })
            .await
    }

    /// `POST /v1/responses`
    pub async fn create_response(
        &self,
        request: &ResponseRequest,
        deadline: Deadline,
    ) -> Result<serde_json::Value> {
        deadline
            .run("create response", async {
                let response = self
                    .send(
                        "create_response",
                        self.request(Method::POST, "/v1/responses").json(request),
                    )
                    .await?;
                Ok(response.json::<serde_json::Value>().await?)
            })
            .await
    }

    /// `POST /v1/tokens`
    pub async fn issue_token(
        &self,
        ttl: Option<Duration>,
        deadline: Deadline,
    ) -> Result<IssuedToken> {
        let body = TokenRequest {
            ttl_seconds: ttl.map(|t| t.as_secs()),
        };
        deadline
            .run("issue token", async {
                let response = self
                    .send(
                        "issue_token",
                        self.request(Method::POST, "/v1/tokens").json(&body),
                    )
                    .await?;
                let issued: TokenResponse = response.json().await?;
                Ok(IssuedToken {
                    token: RedactedToken::new(issued.token),
                    expires_at: issued.expires_at,
                })
            })
            .await
    }

    /// `DELETE /v1/tokens`
    pub async fn revoke_all_tokens(&self, deadline: Deadline) -> Result<()> {
        deadline
            .run("revoke tokens", async {
                self.send(
                    "revoke_all_tokens",
                    self.request(Method::DELETE, "/v1/tokens"),
                )
                .await?;
                Ok(())
            })
            .await
    }
}
