//! LlamaStackDistribution CRD
//!
//! A distribution is one deployment of the inference service in a namespace.
//! Its status advertises the in-cluster URL the service is reachable on.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of an inference-service deployment
///
/// Example:
/// ```yaml
/// apiVersion: llamastack.io/v1alpha1
/// kind: LlamaStackDistribution
/// metadata:
///   name: lsd-genai-playground
///   namespace: team-a
/// spec:
///   replicas: 1
///   server:
///     distribution:
///       name: rh-dev
///     containerSpec:
///       port: 8321
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "llamastack.io",
    version = "v1alpha1",
    kind = "LlamaStackDistribution",
    namespaced,
    status = "LlamaStackDistributionStatus",
    shortname = "llsd",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LlamaStackDistributionSpec {
    /// Number of server replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Server configuration
    #[serde(default)]
    pub server: DistributionServer,
}

/// Server section of a distribution
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionServer {
    /// Which distribution image to run
    #[serde(default)]
    pub distribution: DistributionRef,

    /// Container overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<DistributionContainer>,
}

/// Named distribution or explicit image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRef {
    /// Distribution name from the operator's catalogue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Explicit container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Container overrides for the server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionContainer {
    /// Port the server listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// Observed state of a distribution
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlamaStackDistributionStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: DistributionPhase,

    /// In-cluster base URL of the service
    #[serde(rename = "serviceURL", default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,

    /// Server version reported by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Distribution lifecycle phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DistributionPhase {
    /// Created, not yet reconciled
    #[default]
    Pending,
    /// Being rolled out
    Initializing,
    /// Serving traffic
    Ready,
    /// Reconciliation failed
    Failed,
    /// Being deleted
    Terminating,
}

impl LlamaStackDistribution {
    /// Service URL, when the distribution is ready to serve
    pub fn ready_service_url(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        if status.phase != DistributionPhase::Ready {
            return None;
        }
        status.service_url.as_deref().filter(|u| !u.is_empty())
    }
}
