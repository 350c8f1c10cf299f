//! DataSciencePipelinesApplication CRD (read-only view)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A pipeline server deployed in a namespace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "datasciencepipelinesapplications.opendatahub.io",
    version = "v1",
    kind = "DataSciencePipelinesApplication",
    namespaced,
    status = "DataSciencePipelinesApplicationStatus",
    shortname = "dspa"
)]
#[serde(rename_all = "camelCase")]
pub struct DataSciencePipelinesApplicationSpec {
    /// Pipelines engine version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsp_version: Option<String>,

    /// Whether pod-to-pod traffic uses TLS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_to_pod_tls: Option<bool>,
}

/// Observed state of a pipeline server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataSciencePipelinesApplicationStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PipelineCondition>,
}

/// One status condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCondition {
    /// Condition type, e.g. `Ready`
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DataSciencePipelinesApplication {
    /// Whether the `Ready` condition is `True`
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }
}
