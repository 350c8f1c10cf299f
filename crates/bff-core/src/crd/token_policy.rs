//! TokenRateLimitPolicy CRD (read-only view)

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Token-based rate limits attached to a gateway route
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kuadrant.io",
    version = "v1alpha1",
    kind = "TokenRateLimitPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TokenRateLimitPolicySpec {
    /// Resource the policy attaches to
    pub target_ref: PolicyTargetRef,

    /// Named limits, e.g. per tier
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, RateLimit>,
}

/// Gateway API policy attachment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetRef {
    /// API group of the target
    pub group: String,
    /// Kind of the target
    pub kind: String,
    /// Name of the target
    pub name: String,
}

/// One named limit
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    /// Token budgets per window
    #[serde(default)]
    pub rates: Vec<RateLimitWindow>,
}

/// Token budget over a time window
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    /// Tokens allowed per window
    pub limit: i64,
    /// Window length, e.g. `1m`
    pub window: String,
}
