//! Custom resources read by the BFF
//!
//! Distributions back inference lookups, pipeline applications and token
//! rate-limit policies are listed per namespace for the UI.
//!
//! Every custom resource the scoped clients list is a typed `kube` resource
//! defined here. A resource missing from this module cannot be listed, which
//! turns a would-be runtime type-registration failure into a compile error.

mod llama_stack;
mod pipelines;
mod token_policy;

pub use llama_stack::{
    DistributionContainer, DistributionPhase, DistributionRef, DistributionServer,
    LlamaStackDistribution, LlamaStackDistributionSpec, LlamaStackDistributionStatus,
};
pub use pipelines::{
    DataSciencePipelinesApplication, DataSciencePipelinesApplicationSpec,
    DataSciencePipelinesApplicationStatus, PipelineCondition,
};
pub use token_policy::{
    PolicyTargetRef, RateLimit, RateLimitWindow, TokenRateLimitPolicy, TokenRateLimitPolicySpec,
};
