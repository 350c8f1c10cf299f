//! BFF Core
//!
//! Identity-scoped upstream access for a backend-for-frontend server. Every
//! call the server makes to the cluster API or to an inference service runs
//! with the credentials of the end user who sent the request, never with the
//! server's own service account.
//!
//! # Request pipeline
//!
//! ```text
//! request ──► trace ──► deadline ──► extract ──► validate ──► scoped client ──► handler
//!                                    (header)    (user-info)   (registry)
//! ```
//!
//! # Backends
//!
//! - `real` - bearer-token scoped clients against a live cluster
//! - `envtest` - fake tokens mapped to impersonated test users
//! - `stub` - canned data, no cluster at all

#![deny(missing_docs)]

pub mod capability;
pub mod client;
pub mod config;
pub mod context;
pub mod crd;
pub mod deadline;
pub mod error;
pub mod extract;
pub mod identity;
pub mod inference;
pub mod middleware;
pub mod retry;
pub mod tls;
pub mod validator;

pub use capability::{CapabilityGate, ResourceAttributes, Verdict};
pub use client::{build_factory, ClientFactory, ScopedClient};
pub use config::FactoryConfig;
pub use deadline::Deadline;
pub use error::{Error, Result};
pub use identity::{Identity, RedactedToken};
