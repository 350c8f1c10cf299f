//! Capability gate: "may this identity do V on R?"
//!
//! Answers come from a `SelfSubjectAccessReview` issued with the caller's own
//! scoped client, so the cluster evaluates RBAC for the caller. Allow and deny
//! answers are cached per (identity, attributes) with separate TTLs. A failed
//! review is indeterminate and is never cached.
//!
//! Each cache entry is fresh until its expiry; an expired entry is removed on
//! the next read and the review is issued again. A cached deny never turns
//! into an allow without a new review. Entries nobody reads again are dropped
//! by the task from [`CapabilityGate::spawn_purge_task`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1 as authz;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::client::ScopedClient;
use crate::config::CapabilityCacheConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Wildcard verb/resource used by the cluster-admin check
pub const WILDCARD: &str = "*";

/// Shortest interval between two purge sweeps
pub const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// What an access review asks about
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceAttributes {
    /// Verb, e.g. `list`
    pub verb: String,
    /// API group; empty for the core group
    pub group: String,
    /// API version; empty for any
    pub version: String,
    /// Resource, e.g. `namespaces`
    pub resource: String,
    /// Namespace; empty for cluster scope
    pub namespace: String,
    /// Object name; empty for all
    pub name: String,
}

impl ResourceAttributes {
    /// Attributes for `verb` on `resource` in `group`
    pub fn new(verb: impl Into<String>, group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            group: group.into(),
            resource: resource.into(),
            ..Default::default()
        }
    }

    /// Any verb on any resource in any group
    pub fn cluster_admin() -> Self {
        Self::new(WILDCARD, WILDCARD, WILDCARD)
    }

    /// Restrict to a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Restrict to an API version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Restrict to one named object
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Display for ResourceAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.verb, self.group, self.resource)?;
        if !self.namespace.is_empty() {
            write!(f, " in {}", self.namespace)?;
        }
        if !self.name.is_empty() {
            write!(f, " named {}", self.name)?;
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl From<&ResourceAttributes> for authz::ResourceAttributes {
    fn from(attrs: &ResourceAttributes) -> Self {
        authz::ResourceAttributes {
            verb: non_empty(&attrs.verb),
            group: non_empty(&attrs.group),
            version: non_empty(&attrs.version),
            resource: non_empty(&attrs.resource),
            namespace: non_empty(&attrs.namespace),
            name: non_empty(&attrs.name),
            ..Default::default()
        }
    }
}

/// Issues one access review
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    /// `Ok(allowed)` on a completed review, `Err` on any failure to get one
    async fn review(&self, attributes: &ResourceAttributes, deadline: Deadline) -> Result<bool>;
}

#[async_trait]
impl<T: ScopedClient + ?Sized> AccessReviewer for T {
    async fn review(&self, attributes: &ResourceAttributes, deadline: Deadline) -> Result<bool> {
        self.self_access_review(attributes, deadline).await
    }
}

/// Outcome of a capability check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The identity may perform the action
    Allow,
    /// The identity may not perform the action
    Deny,
    /// No review could be completed
    Indeterminate,
}

impl Verdict {
    /// Whether this verdict permits the action
    pub fn is_allowed(self) -> bool {
        self == Verdict::Allow
    }
}

struct CachedVerdict {
    allowed: bool,
    expires_at: Instant,
}

type CacheKey = (String, ResourceAttributes);

/// Cached access-review front end
pub struct CapabilityGate {
    config: CapabilityCacheConfig,
    retry: RetryConfig,
    cache: Mutex<HashMap<CacheKey, CachedVerdict>>,
}

impl CapabilityGate {
    /// Gate with the given TTLs and the default backoff policy
    pub fn new(config: CapabilityCacheConfig) -> Self {
        Self::with_retry(config, RetryConfig::default())
    }

    /// Gate with an explicit backoff policy for transient review failures
    pub fn with_retry(config: CapabilityCacheConfig, retry: RetryConfig) -> Self {
        Self {
            config,
            retry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// May `identity` perform `attributes`?
    ///
    /// Transient failures are retried with backoff within `deadline`; a
    /// review that still fails is [`Verdict::Indeterminate`].
    pub async fn may_i<R>(
        &self,
        identity: &Identity,
        reviewer: &R,
        attributes: &ResourceAttributes,
        deadline: Deadline,
    ) -> Verdict
    where
        R: AccessReviewer + ?Sized,
    {
        let key = (identity.fingerprint(), attributes.clone());

        if let Some(allowed) = self.cached(&key) {
            debug!(attributes = %attributes, allowed, "Capability cache hit");
            return verdict(allowed);
        }

        let outcome = deadline
            .run(
                "access review",
                retry_with_backoff(
                    &self.retry,
                    "self_access_review",
                    |e: &Error| e.is_transient(),
                    || reviewer.review(attributes, deadline),
                ),
            )
            .await;

        match outcome {
            Ok(allowed) => {
                let ttl = if allowed {
                    self.config.allow_ttl
                } else {
                    self.config.deny_ttl
                };
                self.cache.lock().insert(
                    key,
                    CachedVerdict {
                        allowed,
                        expires_at: Instant::now() + ttl,
                    },
                );
                debug!(attributes = %attributes, allowed, "Access review completed");
                verdict(allowed)
            }
            Err(e) => {
                error!(attributes = %attributes, error = %e, "Access review failed");
                Verdict::Indeterminate
            }
        }
    }

    /// Like [`may_i`](Self::may_i) but as a `Result`
    ///
    /// Deny becomes [`Error::Forbidden`] and indeterminate becomes
    /// [`Error::Internal`].
    pub async fn require<R>(
        &self,
        identity: &Identity,
        reviewer: &R,
        attributes: &ResourceAttributes,
        deadline: Deadline,
    ) -> Result<()>
    where
        R: AccessReviewer + ?Sized,
    {
        match self.may_i(identity, reviewer, attributes, deadline).await {
            Verdict::Allow => Ok(()),
            Verdict::Deny => Err(Error::Forbidden(format!("not allowed to {}", attributes))),
            Verdict::Indeterminate => Err(Error::Internal(format!(
                "access review for {} indeterminate",
                attributes
            ))),
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<bool> {
        let mut cache = self.cache.lock();
        let entry = cache.get(key)?;
        if Instant::now() < entry.expires_at {
            return Some(entry.allowed);
        }
        cache.remove(key);
        None
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, entry| now < entry.expires_at);
        before - cache.len()
    }

    /// Interval between purge sweeps: the longer TTL, at least one second
    pub fn purge_interval(&self) -> Duration {
        self.config
            .allow_ttl
            .max(self.config.deny_ttl)
            .max(MIN_PURGE_INTERVAL)
    }

    /// Sweep expired verdicts every [`purge_interval`](Self::purge_interval)
    ///
    /// The task holds a weak reference and exits once the gate is dropped.
    pub fn spawn_purge_task(gate: &Arc<Self>) -> JoinHandle<()> {
        let period = gate.purge_interval();
        let gate = Arc::downgrade(gate);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(gate) = gate.upgrade() else {
                    debug!("Capability gate dropped, stopping purge task");
                    return;
                };
                let purged = gate.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = gate.len(), "Purged expired capability verdicts");
                }
            }
        })
    }

    /// Number of cached verdicts, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

fn verdict(allowed: bool) -> Verdict {
    if allowed {
        Verdict::Allow
    } else {
        Verdict::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RedactedToken;
    use std::time::Duration;

    fn alice() -> Identity {
        Identity::with_token(RedactedToken::new("alice"))
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    fn reviewer(allowed: bool, times: usize) -> MockAccessReviewer {
        let mut reviewer = MockAccessReviewer::new();
        reviewer
            .expect_review()
            .times(times)
            .returning(move |_, _| Ok(allowed));
        reviewer
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_within_ttl_is_cached() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let reviewer = reviewer(true, 1);
        let attrs = ResourceAttributes::cluster_admin();

        assert_eq!(gate.may_i(&alice(), &reviewer, &attrs, deadline()).await, Verdict::Allow);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(gate.may_i(&alice(), &reviewer, &attrs, deadline()).await, Verdict::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reissues_review() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let reviewer = reviewer(false, 2);
        let attrs = ResourceAttributes::cluster_admin();

        assert_eq!(gate.may_i(&alice(), &reviewer, &attrs, deadline()).await, Verdict::Deny);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(gate.may_i(&alice(), &reviewer, &attrs, deadline()).await, Verdict::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_and_deny_ttls_independent() {
        let gate = CapabilityGate::new(CapabilityCacheConfig {
            allow_ttl: Duration::from_secs(30),
            deny_ttl: Duration::from_secs(2),
        });
        let list = ResourceAttributes::new("list", "", "namespaces");
        let delete = ResourceAttributes::new("delete", "", "namespaces");

        let mut reviewer = MockAccessReviewer::new();
        reviewer
            .expect_review()
            .withf(|attrs, _| attrs.verb == "list")
            .times(1)
            .returning(|_, _| Ok(true));
        reviewer
            .expect_review()
            .withf(|attrs, _| attrs.verb == "delete")
            .times(2)
            .returning(|_, _| Ok(false));

        gate.may_i(&alice(), &reviewer, &list, deadline()).await;
        gate.may_i(&alice(), &reviewer, &delete, deadline()).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(gate.may_i(&alice(), &reviewer, &list, deadline()).await, Verdict::Allow);
        assert_eq!(gate.may_i(&alice(), &reviewer, &delete, deadline()).await, Verdict::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_keyed_by_identity() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let reviewer = reviewer(true, 2);
        let attrs = ResourceAttributes::cluster_admin();
        let bob = Identity::with_token(RedactedToken::new("bob"));

        gate.may_i(&alice(), &reviewer, &attrs, deadline()).await;
        gate.may_i(&bob, &reviewer, &attrs, deadline()).await;
        assert_eq!(gate.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_keyed_by_namespace() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let reviewer = reviewer(true, 2);
        let base = ResourceAttributes::new("list", "llamastack.io", "llamastackdistributions");

        gate.may_i(&alice(), &reviewer, &base.clone().in_namespace("a"), deadline())
            .await;
        gate.may_i(&alice(), &reviewer, &base.in_namespace("b"), deadline())
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_indeterminate() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let mut reviewer = MockAccessReviewer::new();
        reviewer
            .expect_review()
            .times(5)
            .returning(|_, _| Err(Error::UpstreamUnreachable("503".into())));

        let verdict = gate
            .may_i(&alice(), &reviewer, &ResourceAttributes::cluster_admin(), deadline())
            .await;
        assert_eq!(verdict, Verdict::Indeterminate);
        assert!(gate.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let mut reviewer = MockAccessReviewer::new();
        let mut seq = mockall::Sequence::new();
        reviewer
            .expect_review()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::Timeout("slow".into())));
        reviewer
            .expect_review()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(true));

        let verdict = gate
            .may_i(&alice(), &reviewer, &ResourceAttributes::cluster_admin(), deadline())
            .await;
        assert_eq!(verdict, Verdict::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let mut reviewer = MockAccessReviewer::new();
        reviewer
            .expect_review()
            .times(1)
            .returning(|_, _| Err(Error::Unauthorized("expired".into())));

        let verdict = gate
            .may_i(&alice(), &reviewer, &ResourceAttributes::cluster_admin(), deadline())
            .await;
        assert_eq!(verdict, Verdict::Indeterminate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_maps_verdicts() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let attrs = ResourceAttributes::cluster_admin();

        let deny = reviewer(false, 1);
        assert!(matches!(
            gate.require(&alice(), &deny, &attrs, deadline()).await,
            Err(Error::Forbidden(_))
        ));

        let mut failing = MockAccessReviewer::new();
        failing
            .expect_review()
            .returning(|_, _| Err(Error::Internal("boom".into())));
        let bob = Identity::with_token(RedactedToken::new("bob"));
        assert!(matches!(
            gate.require(&bob, &failing, &attrs, deadline()).await,
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let gate = CapabilityGate::new(CapabilityCacheConfig::default());
        let reviewer = reviewer(true, 2);

        gate.may_i(&alice(), &reviewer, &ResourceAttributes::cluster_admin(), deadline())
            .await;
        tokio::time::advance(Duration::from_secs(5)).await;
        gate.may_i(
            &alice(),
            &reviewer,
            &ResourceAttributes::new("list", "", "namespaces"),
            deadline(),
        )
        .await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(gate.purge_expired(), 1);
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_purge_interval_follows_longest_ttl() {
        let gate = CapabilityGate::new(CapabilityCacheConfig {
            allow_ttl: Duration::from_secs(30),
            deny_ttl: Duration::from_secs(5),
        });
        assert_eq!(gate.purge_interval(), Duration::from_secs(30));

        let gate = CapabilityGate::new(CapabilityCacheConfig {
            allow_ttl: Duration::ZERO,
            deny_ttl: Duration::ZERO,
        });
        assert_eq!(gate.purge_interval(), MIN_PURGE_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_sheds_rotated_identities() {
        let gate = Arc::new(CapabilityGate::new(CapabilityCacheConfig::default()));
        let reviewer = reviewer(true, 1000);
        let attrs = ResourceAttributes::cluster_admin();
        let task = CapabilityGate::spawn_purge_task(&gate);

        for i in 0..1000 {
            let identity = Identity::with_token(RedactedToken::new(format!("rotated-{}", i)));
            gate.may_i(&identity, &reviewer, &attrs, deadline()).await;
        }
        assert_eq!(gate.len(), 1000);

        tokio::time::advance(Duration::from_secs(25)).await;
        for _ in 0..10 {
            if gate.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(gate.is_empty());

        drop(gate);
        tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .expect("purge task should stop once the gate is dropped")
            .unwrap();
    }

    #[test]
    fn test_k8s_attributes_omit_empty_fields() {
        let attrs: authz::ResourceAttributes =
            (&ResourceAttributes::new("list", "", "namespaces")).into();
        assert_eq!(attrs.verb.as_deref(), Some("list"));
        assert_eq!(attrs.resource.as_deref(), Some("namespaces"));
        assert!(attrs.group.is_none());
        assert!(attrs.namespace.is_none());

        let admin: authz::ResourceAttributes = (&ResourceAttributes::cluster_admin()).into();
        assert_eq!(admin.verb.as_deref(), Some("*"));
        assert_eq!(admin.group.as_deref(), Some("*"));
        assert_eq!(admin.resource.as_deref(), Some("*"));
    }
}
