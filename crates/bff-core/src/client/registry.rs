//! Per-identity client registry
//!
//! Maps an identity fingerprint to the single client issued for it. Lookups
//! and installs take one `parking_lot::Mutex`; construction happens outside
//! the lock. When two callers race to build a client for the same key, the
//! first install wins and the loser receives the installed client.
//!
//! The registry is unbounded unless `max_entries` is set. A bounded registry
//! evicts idle entries first, then the least recently used one, and never
//! evicts an entry that a request is still holding.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ClientRegistryConfig;
use crate::error::Result;

struct Entry<V: ?Sized> {
    value: Arc<V>,
    last_access: Instant,
}

/// Fingerprint-keyed map of shared clients
pub struct ClientRegistry<V: ?Sized> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    config: ClientRegistryConfig,
}

impl<V: ?Sized> ClientRegistry<V> {
    /// Create an empty registry
    pub fn new(config: ClientRegistryConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Return the client for `key`, building it with `build` on first use
    ///
    /// A failed build is returned to the caller and never stored.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: &str, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<V>>>,
    {
        if let Some(existing) = self.lookup(key) {
            return Ok(existing);
        }

        let built = build().await?;

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            // Lost the race; drop ours and hand out the installed one
            entry.last_access = Instant::now();
            return Ok(entry.value.clone());
        }

        if let Some(max) = self.config.max_entries {
            if entries.len() >= max {
                evict_one(&mut entries, self.config.idle_ttl);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: built.clone(),
                last_access: Instant::now(),
            },
        );
        debug!(entries = entries.len(), "Installed client in registry");

        Ok(built)
    }

    fn lookup(&self, key: &str) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();
        entries.get_mut(key).map(|entry| {
            entry.last_access = Instant::now();
            entry.value.clone()
        })
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry holds no clients
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether a client is cached for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Drop the cached client for `key`, returning it if present
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }
}

/// Evict one entry to make room, preferring idle ones
///
/// Entries whose `Arc` is shared outside the registry are in use by a request
/// and are skipped.
fn evict_one<V: ?Sized>(entries: &mut HashMap<String, Entry<V>>, idle_ttl: std::time::Duration) {
    let now = Instant::now();

    let victim = entries
        .iter()
        .filter(|(_, entry)| Arc::strong_count(&entry.value) == 1)
        .min_by_key(|(_, entry)| {
            let idle = now.saturating_duration_since(entry.last_access) >= idle_ttl;
            // Idle entries sort first, then oldest access
            (!idle, entry.last_access)
        })
        .map(|(key, _)| key.clone());

    match victim {
        Some(key) => {
            entries.remove(&key);
            debug!("Evicted client from registry");
        }
        None => warn!(
            entries = entries.len(),
            "Client registry full and every entry is in use, growing past bound"
        ),
    }
}
