//! Client-side memoization of discovery results with bounded staleness.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    core::{
        CoreResult,
        clock::{Clock, SystemClock},
        instance::ServiceInstance,
    },
    ports::discovery::DiscoverySource,
};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct CacheEntry {
    instances: Vec<ServiceInstance>,
    fetched_at: u64,
}

/// Wraps a [`DiscoverySource`] and serves its answers for up to `ttl`.
///
/// A stale or missing entry triggers a synchronous fetch. A failed fetch is
/// returned to the caller as-is; the stale entry is neither used nor evicted.
/// Concurrent refreshes of the same application are not coalesced, the last
/// successful fetch wins.
pub struct DiscoveryCache {
    source: Arc<dyn DiscoverySource>,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    entries: scc::HashMap<String, CacheEntry>,
}

impl DiscoveryCache {
    pub fn new(source: Arc<dyn DiscoverySource>, ttl: Duration) -> Self {
        Self::with_clock(source, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn DiscoverySource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            ttl_ms: ttl.as_millis().try_into().unwrap_or(u64::MAX),
            clock,
            entries: scc::HashMap::new(),
        }
    }

    pub async fn resolve(&self, app_name: &str) -> CoreResult<Vec<ServiceInstance>> {
        let now = self.clock.now_millis();
        let cached = self
            .entries
            .get_async(app_name)
            .await
            .map(|entry| entry.get().clone());

        if let Some(entry) = cached
            && now.saturating_sub(entry.fetched_at) < self.ttl_ms
        {
            tracing::trace!(app = app_name, "Discovery cache hit");
            return Ok(entry.instances);
        }

        tracing::debug!(app = app_name, "Refreshing discovery cache");
        let instances = self.source.discover(app_name).await?;
        let fresh = CacheEntry {
            instances: instances.clone(),
            fetched_at: self.clock.now_millis(),
        };
        match self.entries.entry_async(app_name.to_string()).await {
            scc::hash_map::Entry::Occupied(mut o) => *o.get_mut() = fresh,
            scc::hash_map::Entry::Vacant(v) => {
                v.insert_entry(fresh);
            }
        }
        Ok(instances)
    }

    /// Drop the cached entry for `app_name`, forcing the next resolve to fetch.
    pub async fn invalidate(&self, app_name: &str) {
        self.entries.remove_async(app_name).await;
    }
}

#[async_trait]
impl DiscoverySource for DiscoveryCache {
    async fn discover(&self, app_name: &str) -> CoreResult<Vec<ServiceInstance>> {
        self.resolve(app_name).await
    }
}
