//! Address-to-instance cache warmed from lifecycle events.
//!
//! Purely an optimization for the floating-IP resolution path: a miss (or a
//! stale hit) falls back to the live control-plane scan, so correctness
//! never depends on this cache. Entries are invalidated on instance
//! deletion and dropped wholesale when the bus reconnects, since events may
//! have been missed in between.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

use crate::metrics;

/// A cached instance identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedInstance {
    /// Instance identifier in the control plane.
    pub id: String,
    /// Instance hostname.
    pub hostname: String,
}

/// Thread-safe map of (project id, fixed address) to instance identity.
#[derive(Debug, Clone, Default)]
pub struct AddressCache {
    inner: Arc<RwLock<HashMap<(String, Ipv4Addr), CachedInstance>>>,
}

impl AddressCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the address mapping observed in a create event.
    pub fn insert(&self, project_id: &str, address: Ipv4Addr, instance: CachedInstance) {
        let mut inner = self.inner.write();
        debug!(project_id, %address, instance_id = %instance.id, "caching address mapping");
        inner.insert((project_id.to_string(), address), instance);
        metrics::record_cache_size(inner.len());
    }

    /// Look up the instance last seen at this address within a project.
    pub fn lookup(&self, project_id: &str, address: Ipv4Addr) -> Option<CachedInstance> {
        self.inner
            .read()
            .get(&(project_id.to_string(), address))
            .cloned()
    }

    /// Drop a single stale entry.
    pub fn remove(&self, project_id: &str, address: Ipv4Addr) {
        let mut inner = self.inner.write();
        if inner.remove(&(project_id.to_string(), address)).is_some() {
            debug!(project_id, %address, "evicted stale address mapping");
            metrics::record_cache_size(inner.len());
        }
    }

    /// Drop every entry for the given hostname within a project.
    pub fn remove_hostname(&self, project_id: &str, hostname: &str) {
        let mut inner = self.inner.write();
        inner.retain(|(pid, _), cached| pid != project_id || cached.hostname != hostname);
        metrics::record_cache_size(inner.len());
    }

    /// Drop everything (after a bus reconnect).
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.clear();
        debug!("cleared address cache");
        metrics::record_cache_size(0);
    }

    /// Number of cached mappings.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
