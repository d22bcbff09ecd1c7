//! The shared cache store: bounded capacity, expired-first eviction.
//!
//! One `CacheManager` exists per (scope, id) pair, owned by the
//! [`MediationRegistry`](crate::context::MediationRegistry) and shared by
//! every mediation thread that resolves the same key. All operations take
//! the instance's single mutex, so the capacity check and the insert are one
//! atomic step — two threads cannot both observe "not full" and push the
//! store over its bound.
//!
//! Eviction policy: when an insert finds the store at capacity, expired
//! entries are purged first; if the store is still full of live entries the
//! insert is refused. Live entries are never evicted to make room —
//! bounded memory takes priority over hit rate. (Deliberate; see DESIGN.md
//! before "fixing" this with LRU.)

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use super::digest::RequestDigest;
use super::entry::CachedResponse;
use crate::telemetry;
use crate::{HeimdallrError, Result};

/// Default maximum number of in-memory entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Bounded, thread-safe store of cached responses keyed by request digest.
pub struct CacheManager {
    capacity: usize,
    entries: Mutex<HashMap<RequestDigest, CachedResponse>>,
}

impl CacheManager {
    /// Create a store bounded at `capacity` entries.
    ///
    /// A zero capacity is promoted to 1 — a cache that can hold nothing
    /// would turn every request path into a refused insert.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up the entry for `key`.
    ///
    /// Returns a snapshot clone; reading never mutates expiry state. Callers
    /// check staleness on the returned entry themselves.
    pub fn lookup(&self, key: &RequestDigest) -> Option<CachedResponse> {
        self.entries.lock().expect("cache store poisoned").get(key).cloned()
    }

    /// Insert `entry` under `key`, or overwrite an existing entry.
    ///
    /// At capacity, expired entries are purged first; if every slot still
    /// holds a live entry the insert is refused with
    /// [`HeimdallrError::CacheFull`]. Overwriting an existing key never
    /// counts against capacity.
    pub fn put(&self, key: RequestDigest, entry: CachedResponse) -> Result<()> {
        let mut entries = self.entries.lock().expect("cache store poisoned");
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let purged = Self::purge_expired_locked(&mut entries);
            if purged > 0 {
                debug!(purged, "purged expired cache entries under capacity pressure");
            }
            if entries.len() >= self.capacity {
                return Err(HeimdallrError::CacheFull);
            }
        }
        entries.insert(key, entry);
        Ok(())
    }

    /// Apply `f` to the entry for `key` under the store lock.
    ///
    /// Returns whether the entry existed. This is the response path's
    /// read-modify-write: attaching a payload is atomic with respect to
    /// concurrent lookups and evictions.
    pub fn update<F>(&self, key: &RequestDigest, f: F) -> bool
    where
        F: FnOnce(&mut CachedResponse),
    {
        let mut entries = self.entries.lock().expect("cache store poisoned");
        match entries.get_mut(key) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `key`.
    pub fn remove(&self, key: &RequestDigest) -> Option<CachedResponse> {
        self.entries.lock().expect("cache store poisoned").remove(key)
    }

    /// Force-expire the entry for `key` without removing it.
    ///
    /// Returns whether the entry existed.
    pub fn mark_expired(&self, key: &RequestDigest) -> bool {
        self.update(key, CachedResponse::expire)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache store poisoned");
        Self::purge_expired_locked(&mut entries)
    }

    /// Number of entries currently stored (live and expired alike).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.lock().expect("cache store poisoned").clear();
    }

    fn purge_expired_locked(entries: &mut HashMap<RequestDigest, CachedResponse>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let purged = before - entries.len();
        if purged > 0 {
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(purged as u64);
        }
        purged
    }
}
