//! Cached response entries and their lifecycle.

use std::time::{Duration, Instant};

use super::digest::RequestDigest;

/// One cache slot: a request digest with the response payload that answers
/// it, plus expiry bookkeeping.
///
/// Lifecycle: created as a placeholder when a cacheable request is first
/// seen (payload absent, timeout recorded); the matching response attaches
/// the payload and fixes the expiry deadline; read-only thereafter until a
/// hit-time check finds it stale or capacity pressure reclaims it.
///
/// A placeholder whose response never arrives counts as expired once its
/// timeout elapses, so an upstream failure can't pin a cache slot forever.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    request_hash: RequestDigest,
    payload: Option<Vec<u8>>,
    timeout: Duration,
    created_at: Instant,
    expires_at: Option<Instant>,
    expired: bool,
}

impl CachedResponse {
    /// Create a placeholder for a request that was just admitted to caching.
    ///
    /// A zero `timeout` means the stored response never expires on its own
    /// (it is only reclaimed under capacity pressure) — but the placeholder
    /// itself then also never self-expires, so zero-timeout caches rely on
    /// responses actually arriving.
    pub fn placeholder(request_hash: RequestDigest, timeout: Duration) -> Self {
        Self {
            request_hash,
            payload: None,
            timeout,
            created_at: Instant::now(),
            expires_at: None,
            expired: false,
        }
    }

    pub fn request_hash(&self) -> &RequestDigest {
        &self.request_hash
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attach the correlated response payload and fix the expiry deadline.
    ///
    /// With a zero timeout the entry is kept until evicted for space.
    pub fn attach_payload(&mut self, payload: Vec<u8>) {
        self.payload = Some(payload);
        self.expired = false;
        if !self.timeout.is_zero() {
            self.expires_at = Some(Instant::now() + self.timeout);
        }
    }

    /// Whether this entry can no longer serve hits.
    ///
    /// True when explicitly expired, past its deadline, or an unresolved
    /// placeholder whose timeout has elapsed.
    pub fn is_expired(&self) -> bool {
        if self.expired {
            return true;
        }
        let now = Instant::now();
        if let Some(deadline) = self.expires_at {
            return now >= deadline;
        }
        self.payload.is_none() && !self.timeout.is_zero() && now >= self.created_at + self.timeout
    }

    /// Force-expire this entry so capacity pressure can reclaim it.
    pub fn expire(&mut self) {
        self.expired = true;
    }

    /// Reset a stale entry so the next response refreshes it in place.
    ///
    /// Drops the payload, restarts the placeholder clock, and adopts the
    /// given timeout (the mediator's currently configured value, which may
    /// differ from the one the entry was created with).
    pub fn reset(&mut self, timeout: Duration) {
        self.payload = None;
        self.expired = false;
        self.timeout = timeout;
        self.created_at = Instant::now();
        self.expires_at = None;
    }
}
