//! Concurrent-access control: a counting semaphore over in-flight requests.

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::warn;

use crate::telemetry;

/// Result of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// Whether a slot was granted.
    pub granted: bool,
    /// Slots still available after this call.
    pub remaining: i64,
}

/// Bounds the number of simultaneously in-flight requests for one throttle
/// group.
///
/// Effectively a counting semaphore: every granted [`try_acquire`] on the
/// request path must be paired with exactly one [`release`] on the response
/// path (or a compensating release when admission is later withdrawn). The
/// available count is maintained with lock-free CAS loops and always stays
/// within `0..=limit` — a release without a matching acquire is clamped at
/// the limit and logged as an imbalance rather than growing capacity.
///
/// [`try_acquire`]: ConcurrentAccessController::try_acquire
/// [`release`]: ConcurrentAccessController::release
#[derive(Debug)]
pub struct ConcurrentAccessController {
    limit: i64,
    available: AtomicI64,
}

impl ConcurrentAccessController {
    /// Create a controller with `limit` concurrent slots.
    ///
    /// A non-positive limit is promoted to 1; policy validation rejects such
    /// limits before they get here.
    pub fn new(limit: i64) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            available: AtomicI64::new(limit),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Slots currently available.
    pub fn available(&self) -> i64 {
        self.available.load(Ordering::SeqCst)
    }

    /// Atomically take one slot if any is available.
    ///
    /// Never drives the count below zero: a denied attempt leaves the
    /// counter untouched and reports zero remaining.
    pub fn try_acquire(&self) -> Access {
        match self
            .available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v > 0 { Some(v - 1) } else { None }
            }) {
            Ok(prev) => Access {
                granted: true,
                remaining: prev - 1,
            },
            Err(_) => Access {
                granted: false,
                remaining: 0,
            },
        }
    }

    /// Return one slot, clamped at the configured limit.
    ///
    /// Returns the available count after the call. A release that would
    /// exceed the limit indicates an acquire/release imbalance upstream; it
    /// is logged, counted, and clamped.
    pub fn release(&self) -> i64 {
        match self
            .available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v < self.limit { Some(v + 1) } else { None }
            }) {
            Ok(prev) => prev + 1,
            Err(_) => {
                metrics::counter!(telemetry::THROTTLE_IMBALANCE_TOTAL).increment(1);
                warn!(limit = self.limit,
                    "release without a matching acquire, concurrency counter clamped");
                self.limit
            }
        }
    }
}
