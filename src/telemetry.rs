//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdallr operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdallr_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `id` — the cache or throttle instance id
//! - `stage` — throttle rejection stage: "concurrency" or "rate"

/// Total cache hits served from stored responses.
///
/// Labels: `id`.
pub const CACHE_HITS_TOTAL: &str = "heimdallr_cache_hits_total";

/// Total cache misses on the request path.
///
/// Labels: `id`.
pub const CACHE_MISSES_TOTAL: &str = "heimdallr_cache_misses_total";

/// Total expired entries purged under capacity pressure.
pub const CACHE_EVICTIONS_TOTAL: &str = "heimdallr_cache_evictions_total";

/// Total inserts refused because the cache was full of live entries.
///
/// Labels: `id`.
pub const CACHE_INSERTS_REFUSED_TOTAL: &str = "heimdallr_cache_inserts_refused_total";

/// Total requests admitted by a throttle.
///
/// Labels: `id`.
pub const THROTTLE_ACCEPTED_TOTAL: &str = "heimdallr_throttle_accepted_total";

/// Total requests rejected by a throttle.
///
/// Labels: `id`, `stage` ("concurrency" | "rate").
pub const THROTTLE_REJECTED_TOTAL: &str = "heimdallr_throttle_rejected_total";

/// Total releases that arrived without a matching acquire (clamped).
pub const THROTTLE_IMBALANCE_TOTAL: &str = "heimdallr_throttle_imbalance_total";

/// Total best-effort replication calls that failed.
///
/// Labels: `id`.
pub const REPLICATION_FAILURES_TOTAL: &str = "heimdallr_replication_failures_total";
