//! Correlation caching subsystem.
//!
//! Four pieces:
//!
//! - [`digest`] — deterministic request fingerprints used as cache keys.
//!   [`HashDigest`] is the default (canonicalized body + selected headers,
//!   SHA-256); [`HeaderDigest`] digests metadata only.
//!
//! - [`CachedResponse`] — one cache slot and its lifecycle: placeholder on
//!   first sight, payload attached when the correlated response arrives,
//!   expiry bookkeeping thereafter.
//!
//! - [`CacheManager`] — the shared bounded store. Purges expired entries
//!   under capacity pressure and refuses inserts rather than evicting live
//!   entries.
//!
//! - [`CacheMediator`] — the pipeline stage tying them together: digest,
//!   lookup, short-circuit on hit, placeholder on miss, store on response.

pub mod digest;
pub mod entry;
pub mod manager;
pub mod mediator;

pub use digest::{DigestConfig, DigestGenerator, HashDigest, HeaderDigest, RequestDigest};
pub use entry::CachedResponse;
pub use manager::{CacheManager, DEFAULT_CACHE_CAPACITY};
pub use mediator::{CacheConfig, CacheMediator, CacheScope};
