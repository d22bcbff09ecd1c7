//! Heimdallr - correlation caching and admission control for message
//! mediation pipelines
//!
//! This crate provides the two stateful stages a mediation engine needs in
//! front of its backends: a response cache keyed on a content-derived
//! request digest (with at-most-one-active-entry-per-key correlation,
//! expiry, and a hard capacity bound), and a throttle combining a
//! concurrency semaphore with per-caller sliding rate windows. Both bind to
//! shared state in a [`MediationRegistry`] so finder/collector pairs and
//! same-id throttles cooperate, and both report every mutation to a
//! pluggable cluster [`Replicator`].
//!
//! The surrounding engine stays in charge of transport, serialization, and
//! request/response sequencing; it hands messages in as [`MessageContext`]s
//! and interprets the boolean each mediator returns (`false` = the pipeline
//! is done, e.g. a cache hit already produced the response).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use heimdallr::cache::{CacheConfig, CacheMediator, CacheScope};
//! use heimdallr::{Mediator, MediationRegistry, MessageContext};
//!
//! #[tokio::main]
//! async fn main() -> heimdallr::Result<()> {
//!     let registry = Arc::new(MediationRegistry::new());
//!     let cache = CacheMediator::new(
//!         CacheConfig::new("quote-cache")
//!             .scope(CacheScope::PerMediator)
//!             .capacity(500)
//!             .timeout(Duration::from_secs(60)),
//!         Arc::clone(&registry),
//!     );
//!
//!     let mut request = MessageContext::request("m1", b"<getQuote/>".to_vec());
//!     if cache.mediate(&mut request).await? {
//!         // miss: forward the request, then feed the correlated response
//!         // through a collector instance of the same cache
//!     } else {
//!         // hit: `request` is now the response, ready to send back
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod telemetry;
pub mod throttle;
pub mod traits;

// Re-export main types at crate root
pub use context::{MediationRegistry, MessageContext, REQUEST_HASH_PROPERTY};
pub use error::{HeimdallrError, Result};
pub use traits::{
    Mediator, NoopReplicator, NullResolver, PolicySource, Replicator, SequenceResolver,
};
