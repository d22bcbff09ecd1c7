//! The cache mediator: request/response correlation over the shared store.
//!
//! On the request path the mediator digests the message, looks the digest up
//! in the shared [`CacheManager`], and either serves the stored response
//! (halting the pipeline) or admits the request to caching with a
//! placeholder entry and lets it flow on. On the response path — a separate
//! mediator instance configured as a *collector* — it correlates the
//! response back to its request via the digest stashed on the message
//! context and attaches the payload to the placeholder.
//!
//! # Failure semantics
//!
//! Caching is a performance optimisation, not a correctness requirement: a
//! digest failure or a full cache degrades to an uncached pass-through and
//! never blocks delivery. Wiring mistakes (a request reaching a collector,
//! a response reaching a finder) are configuration errors and do fail loudly.
//!
//! # Hit flow
//!
//! ```text
//! request ──► digest ──► lookup ──► fresh hit? ──► mark as response,
//!                │                     │           install stored payload
//!                │                     │                 │
//!                │                     ▼                 ▼
//!                │                  miss/stale      on-cache-hit sequence,
//!                │                     │            or answer caller directly
//!                ▼                     ▼
//!          stash digest on ctx   placeholder insert (capacity-checked),
//!                                pipeline continues
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::digest::{DigestGenerator, HashDigest, RequestDigest};
use super::entry::CachedResponse;
use super::manager::{CacheManager, DEFAULT_CACHE_CAPACITY};
use crate::context::{MediationRegistry, MessageContext, REQUEST_HASH_PROPERTY};
use crate::telemetry;
use crate::traits::{Mediator, NoopReplicator, NullResolver, Replicator, SequenceResolver};
use crate::{HeimdallrError, Result};

/// Registry key shared by every per-host cache.
const PER_HOST_CACHE_KEY: &str = "heimdallr.cache";

/// Registry key prefix for per-mediator caches.
const PER_MEDIATOR_CACHE_PREFIX: &str = "heimdallr.cache.";

/// Which shared store a cache mediator binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheScope {
    /// All per-host mediators share one store.
    #[default]
    PerHost,
    /// The mediator's id selects its own store.
    PerMediator,
}

/// Configuration for a cache mediator.
///
/// ```rust
/// # use heimdallr::cache::{CacheConfig, CacheScope};
/// # use std::time::Duration;
/// let config = CacheConfig::new("quote-cache")
///     .scope(CacheScope::PerMediator)
///     .capacity(500)
///     .timeout(Duration::from_secs(60))
///     .on_cache_hit("hit-seq");
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Instance id; selects the shared store under [`CacheScope::PerMediator`].
    pub id: String,
    /// Store-sharing scope. Default: per-host.
    pub scope: CacheScope,
    /// Maximum in-memory entries. Default: [`DEFAULT_CACHE_CAPACITY`].
    pub capacity: usize,
    /// How long a stored response can serve hits. Zero = until evicted for
    /// space. Default: zero.
    pub timeout: Duration,
    /// Upper bound on cacheable message size in bytes; larger messages pass
    /// through uncached. Default: none.
    pub max_message_size: Option<usize>,
    /// Collector role: accepts response-direction messages for storage
    /// instead of request-direction lookups. Default: false (finder).
    pub collector: bool,
    /// Named sequence to run on a cache hit. Without one, the hit marks the
    /// context to be answered directly to the caller.
    pub on_cache_hit: Option<String>,
}

impl CacheConfig {
    /// Create a config with default values for the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: CacheScope::default(),
            capacity: DEFAULT_CACHE_CAPACITY,
            timeout: Duration::ZERO,
            max_message_size: None,
            collector: false,
            on_cache_hit: None,
        }
    }

    /// Set the store-sharing scope.
    pub fn scope(mut self, scope: CacheScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the maximum number of in-memory entries.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set how long stored responses stay servable.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum cacheable message size in bytes.
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    /// Configure this instance as a collector (response-storing) cache.
    pub fn collector(mut self, collector: bool) -> Self {
        self.collector = collector;
        self
    }

    /// Set the sequence to run on a cache hit.
    pub fn on_cache_hit(mut self, sequence: impl Into<String>) -> Self {
        self.on_cache_hit = Some(sequence.into());
        self
    }

    /// The registry key this configuration binds to.
    pub fn registry_key(&self) -> String {
        match self.scope {
            CacheScope::PerHost => PER_HOST_CACHE_KEY.to_string(),
            CacheScope::PerMediator => format!("{PER_MEDIATOR_CACHE_PREFIX}{}", self.id),
        }
    }
}

/// Outcome of one direction-specific mediation pass.
struct Mediation {
    /// Should the pipeline continue? `false` halts it (hit served).
    result: bool,
    /// Did this pass mutate shared state (and so owe a replication call)?
    mutated: bool,
}

/// Pipeline stage implementing request/response correlation caching.
///
/// A finder (`collector = false`) handles the request path; a collector
/// handles the response path against the same shared store. Construct with
/// [`CacheMediator::new`] and wire collaborators with the `with_*` methods.
pub struct CacheMediator {
    config: CacheConfig,
    key: String,
    digest: Arc<dyn DigestGenerator>,
    registry: Arc<MediationRegistry>,
    replicator: Arc<dyn Replicator>,
    resolver: Arc<dyn SequenceResolver>,
}

impl CacheMediator {
    /// Create a mediator over the given shared registry, with the default
    /// body-hashing digest, no replication, and no sequence resolution.
    pub fn new(config: CacheConfig, registry: Arc<MediationRegistry>) -> Self {
        let key = config.registry_key();
        Self {
            config,
            key,
            digest: Arc::new(HashDigest::default()),
            registry,
            replicator: Arc::new(NoopReplicator),
            resolver: Arc::new(NullResolver),
        }
    }

    /// Replace the digest strategy.
    pub fn with_digest_generator(mut self, digest: Arc<dyn DigestGenerator>) -> Self {
        self.digest = digest;
        self
    }

    /// Set the cluster replicator.
    pub fn with_replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = replicator;
        self
    }

    /// Set the continuation resolver for `on_cache_hit`.
    pub fn with_resolver(mut self, resolver: Arc<dyn SequenceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// The registry key this mediator's store lives under.
    pub fn registry_key(&self) -> &str {
        &self.key
    }

    async fn process_request(
        &self,
        ctx: &mut MessageContext,
        manager: &CacheManager,
    ) -> Result<Mediation> {
        if self.config.collector {
            return Err(HeimdallrError::Configuration(
                "request messages cannot be handled by a collector cache".to_string(),
            ));
        }

        let hash = match self.digest.digest(ctx) {
            Ok(hash) => hash,
            Err(e) => {
                // caching is advisory: an unreadable request flows through
                warn!(message_id = %ctx.message_id(), error = %e,
                    "digest computation failed, request will not be cached");
                return Ok(Mediation { result: true, mutated: false });
            }
        };
        debug!(message_id = %ctx.message_id(), hash = %hash, "generated request hash");
        ctx.set_property(REQUEST_HASH_PROPERTY, hash.as_str());

        if let Some(entry) = manager.lookup(&hash) {
            match entry.payload() {
                Some(payload) if !entry.is_expired() => {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL, "id" => self.config.id.clone())
                        .increment(1);
                    debug!(message_id = %ctx.message_id(), key = %self.key, "cache hit");
                    let payload = payload.to_vec();
                    self.serve_hit(ctx, payload).await?;
                    return Ok(Mediation { result: false, mutated: false });
                }
                _ => {
                    // stale or unresolved: reset in place so the eventual
                    // response refreshes it
                    debug!(hash = %hash, "cached response has expired, reset cache entry");
                    let timeout = self.config.timeout;
                    manager.update(&hash, |e| e.reset(timeout));
                    return Ok(Mediation { result: true, mutated: true });
                }
            }
        }

        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "id" => self.config.id.clone())
            .increment(1);
        match manager.put(
            hash.clone(),
            CachedResponse::placeholder(hash, self.config.timeout),
        ) {
            Ok(()) => Ok(Mediation { result: true, mutated: true }),
            Err(HeimdallrError::CacheFull) => {
                metrics::counter!(
                    telemetry::CACHE_INSERTS_REFUSED_TOTAL, "id" => self.config.id.clone()
                )
                .increment(1);
                debug!(key = %self.key, "in-memory cache is full, unable to cache");
                Ok(Mediation { result: true, mutated: false })
            }
            Err(e) => Err(e),
        }
    }

    /// Turn the request into a response carrying the stored payload, then
    /// hand it to the on-cache-hit sequence (or mark it for direct reply).
    async fn serve_hit(&self, ctx: &mut MessageContext, payload: Vec<u8>) -> Result<()> {
        ctx.set_response(true);
        ctx.set_body(payload);

        if let Some(name) = &self.config.on_cache_hit {
            let sequence = self
                .resolver
                .resolve(name)
                .ok_or_else(|| HeimdallrError::SequenceNotFound(name.clone()))?;
            debug!(sequence = %name, "delegating cache hit to sequence");
            sequence.mediate(ctx).await?;
        } else {
            ctx.set_respond_from_cache(true);
        }
        Ok(())
    }

    fn process_response(
        &self,
        ctx: &mut MessageContext,
        manager: &CacheManager,
    ) -> Result<Mediation> {
        if !self.config.collector {
            return Err(HeimdallrError::Configuration(
                "response messages cannot be handled by a non-collector cache".to_string(),
            ));
        }

        let Some(hash) = ctx.property_str(REQUEST_HASH_PROPERTY).map(RequestDigest::new)
        else {
            warn!(message_id = %ctx.message_id(),
                "response message carries no request hash, unable to store it in the cache");
            return Ok(Mediation { result: true, mutated: false });
        };

        let payload = ctx.body().to_vec();
        if manager.update(&hash, |entry| entry.attach_payload(payload)) {
            debug!(message_id = %ctx.message_id(), hash = %hash, key = %self.key,
                "stored response in the cache");
            Ok(Mediation { result: true, mutated: true })
        } else {
            warn!(hash = %hash,
                "response message without a valid mapping to a cached request, unable to store it");
            Ok(Mediation { result: true, mutated: false })
        }
    }

    async fn replicate_state(&self) {
        if let Err(e) = self.replicator.replicate(&self.key).await {
            metrics::counter!(
                telemetry::REPLICATION_FAILURES_TOTAL, "id" => self.config.id.clone()
            )
            .increment(1);
            warn!(key = %self.key, error = %e, "unable to replicate cache state");
        }
    }
}

#[async_trait]
impl Mediator for CacheMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool> {
        if let Some(max) = self.config.max_message_size {
            if ctx.body().len() > max {
                debug!(size = ctx.body().len(), max,
                    "message exceeds the cacheable size bound, skipping cache");
                return Ok(true);
            }
        }

        let manager = self.registry.cache_manager(&self.key, self.config.capacity);

        let mediation = if ctx.is_response() {
            self.process_response(ctx, &manager)?
        } else {
            self.process_request(ctx, &manager).await?
        };

        if mediation.mutated {
            self.replicate_state().await;
        }
        Ok(mediation.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_host_scope_shares_one_key() {
        let a = CacheConfig::new("a").registry_key();
        let b = CacheConfig::new("b").registry_key();
        assert_eq!(a, b);
    }

    #[test]
    fn per_mediator_scope_derives_key_from_id() {
        let a = CacheConfig::new("a").scope(CacheScope::PerMediator).registry_key();
        let b = CacheConfig::new("b").scope(CacheScope::PerMediator).registry_key();
        assert_ne!(a, b);
        assert!(a.ends_with(".a"));
    }
}
