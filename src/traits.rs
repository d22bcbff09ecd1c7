//! Collaborator seams between the core and the surrounding engine.
//!
//! The core consumes four host facilities, each behind a trait so tests and
//! embedders can supply their own: pipeline stages ([`Mediator`]), named
//! continuation lookup ([`SequenceResolver`]), cluster state propagation
//! ([`Replicator`]), and dynamic policy retrieval ([`PolicySource`]).

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::context::MessageContext;

/// One stage in a message mediation pipeline.
///
/// Returning `Ok(false)` halts further pipeline processing for this message
/// (e.g. a cache hit that has already produced the response). Errors abort
/// mediation and surface to the pipeline's error handler.
#[async_trait]
pub trait Mediator: Send + Sync {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool>;
}

/// Resolves named sequences (on-accept, on-reject, on-cache-hit) to
/// invocable pipeline stages.
pub trait SequenceResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Mediator>>;
}

/// A resolver that knows no sequences.
///
/// The default for mediators constructed without continuations; any
/// configured sequence reference then fails resolution loudly instead of
/// being silently skipped.
#[derive(Debug, Default)]
pub struct NullResolver;

impl SequenceResolver for NullResolver {
    fn resolve(&self, _name: &str) -> Option<Arc<dyn Mediator>> {
        None
    }
}

/// Best-effort propagation of shared mediation state to other cluster
/// members.
///
/// Mediators invoke this once per `mediate()` call after mutating shared
/// state, passing the registry key that changed. Failures are logged and
/// counted by the caller — local state remains the source of truth.
#[async_trait]
pub trait Replicator: Send + Sync {
    async fn replicate(&self, key: &str) -> Result<()>;
}

/// A replicator for single-node deployments: does nothing, never fails.
#[derive(Debug, Default)]
pub struct NoopReplicator;

#[async_trait]
impl Replicator for NoopReplicator {
    async fn replicate(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Supplies raw throttle policy documents and answers staleness queries for
/// dynamic reload.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Fetch the raw policy bytes for `key`.
    ///
    /// Called outside any core lock; may perform I/O.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>>;

    /// Whether the cached copy of `key` should be re-fetched.
    fn is_stale(&self, key: &str) -> bool;
}
