//! The throttle mediator: policy resolution, concurrency check, rate check,
//! outcome routing.
//!
//! Per request the mediator walks a fixed ladder: resolve the policy (inline
//! parsed once, keyed re-fetched when stale), take a concurrency slot, then
//! rate-check the caller — domain scope first, IP scope only when no domain
//! context applies. A rate rejection after a concurrency grant releases the
//! slot before rejecting, so a denied request never occupies capacity. Per
//! response it returns exactly one slot.
//!
//! Accepted and rejected messages route to their configured continuations;
//! without one, the admission decision is returned to the enclosing pipeline
//! as a boolean.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::access::{AccessController, ThrottleScope};
use super::policy::{ThrottleGroup, ThrottlePolicy, ThrottleState};
use crate::context::{MediationRegistry, MessageContext};
use crate::telemetry;
use crate::traits::{
    Mediator, NoopReplicator, NullResolver, PolicySource, Replicator, SequenceResolver,
};
use crate::{HeimdallrError, Result};

/// Where a throttle mediator's policy comes from.
#[derive(Debug, Clone)]
pub enum PolicySpec {
    /// A policy document embedded in the configuration; parsed once and
    /// cached in the shared group.
    Inline(Value),
    /// A key into a [`PolicySource`]; re-fetched whenever the source reports
    /// the cached copy stale.
    Keyed(String),
}

/// Configuration for a throttle mediator.
///
/// ```rust
/// # use heimdallr::throttle::ThrottleConfig;
/// # use serde_json::json;
/// let config = ThrottleConfig::inline(
///     "orders",
///     json!({ "max_concurrent_access": 10 }),
/// )
/// .on_reject("too-busy-seq");
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Throttle group id; mediators sharing an id share counters and
    /// windows.
    pub id: String,
    /// Policy location.
    pub policy: PolicySpec,
    /// Sequence to route admitted requests to.
    pub on_accept: Option<String>,
    /// Sequence to route rejected requests to.
    pub on_reject: Option<String>,
}

impl ThrottleConfig {
    /// Configure with an inline policy document.
    pub fn inline(id: impl Into<String>, policy: Value) -> Self {
        Self {
            id: id.into(),
            policy: PolicySpec::Inline(policy),
            on_accept: None,
            on_reject: None,
        }
    }

    /// Configure with a keyed (dynamically reloadable) policy.
    pub fn keyed(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policy: PolicySpec::Keyed(key.into()),
            on_accept: None,
            on_reject: None,
        }
    }

    /// Set the sequence admitted requests route to.
    pub fn on_accept(mut self, sequence: impl Into<String>) -> Self {
        self.on_accept = Some(sequence.into());
        self
    }

    /// Set the sequence rejected requests route to.
    pub fn on_reject(mut self, sequence: impl Into<String>) -> Self {
        self.on_reject = Some(sequence.into());
        self
    }
}

/// What the rate-check ladder decided.
struct RateOutcome {
    admitted: bool,
    /// Whether any window was consulted (and so shared state mutated).
    consulted: bool,
}

/// Pipeline stage implementing admission control.
///
/// Construct with [`ThrottleMediator::new`] and wire collaborators with the
/// `with_*` methods; a keyed policy additionally needs
/// [`with_policy_source`](ThrottleMediator::with_policy_source).
pub struct ThrottleMediator {
    config: ThrottleConfig,
    registry: Arc<MediationRegistry>,
    replicator: Arc<dyn Replicator>,
    resolver: Arc<dyn SequenceResolver>,
    source: Option<Arc<dyn PolicySource>>,
    access: AccessController,
}

impl ThrottleMediator {
    /// Create a mediator over the given shared registry, with no
    /// replication, no sequence resolution, and no policy source.
    pub fn new(config: ThrottleConfig, registry: Arc<MediationRegistry>) -> Self {
        Self {
            config,
            registry,
            replicator: Arc::new(NoopReplicator),
            resolver: Arc::new(NullResolver),
            source: None,
            access: AccessController::new(),
        }
    }

    /// Set the cluster replicator.
    pub fn with_replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = replicator;
        self
    }

    /// Set the continuation resolver for `on_accept` / `on_reject`.
    pub fn with_resolver(mut self, resolver: Arc<dyn SequenceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the source keyed policies are fetched from.
    pub fn with_policy_source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Ensure the group holds a current policy, fetching and re-parsing as
    /// needed. Returns whether shared state was mutated.
    ///
    /// The fetch happens outside the group lock; under a refresh race the
    /// last installed policy wins.
    async fn refresh_if_stale(&self, group: &ThrottleGroup) -> Result<bool> {
        match &self.config.policy {
            PolicySpec::Inline(value) => {
                if group.current().is_some() {
                    return Ok(false);
                }
                let policy = ThrottlePolicy::from_value(value)?;
                debug!(id = %self.config.id, "initialized throttle from inline policy");
                group.install(ThrottleState::from_policy(&policy));
                Ok(true)
            }
            PolicySpec::Keyed(key) => {
                let source = self.source.as_ref().ok_or_else(|| {
                    HeimdallrError::Configuration(format!(
                        "throttle {} uses policy key {key:?} but has no policy source",
                        self.config.id
                    ))
                })?;
                if group.current().is_some() && !source.is_stale(key) {
                    return Ok(false);
                }
                group.mark_stale();
                let bytes = source.fetch(key).await.map_err(|e| {
                    HeimdallrError::Policy(format!("unable to fetch policy {key:?}: {e}"))
                })?;
                let policy = ThrottlePolicy::from_slice(&bytes)?;
                debug!(id = %self.config.id, key = %key, "reloaded throttle policy");
                group.install(ThrottleState::from_policy(&policy));
                Ok(true)
            }
        }
    }

    /// Domain-first rate check with IP fallback.
    ///
    /// IP throttling applies only when no domain context applied — because
    /// the caller has no domain, or the policy has no domain rules. A failed
    /// domain check is final and does not fall through to IP.
    fn rate_check(&self, ctx: &MessageContext, state: &ThrottleState) -> Result<RateOutcome> {
        if let Some(domain) = ctx.remote_domain() {
            if let Some(domain_ctx) = state.domain_context() {
                let admitted = self.access.can_access(domain_ctx, domain, ThrottleScope::Domain)?;
                return Ok(RateOutcome {
                    admitted,
                    consulted: true,
                });
            }
        } else {
            debug!(id = %self.config.id, "the domain name of the caller cannot be found");
        }

        match ctx.remote_ip() {
            Some(ip) => match state.ip_context() {
                Some(ip_ctx) => {
                    let admitted = self.access.can_access(ip_ctx, ip, ThrottleScope::Ip)?;
                    Ok(RateOutcome {
                        admitted,
                        consulted: true,
                    })
                }
                None => Ok(RateOutcome {
                    admitted: true,
                    consulted: false,
                }),
            },
            None => {
                // an unidentifiable caller is permitted: rejecting it would
                // be stricter than the configured policy
                debug!(id = %self.config.id, "the IP address of the caller cannot be found");
                Ok(RateOutcome {
                    admitted: true,
                    consulted: false,
                })
            }
        }
    }

    /// Route the admission decision to its continuation, or return it.
    async fn route(&self, ctx: &mut MessageContext, admitted: bool) -> Result<bool> {
        let sequence = if admitted {
            &self.config.on_accept
        } else {
            &self.config.on_reject
        };
        match sequence {
            Some(name) => {
                let mediator = self
                    .resolver
                    .resolve(name)
                    .ok_or_else(|| HeimdallrError::SequenceNotFound(name.clone()))?;
                debug!(sequence = %name, admitted, "routing throttle outcome to sequence");
                mediator.mediate(ctx).await
            }
            None => Ok(admitted),
        }
    }

    async fn replicate_state(&self) {
        if let Err(e) = self.replicator.replicate(&self.config.id).await {
            metrics::counter!(
                telemetry::REPLICATION_FAILURES_TOTAL, "id" => self.config.id.clone()
            )
            .increment(1);
            warn!(id = %self.config.id, error = %e, "unable to replicate throttle state");
        }
    }
}

#[async_trait]
impl Mediator for ThrottleMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> Result<bool> {
        let group = self.registry.throttle_group(&self.config.id);

        if ctx.is_response() {
            // return the slot taken by the correlated request
            let mut mutated = false;
            if let Some(state) = group.current() {
                if let Some(controller) = state.concurrency() {
                    let remaining = controller.release();
                    debug!(id = %self.config.id, remaining, "concurrency slot returned");
                    mutated = true;
                }
            }
            if mutated {
                self.replicate_state().await;
            }
            return Ok(true);
        }

        let mut mutated = self.refresh_if_stale(&group).await?;

        let Some(state) = group.current() else {
            // the install raced with a registry teardown; nothing to enforce
            debug!(id = %self.config.id, "no throttle state, access permitted");
            return self.route(ctx, true).await;
        };

        let mut admitted = true;
        let mut slot_held = false;
        if let Some(controller) = state.concurrency() {
            let access = controller.try_acquire();
            mutated = true;
            admitted = access.granted;
            slot_held = access.granted;
            if access.granted {
                debug!(id = %self.config.id, remaining = access.remaining,
                    "concurrency slot acquired");
            } else {
                metrics::counter!(telemetry::THROTTLE_REJECTED_TOTAL,
                    "id" => self.config.id.clone(), "stage" => "concurrency")
                .increment(1);
                debug!(id = %self.config.id, limit = controller.limit(),
                    "access denied, no concurrency slots available");
            }
        }

        if admitted {
            match self.rate_check(ctx, &state) {
                Ok(outcome) => {
                    mutated = mutated || outcome.consulted;
                    if !outcome.admitted {
                        admitted = false;
                        metrics::counter!(telemetry::THROTTLE_REJECTED_TOTAL,
                            "id" => self.config.id.clone(), "stage" => "rate")
                        .increment(1);
                        // the request will not proceed, so give its slot back
                        if slot_held {
                            if let Some(controller) = state.concurrency() {
                                controller.release();
                            }
                        }
                    }
                }
                Err(e) => {
                    // compensate before surfacing, the slot must not leak
                    if slot_held {
                        if let Some(controller) = state.concurrency() {
                            controller.release();
                        }
                    }
                    if mutated {
                        self.replicate_state().await;
                    }
                    return Err(e);
                }
            }
        }

        if mutated {
            self.replicate_state().await;
        }
        if admitted {
            metrics::counter!(telemetry::THROTTLE_ACCEPTED_TOTAL, "id" => self.config.id.clone())
                .increment(1);
        }
        self.route(ctx, admitted).await
    }
}
