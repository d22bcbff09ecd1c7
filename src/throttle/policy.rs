//! Throttle policy documents, their parsed runtime state, and dynamic
//! reload bookkeeping.
//!
//! A policy document is JSON:
//!
//! ```json
//! {
//!   "max_concurrent_access": 4,
//!   "domain": [
//!     { "key": "example.com", "max_count": 3, "unit_ms": 60000 },
//!     { "key": "other", "max_count": 10, "unit_ms": 60000, "prohibit_ms": 30000 }
//!   ],
//!   "ip": [
//!     { "key": "10.0.0.1", "max_count": 2, "unit_ms": 1000 }
//!   ]
//! }
//! ```
//!
//! Parsing failures are policy errors and abort admission — a broken policy
//! must surface to the operator rather than silently admitting or rejecting
//! everyone. Load state is tracked explicitly as [`PolicyStatus`] instead of
//! ad hoc null checks, and keyed policies are re-parsed when the backing
//! source reports them stale.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::access::{ThrottleContext, ThrottleScope};
use super::concurrency::ConcurrentAccessController;
use crate::{HeimdallrError, Result};

/// Rule key that matches any caller without an exact rule.
pub const OTHER_CALLERS_KEY: &str = "other";

/// One caller's rate limit within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerRule {
    /// Exact caller key (an IP or domain), or [`OTHER_CALLERS_KEY`] for the
    /// scope's catch-all.
    pub key: String,
    /// Accesses permitted per unit window. Zero denies every access.
    pub max_count: u32,
    /// Rolling window length in milliseconds.
    pub unit_ms: u64,
    /// Lock-out period applied after a denial, in milliseconds. Zero
    /// disables prohibition.
    #[serde(default)]
    pub prohibit_ms: u64,
}

impl CallerRule {
    pub fn is_catch_all(&self) -> bool {
        self.key == OTHER_CALLERS_KEY
    }

    pub fn unit(&self) -> Duration {
        Duration::from_millis(self.unit_ms)
    }

    pub fn prohibit(&self) -> Option<Duration> {
        (self.prohibit_ms > 0).then(|| Duration::from_millis(self.prohibit_ms))
    }
}

/// A parsed throttle policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    /// Concurrent in-flight request bound for the whole group.
    #[serde(default)]
    pub max_concurrent_access: Option<i64>,
    /// Domain-scope rate rules.
    #[serde(default)]
    pub domain: Vec<CallerRule>,
    /// IP-scope rate rules.
    #[serde(default)]
    pub ip: Vec<CallerRule>,
}

impl ThrottlePolicy {
    /// Parse and validate a policy from raw document bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let policy: ThrottlePolicy = serde_json::from_slice(bytes)
            .map_err(|e| HeimdallrError::Policy(format!("unable to parse policy: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse and validate a policy from an already-deserialized document.
    pub fn from_value(value: &Value) -> Result<Self> {
        let policy: ThrottlePolicy = serde_json::from_value(value.clone())
            .map_err(|e| HeimdallrError::Policy(format!("unable to parse policy: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        if let Some(limit) = self.max_concurrent_access {
            if limit <= 0 {
                return Err(HeimdallrError::Policy(format!(
                    "max_concurrent_access must be positive, got {limit}"
                )));
            }
        }
        for rule in self.domain.iter().chain(self.ip.iter()) {
            if rule.unit_ms == 0 {
                return Err(HeimdallrError::Policy(format!(
                    "rule for caller {:?} has a zero-length unit window",
                    rule.key
                )));
            }
        }
        Ok(())
    }
}

/// Load state of a throttle group's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyStatus {
    /// No policy has been installed yet.
    NotLoaded,
    /// A policy is installed and current.
    Loaded { loaded_at: Instant },
    /// The installed policy is known-stale; a refresh is due.
    Stale,
}

/// Runtime state built from a parsed policy: the per-scope rate contexts and
/// the optional concurrency controller.
pub struct ThrottleState {
    domain: Option<ThrottleContext>,
    ip: Option<ThrottleContext>,
    concurrency: Option<ConcurrentAccessController>,
}

impl ThrottleState {
    pub fn from_policy(policy: &ThrottlePolicy) -> Self {
        Self {
            domain: (!policy.domain.is_empty())
                .then(|| ThrottleContext::new(ThrottleScope::Domain, policy.domain.clone())),
            ip: (!policy.ip.is_empty())
                .then(|| ThrottleContext::new(ThrottleScope::Ip, policy.ip.clone())),
            concurrency: policy
                .max_concurrent_access
                .map(ConcurrentAccessController::new),
        }
    }

    pub fn domain_context(&self) -> Option<&ThrottleContext> {
        self.domain.as_ref()
    }

    pub fn ip_context(&self) -> Option<&ThrottleContext> {
        self.ip.as_ref()
    }

    pub fn concurrency(&self) -> Option<&ConcurrentAccessController> {
        self.concurrency.as_ref()
    }
}

struct GroupInner {
    status: PolicyStatus,
    state: Option<Arc<ThrottleState>>,
}

/// The shared throttle state for one throttle id, as held by the
/// [`MediationRegistry`](crate::context::MediationRegistry).
///
/// Policy installation replaces the whole runtime state (windows and
/// concurrency counter start fresh — last write wins under refresh races);
/// reads hand out an `Arc` snapshot so admission checks never hold the
/// group lock.
pub struct ThrottleGroup {
    inner: RwLock<GroupInner>,
}

impl ThrottleGroup {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GroupInner {
                status: PolicyStatus::NotLoaded,
                state: None,
            }),
        }
    }

    /// The currently installed state, if any.
    pub fn current(&self) -> Option<Arc<ThrottleState>> {
        self.inner
            .read()
            .expect("throttle group poisoned")
            .state
            .clone()
    }

    pub fn status(&self) -> PolicyStatus {
        self.inner.read().expect("throttle group poisoned").status
    }

    /// Flag the installed policy as due for refresh.
    ///
    /// The state keeps serving admission checks until the replacement is
    /// installed.
    pub fn mark_stale(&self) {
        let mut inner = self.inner.write().expect("throttle group poisoned");
        if matches!(inner.status, PolicyStatus::Loaded { .. }) {
            inner.status = PolicyStatus::Stale;
        }
    }

    /// Install freshly parsed state, replacing whatever was there.
    pub fn install(&self, state: ThrottleState) {
        let mut inner = self.inner.write().expect("throttle group poisoned");
        inner.state = Some(Arc::new(state));
        inner.status = PolicyStatus::Loaded {
            loaded_at: Instant::now(),
        };
    }
}

impl Default for ThrottleGroup {
    fn default() -> Self {
        Self::new()
    }
}
