//! Per-caller rate control: sliding windows over recorded accesses.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use crate::throttle::policy::CallerRule;
use crate::{HeimdallrError, Result};

/// The dimension callers are grouped by for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleScope {
    Domain,
    Ip,
}

impl std::fmt::Display for ThrottleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThrottleScope::Domain => f.write_str("domain"),
            ThrottleScope::Ip => f.write_str("ip"),
        }
    }
}

/// One caller's recorded accesses within the rolling window, plus any active
/// prohibition.
///
/// Timestamps are only recorded for granted accesses and pruned to the
/// rule's unit window on every check, so the deque never grows past the
/// rule's `max_count`.
#[derive(Debug, Default)]
struct CallerWindow {
    timestamps: VecDeque<Instant>,
    prohibited_until: Option<Instant>,
}

/// Shared per-scope rate-limiting state: the rule table for one throttle
/// dimension and the live windows of every caller seen so far.
///
/// Rules are matched by exact caller key, falling back to the policy's
/// catch-all rule if one is configured. Window mutation happens under the
/// context's own mutex — contexts of unrelated throttles never contend.
pub struct ThrottleContext {
    scope: ThrottleScope,
    rules: HashMap<String, CallerRule>,
    other: Option<CallerRule>,
    windows: Mutex<HashMap<String, CallerWindow>>,
}

impl ThrottleContext {
    /// Build a context from a policy's rule list for `scope`.
    ///
    /// A rule keyed [`OTHER_CALLERS_KEY`](crate::throttle::OTHER_CALLERS_KEY)
    /// becomes the catch-all for callers without an exact match.
    pub fn new(scope: ThrottleScope, rules: Vec<CallerRule>) -> Self {
        let mut exact = HashMap::new();
        let mut other = None;
        for rule in rules {
            if rule.is_catch_all() {
                other = Some(rule);
            } else {
                exact.insert(rule.key.clone(), rule);
            }
        }
        Self {
            scope,
            rules: exact,
            other,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> ThrottleScope {
        self.scope
    }

    fn rule_for(&self, caller_key: &str) -> Option<&CallerRule> {
        self.rules.get(caller_key).or(self.other.as_ref())
    }
}

/// The rate-limiting decision procedure over a [`ThrottleContext`].
///
/// Grants access iff the caller's recorded access count within the trailing
/// unit window is below the rule's limit, recording the access on grant.
/// Callers with no applicable rule are permitted — rejecting unidentified
/// callers would be stricter than the configured policy.
#[derive(Debug, Default)]
pub struct AccessController;

impl AccessController {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `caller_key` may proceed under `context`'s rules.
    ///
    /// `scope` must match the context's scope; a mismatch means the caller
    /// wired a domain context into an IP check (or vice versa) and is
    /// reported as invalid input rather than silently producing wrong
    /// grouping.
    pub fn can_access(
        &self,
        context: &ThrottleContext,
        caller_key: &str,
        scope: ThrottleScope,
    ) -> Result<bool> {
        if caller_key.is_empty() {
            return Err(HeimdallrError::InvalidInput(
                "caller key is empty".to_string(),
            ));
        }
        if context.scope() != scope {
            return Err(HeimdallrError::InvalidInput(format!(
                "throttle context has scope {}, expected {scope}",
                context.scope()
            )));
        }

        let Some(rule) = context.rule_for(caller_key) else {
            debug!(caller = %caller_key, %scope, "no throttle rule for caller, access permitted");
            return Ok(true);
        };

        let now = Instant::now();
        let mut windows = context.windows.lock().expect("throttle windows poisoned");
        let window = windows.entry(caller_key.to_string()).or_default();

        if let Some(until) = window.prohibited_until {
            if now < until {
                debug!(caller = %caller_key, %scope, "caller is within a prohibition period");
                return Ok(false);
            }
            // prohibition lapsed, the caller starts a fresh window
            window.prohibited_until = None;
            window.timestamps.clear();
        }

        // a failed checked_sub means the process is younger than the unit
        // window, so nothing can have aged out yet
        if let Some(window_start) = now.checked_sub(rule.unit()) {
            while window
                .timestamps
                .front()
                .is_some_and(|&t| t < window_start)
            {
                window.timestamps.pop_front();
            }
        }

        if (window.timestamps.len() as u32) < rule.max_count {
            window.timestamps.push_back(now);
            Ok(true)
        } else {
            if let Some(prohibit) = rule.prohibit() {
                window.prohibited_until = Some(now + prohibit);
            }
            debug!(caller = %caller_key, %scope, limit = rule.max_count,
                "access denied, caller exhausted its window");
            Ok(false)
        }
    }
}
