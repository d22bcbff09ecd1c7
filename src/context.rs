//! Message context and the shared mediation registry.
//!
//! [`MessageContext`] is the opaque carrier a message travels through the
//! pipeline in. The core attaches correlation properties to it (notably the
//! request digest under [`REQUEST_HASH_PROPERTY`]) and flips its direction
//! flag when a cached response short-circuits the pipeline. The surrounding
//! engine owns transport, serialization, and request/response sequencing;
//! this type only carries what the core needs — body bytes, identity-relevant
//! headers, caller identity, and a named-property bag.
//!
//! [`MediationRegistry`] is the process-wide keyed store for shared mediation
//! state: [`CacheManager`](crate::cache::CacheManager) instances addressed by
//! a scope-derived key and [`ThrottleGroup`](crate::throttle::ThrottleGroup)
//! instances addressed by throttle id. It replaces the host engine's untyped
//! configuration-context property bag with explicit, typed ownership: build
//! one registry per deployment, pass it into mediator constructors, and drop
//! it when the deployment unloads. No global singletons.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::cache::CacheManager;
use crate::throttle::ThrottleGroup;

/// Property key under which the cache mediator stashes the request digest.
///
/// The host pipeline must carry properties from a request context to its
/// correlated response context for response-side caching to work.
pub const REQUEST_HASH_PROPERTY: &str = "heimdallr.request_hash";

/// An in-flight message moving through the mediation pipeline.
///
/// Holds the request/response direction flag, the payload bytes, the subset
/// of headers relevant to request identity, the caller's network identity
/// (for throttling), and arbitrary named properties.
#[derive(Debug, Clone)]
pub struct MessageContext {
    message_id: String,
    response: bool,
    body: Vec<u8>,
    headers: BTreeMap<String, String>,
    remote_ip: Option<String>,
    remote_domain: Option<String>,
    properties: HashMap<String, Value>,
    respond_from_cache: bool,
}

impl MessageContext {
    /// Create a request-direction message with the given id and body.
    pub fn request(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            response: false,
            body: body.into(),
            headers: BTreeMap::new(),
            remote_ip: None,
            remote_domain: None,
            properties: HashMap::new(),
            respond_from_cache: false,
        }
    }

    /// Create a response-direction message with the given id and body.
    pub fn response(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut ctx = Self::request(message_id, body);
        ctx.response = true;
        ctx
    }

    /// Attach an identity-relevant header (e.g. a SOAP action).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach the caller's IP address.
    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self {
        self.remote_ip = Some(ip.into());
        self
    }

    /// Attach the caller's resolved domain name.
    pub fn with_remote_domain(mut self, domain: impl Into<String>) -> Self {
        self.remote_domain = Some(domain.into());
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn is_response(&self) -> bool {
        self.response
    }

    /// Flip the direction flag. A cache hit marks the request as a response
    /// before installing the stored payload.
    pub fn set_response(&mut self, response: bool) {
        self.response = response;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace the payload (used when serving a stored response).
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Headers in sorted order (the map is ordered by name).
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn remote_ip(&self) -> Option<&str> {
        self.remote_ip.as_deref()
    }

    pub fn remote_domain(&self) -> Option<&str> {
        self.remote_domain.as_deref()
    }

    /// Get a named property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Get a named property as a string slice, if it is one.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Set a named property.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Remove a named property, returning it if present.
    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    /// Copy all properties onto another context.
    ///
    /// The host pipeline calls this when building the response context for a
    /// correlated request, so the stashed request digest survives the trip.
    pub fn copy_properties_to(&self, other: &mut MessageContext) {
        for (k, v) in &self.properties {
            other.properties.insert(k.clone(), v.clone());
        }
    }

    /// Whether a cache hit asked the host to answer the caller directly
    /// (set when no on-cache-hit continuation is configured).
    pub fn respond_from_cache(&self) -> bool {
        self.respond_from_cache
    }

    pub(crate) fn set_respond_from_cache(&mut self, respond: bool) {
        self.respond_from_cache = respond;
    }
}

/// Process-wide registry of shared mediation state.
///
/// One instance per deployment; its lifecycle bounds the lifecycle of every
/// cache and throttle it holds. Mediators receive the registry by `Arc` at
/// construction and look their state up per message, so two mediators
/// configured with the same id (or the same per-host cache scope) observe
/// the same underlying state — the basis for cluster replication and for
/// finder/collector cache pairs.
///
/// Lookups take a read lock; the get-or-insert slow path re-checks under the
/// write lock so concurrent creators converge on a single instance.
#[derive(Default)]
pub struct MediationRegistry {
    caches: RwLock<HashMap<String, Arc<CacheManager>>>,
    throttles: RwLock<HashMap<String, Arc<ThrottleGroup>>>,
}

impl MediationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cache manager stored under `key`, creating it with `capacity`
    /// if absent.
    ///
    /// The capacity of an existing manager is not changed — first
    /// configuration wins, matching the create-once semantics of the shared
    /// store this replaces.
    pub fn cache_manager(&self, key: &str, capacity: usize) -> Arc<CacheManager> {
        if let Some(manager) = self.caches.read().expect("cache registry poisoned").get(key) {
            return Arc::clone(manager);
        }
        let mut caches = self.caches.write().expect("cache registry poisoned");
        // re-check after taking the write lock
        Arc::clone(
            caches
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CacheManager::new(capacity))),
        )
    }

    /// Get the throttle group for `id`, creating an empty (not-yet-loaded)
    /// group if absent.
    pub fn throttle_group(&self, id: &str) -> Arc<ThrottleGroup> {
        if let Some(group) = self
            .throttles
            .read()
            .expect("throttle registry poisoned")
            .get(id)
        {
            return Arc::clone(group);
        }
        let mut throttles = self.throttles.write().expect("throttle registry poisoned");
        Arc::clone(
            throttles
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(ThrottleGroup::new())),
        )
    }

    /// Remove the cache manager stored under `key`.
    pub fn remove_cache(&self, key: &str) -> Option<Arc<CacheManager>> {
        self.caches
            .write()
            .expect("cache registry poisoned")
            .remove(key)
    }

    /// Remove the throttle group for `id`.
    pub fn remove_throttle(&self, id: &str) -> Option<Arc<ThrottleGroup>> {
        self.throttles
            .write()
            .expect("throttle registry poisoned")
            .remove(id)
    }

    /// Drop all shared state (deployment teardown).
    pub fn clear(&self) {
        self.caches.write().expect("cache registry poisoned").clear();
        self.throttles
            .write()
            .expect("throttle registry poisoned")
            .clear();
    }
}
