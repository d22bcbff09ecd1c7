//! Request digest generation.
//!
//! A digest is the cache key: a deterministic fingerprint of a request's
//! identity-relevant content. Two structurally identical requests (under the
//! configured rules) must map to the same digest, across processes — cached
//! state is replicated, so keys use a stable hash (SHA-256), not a
//! per-process hasher.
//!
//! Digest computation is a pure function of message content: no side
//! effects, no wall-clock dependency. The default [`HashDigest`] hashes the
//! canonicalized body plus any configured headers; [`HeaderDigest`] digests
//! headers only, for services whose routing identity lives entirely in
//! metadata.

use sha2::{Digest, Sha256};

use crate::context::MessageContext;
use crate::{HeimdallrError, Result};

/// A fixed-format cache key derived from request content.
///
/// Hex-encoded SHA-256 — 64 characters, stable across processes and cluster
/// members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestDigest(String);

impl RequestDigest {
    /// Wrap an already-computed digest string.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strategy for mapping a request to its cache key.
///
/// Implementations must be deterministic and side-effect free; failures mean
/// the request's structure was unreadable, and callers degrade to a cache
/// miss.
pub trait DigestGenerator: Send + Sync {
    fn digest(&self, ctx: &MessageContext) -> Result<RequestDigest>;
}

/// Configuration for the default body-hashing digest.
///
/// ```rust
/// # use heimdallr::cache::DigestConfig;
/// let config = DigestConfig::new()
///     .include_header("soap-action")
///     .collapse_whitespace(true);
/// ```
#[derive(Debug, Clone)]
pub struct DigestConfig {
    /// Collapse runs of whitespace in the body before hashing, so
    /// formatting-only differences don't defeat the cache. Requires the body
    /// to be valid UTF-8. Default: true.
    pub collapse_whitespace: bool,
    /// Headers to fold into the digest, by name. Matching is exact; names
    /// are hashed in sorted order regardless of insertion order. Default:
    /// none.
    pub include_headers: Vec<String>,
    /// Reject requests with an empty body instead of digesting them.
    /// Default: false.
    pub require_body: bool,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            collapse_whitespace: true,
            include_headers: Vec::new(),
            require_body: false,
        }
    }
}

impl DigestConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to fold into the digest.
    pub fn include_header(mut self, name: impl Into<String>) -> Self {
        self.include_headers.push(name.into());
        self
    }

    /// Set whether body whitespace runs are collapsed before hashing.
    pub fn collapse_whitespace(mut self, collapse: bool) -> Self {
        self.collapse_whitespace = collapse;
        self
    }

    /// Set whether an empty body is a digest failure.
    pub fn require_body(mut self, require: bool) -> Self {
        self.require_body = require;
        self
    }
}

/// Default digest: SHA-256 over the canonicalized body and configured
/// headers.
///
/// Header name/value pairs are fed to the hasher NUL-delimited and in sorted
/// name order, so `("a", "bc")` and `("ab", "c")` cannot collide and header
/// insertion order is irrelevant.
pub struct HashDigest {
    config: DigestConfig,
}

impl HashDigest {
    pub fn new(config: DigestConfig) -> Self {
        Self { config }
    }
}

impl Default for HashDigest {
    fn default() -> Self {
        Self::new(DigestConfig::default())
    }
}

impl DigestGenerator for HashDigest {
    fn digest(&self, ctx: &MessageContext) -> Result<RequestDigest> {
        if self.config.require_body && ctx.body().is_empty() {
            return Err(HeimdallrError::Digest(
                "request has no body to digest".to_string(),
            ));
        }

        let mut hasher = Sha256::new();

        let mut names: Vec<&str> = self
            .config
            .include_headers
            .iter()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        for name in names {
            if let Some(value) = ctx.header(name) {
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
                hasher.update(value.as_bytes());
                hasher.update([0u8]);
            }
        }

        if self.config.collapse_whitespace {
            let body = std::str::from_utf8(ctx.body()).map_err(|e| {
                HeimdallrError::Digest(format!("request body is not valid UTF-8: {e}"))
            })?;
            let mut first = true;
            for token in body.split_whitespace() {
                if !first {
                    hasher.update(b" ");
                }
                hasher.update(token.as_bytes());
                first = false;
            }
        } else {
            hasher.update(ctx.body());
        }

        Ok(RequestDigest(to_hex(&hasher.finalize())))
    }
}

/// Headers-only digest for requests whose identity lives in metadata.
///
/// Fails if none of the configured headers are present — such a request
/// cannot be classified, and hashing nothing would alias every one of them
/// to a single cache slot.
pub struct HeaderDigest {
    headers: Vec<String>,
}

impl HeaderDigest {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers }
    }
}

impl DigestGenerator for HeaderDigest {
    fn digest(&self, ctx: &MessageContext) -> Result<RequestDigest> {
        let mut names: Vec<&str> = self.headers.iter().map(String::as_str).collect();
        names.sort_unstable();

        let mut hasher = Sha256::new();
        let mut seen = false;
        for name in names {
            if let Some(value) = ctx.header(name) {
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
                hasher.update(value.as_bytes());
                hasher.update([0u8]);
                seen = true;
            }
        }
        if !seen {
            return Err(HeimdallrError::Digest(
                "none of the configured headers are present on the request".to_string(),
            ));
        }
        Ok(RequestDigest(to_hex(&hasher.finalize())))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
