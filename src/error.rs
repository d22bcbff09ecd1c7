//! Heimdallr error types

/// Heimdallr error types
#[derive(Debug, thiserror::Error)]
pub enum HeimdallrError {
    /// The request's structure could not be read for digest computation.
    ///
    /// Callers on the caching path treat this as a cache miss and pass the
    /// message through — caching is advisory, delivery is not.
    #[error("digest error: {0}")]
    Digest(String),

    /// A throttle policy is missing, unreadable, or invalid.
    ///
    /// Unlike digest failures, policy failures abort admission: an invalid
    /// policy is a configuration bug and must surface to the operator.
    #[error("throttle policy error: {0}")]
    Policy(String),

    /// Cluster state propagation failed.
    ///
    /// Replication is best-effort; mediators log this and keep the local
    /// mutation.
    #[error("replication error: {0}")]
    Replication(String),

    /// The cache is at capacity and holds no expired entries to purge.
    ///
    /// Not an error to the message path — the request simply isn't cached.
    #[error("cache is full")]
    CacheFull,

    /// A mediator was wired up in a way its role does not allow.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A named continuation sequence could not be resolved.
    #[error("sequence not found: {0}")]
    SequenceNotFound(String),

    /// Malformed input to a core operation (e.g. an empty caller key).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for heimdallr operations
pub type Result<T> = std::result::Result<T, HeimdallrError>;
