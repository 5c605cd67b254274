//! Hvergelmir error types

/// Errors surfaced by [`SubscriptionCache`](crate::SubscriptionCache).
///
/// Generic over the [`StreamSource`](crate::StreamSource) error so that
/// collaborator failures reach the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError<E> {
    /// Creating the underlying stream failed.
    ///
    /// Seen by the caller whose miss started the creation, and by any caller
    /// that hit the entry while its stream was still pending.
    #[error("stream creation failed: {0}")]
    Create(E),

    /// The cache-hit hook failed for an already live stream.
    ///
    /// The caller's reference stays counted; it is released by that caller's
    /// cancellation signal like any other.
    #[error("cache hit hook failed: {0}")]
    CacheHit(E),

    /// An abort fired for a key whose entry was never torn down.
    #[error("stale abort: {0}")]
    StaleAbort(String),

    /// A cached acquisition ran outside a current-thread tokio runtime.
    ///
    /// Entry bookkeeping relies on callers, abort listeners and deferred
    /// purges sharing one thread. Nothing was inserted or created.
    #[error("subscription cache needs a current-thread tokio runtime, found {0}")]
    UnsupportedRuntime(String),
}

impl<E> SubscriptionError<E> {
    /// The collaborator error, if this error carries one.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::Create(e) | Self::CacheHit(e) => Some(e),
            Self::StaleAbort(_) | Self::UnsupportedRuntime(_) => None,
        }
    }

    /// Whether a fresh `acquire` for the same key will retry creation.
    ///
    /// True for creation failures: the half-formed entry is removed before the
    /// error is returned, so the cache is never poisoned.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Create(_))
    }
}

/// Errors from the [`short_u16`](crate::codec::short_u16) codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("value {value} out of range for {codec} [{min}, {max}]")]
    OutOfRange {
        codec: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("input truncated at byte offset {offset}")]
    Truncated { offset: usize },

    #[error("encoded value overflows {codec} at byte offset {offset}")]
    Overflow { codec: &'static str, offset: usize },
}

/// Result type alias for cache operations.
pub type Result<T, E> = std::result::Result<T, SubscriptionError<E>>;
