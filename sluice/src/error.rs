//! Error types surfaced by the coalescing cache.
//!
//! The engine never wraps, retries or suppresses producer failures. A failed
//! producer's error is placed behind an `Arc` once and the same allocation is
//! handed to every caller that joined the call, so joiners observe the exact
//! outcome of the original invocation rather than a re-derived copy.
//!
//! Cancellation is a separate variant so that UI layers can drop superseded
//! requests silently while still reporting genuine failures.

use std::sync::Arc;

use thiserror::Error;

/// Outcome of a call to [`Coalescer::get_or_fetch`](crate::Coalescer::get_or_fetch).
pub type FetchResult<V, E> = Result<V, FetchError<E>>;

/// Errors returned to callers of the coalescing cache.
#[derive(Debug, Error)]
pub enum FetchError<E> {
    /// The producer failed. The error is passed through unchanged.
    #[error("producer failed: {0}")]
    Failed(Arc<E>),

    /// The call was cancelled before it settled.
    ///
    /// Either the shared controller for the in-flight call fired (explicit
    /// `cancel`, `invalidate`, or the originating caller's signal), or the
    /// waiting caller's own signal fired.
    #[error("call was cancelled")]
    Cancelled,

    /// The producer panicked while running.
    #[error("producer panicked")]
    Panicked,
}

impl<E> FetchError<E> {
    /// Returns true if this outcome is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Returns the producer's original error, if the producer failed.
    pub fn producer_error(&self) -> Option<&E> {
        match self {
            FetchError::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Returns the shared handle to the producer's error.
    ///
    /// Every joined caller receives a clone of the same `Arc`.
    pub fn shared_error(&self) -> Option<&Arc<E>> {
        match self {
            FetchError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

// Clones share the producer error; `E` itself need not be `Clone`.
impl<E> Clone for FetchError<E> {
    fn clone(&self) -> Self {
        match self {
            FetchError::Failed(e) => FetchError::Failed(Arc::clone(e)),
            FetchError::Cancelled => FetchError::Cancelled,
            FetchError::Panicked => FetchError::Panicked,
        }
    }
}

impl<E: PartialEq> PartialEq for FetchError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FetchError::Failed(a), FetchError::Failed(b)) => a == b,
            (FetchError::Cancelled, FetchError::Cancelled) => true,
            (FetchError::Panicked, FetchError::Panicked) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct UpstreamError(&'static str);

    impl std::fmt::Display for UpstreamError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "upstream: {}", self.0)
        }
    }

    #[test]
    fn test_failed_display_includes_producer_error() {
        let err = FetchError::Failed(Arc::new(UpstreamError("503")));
        assert_eq!(err.to_string(), "producer failed: upstream: 503");
    }

    #[test]
    fn test_cancelled_is_distinct_from_failure() {
        let cancelled: FetchError<UpstreamError> = FetchError::Cancelled;
        assert!(cancelled.is_cancelled());
        assert!(cancelled.producer_error().is_none());

        let failed = FetchError::Failed(Arc::new(UpstreamError("boom")));
        assert!(!failed.is_cancelled());
        assert_eq!(failed.producer_error(), Some(&UpstreamError("boom")));
    }

    #[test]
    fn test_clone_shares_the_same_error() {
        let err = FetchError::Failed(Arc::new(UpstreamError("timeout")));
        let cloned = err.clone();

        let a = err.shared_error().unwrap();
        let b = cloned.shared_error().unwrap();
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn test_panicked_is_not_cancellation() {
        let err: FetchError<UpstreamError> = FetchError::Panicked;
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "producer panicked");
    }
}
