//! Per-call options for the coalescing cache.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Options controlling a single `get_or_fetch` call.
///
/// The defaults disable caching (`ttl` of zero) but keep in-flight
/// deduplication enabled, so an uncached call still coalesces with any
/// concurrent call for the same key.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sluice::FetchOptions;
///
/// let options = FetchOptions::default().with_ttl(Duration::from_secs(30));
/// assert!(options.caching_enabled());
///
/// let bypass = options.clone().without_cache();
/// assert!(!bypass.caching_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Cache lifetime for a successful result. Zero disables caching.
    pub ttl: Duration,

    /// Whether the cache table may be read or written for this call.
    pub allow_cache: bool,

    /// Whether to join an existing in-flight call for the same key.
    pub dedupe_in_flight: bool,

    /// External cancellation signal for this caller.
    pub signal: Option<CancellationToken>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::ZERO,
            allow_cache: true,
            dedupe_in_flight: true,
            signal: None,
        }
    }
}

impl FetchOptions {
    /// Options that cache a successful result for `ttl`.
    pub fn cached(ttl: Duration) -> Self {
        Self::default().with_ttl(ttl)
    }

    /// Set the cache lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the cache lifetime in milliseconds.
    pub fn with_ttl_ms(self, ttl_ms: u64) -> Self {
        self.with_ttl(Duration::from_millis(ttl_ms))
    }

    /// Neither read nor write the cache table for this call.
    pub fn without_cache(mut self) -> Self {
        self.allow_cache = false;
        self
    }

    /// Always start a new producer call, even if one is in flight.
    pub fn without_dedupe(mut self) -> Self {
        self.dedupe_in_flight = false;
        self
    }

    /// Attach an external cancellation signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// True when results of this call are read from and written to the cache.
    pub fn caching_enabled(&self) -> bool {
        self.allow_cache && !self.ttl.is_zero()
    }
}
