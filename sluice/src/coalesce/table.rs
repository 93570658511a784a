//! Cache and in-flight tables guarded by the coalescer's lock.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FetchResult;

/// Last successful value for a key.
///
/// Never mutated in place; replaced on the next successful write.
#[derive(Debug)]
pub(super) struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// An entry is served only strictly before its expiry.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A producer invocation that has started but not yet settled.
pub(super) struct InFlight<V, E> {
    /// Identifies this invocation among all calls ever made for the key.
    pub id: u64,
    /// Shared by every caller attached to the call.
    pub controller: CancellationToken,
    /// Joiners subscribe here; the driver sends the single outcome.
    pub outcome: broadcast::Sender<FetchResult<V, E>>,
}

pub(super) struct Tables<V, E> {
    pub cache: HashMap<String, CacheEntry<V>>,
    pub in_flight: HashMap<String, InFlight<V, E>>,
    next_id: u64,
}

impl<V, E> Tables<V, E> {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            in_flight: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn next_call_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// The cached value for `key` if it has not expired at `now`.
    pub fn fresh(&self, key: &str, now: Instant) -> Option<&V> {
        self.cache
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| &entry.value)
    }

    /// Remove the in-flight slot for `key` only if it still belongs to call `id`.
    ///
    /// A newer call may have replaced the slot while this one was running.
    pub fn settle(&mut self, key: &str, id: u64) -> bool {
        match self.in_flight.get(key) {
            Some(call) if call.id == id => {
                self.in_flight.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Cancel and remove the in-flight slot for `key`.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.in_flight.remove(key) {
            Some(call) => {
                call.controller.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop cached entries and cancel in-flight calls whose key matches.
    ///
    /// `None` matches every key. Returns `(entries_cleared, calls_cancelled)`.
    pub fn invalidate(&mut self, prefix: Option<&str>) -> (usize, usize) {
        let matches = |key: &str| prefix.map_or(true, |p| key.starts_with(p));

        let cached_before = self.cache.len();
        self.cache.retain(|key, _| !matches(key));
        let cleared = cached_before - self.cache.len();

        let mut cancelled = 0;
        self.in_flight.retain(|key, call| {
            if matches(key) {
                call.controller.cancel();
                cancelled += 1;
                false
            } else {
                true
            }
        });

        (cleared, cancelled)
    }
}
