//! Request coalescing cache.
//!
//! The [`Coalescer`] sits between callers and an opaque asynchronous
//! producer (typically a network fetch). For every request it decides
//! whether to:
//! - serve a fresh value from the cache table,
//! - join a call already in flight for the same key, or
//! - start a new producer call.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Coalescer                              │
//! │                                                                  │
//! │  get_or_fetch ──► ┌─────────────┐                                │
//! │                   │ Cache Check │──► Fresh ──► Return (hit metric)│
//! │                   └──────┬──────┘                                │
//! │                          │ Miss / stale                          │
//! │                          ▼                                       │
//! │                   ┌─────────────┐                                │
//! │                   │  In-flight  │──► Found ──► Subscribe, wait   │
//! │                   └──────┬──────┘                                │
//! │                          │ None                                  │
//! │                          ▼                                       │
//! │                   ┌─────────────┐                                │
//! │                   │   Driver    │──► Run producer (spawned task) │
//! │                   └──────┬──────┘                                │
//! │                          ▼                                       │
//! │          metric ─► cache write ─► settle slot ─► broadcast        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cache check and in-flight registration happen under one
//! synchronous lock with no suspension point, so two concurrent callers can
//! never both start a producer for the same key while deduplication is on.
//!
//! # Cancellation
//!
//! Each producer call owns one [`CancellationToken`] controller shared by
//! every attached caller. The originating caller's signal, when supplied,
//! is wired as the controller's parent, so cancelling it cancels the call for
//! all joiners. A joiner's own signal only stops that joiner waiting.
//! Cancellation is cooperative: the producer receives the controller and
//! should stop its own work when it fires.
//!
//! # Example
//!
//! ```ignore
//! use sluice::{Coalescer, FetchOptions};
//! use std::time::Duration;
//!
//! let engine: Coalescer<Members, ApiError> = Coalescer::new();
//!
//! let members = engine
//!     .get_or_fetch(
//!         "sector:1",
//!         "fetch-sector-members",
//!         |token| api.sector_members(1, token),
//!         FetchOptions::cached(Duration::from_secs(30)),
//!     )
//!     .await?;
//! ```

mod table;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchResult};
use crate::metrics::{CallOutcome, MetricsRecorder};
use crate::types::FetchOptions;

use table::{CacheEntry, InFlight, Tables};

/// Upper bound for cache lifetimes that would overflow the clock.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// What the synchronous admission step decided for a request.
enum Admission<V, E> {
    /// Fresh value served from the cache table.
    Hit(V),
    /// Attached to an existing in-flight call.
    Joined(broadcast::Receiver<FetchResult<V, E>>),
    /// A new producer call was started.
    Started(broadcast::Receiver<FetchResult<V, E>>),
}

/// Coalescing cache over values of type `V` produced with errors of type `E`.
///
/// Cloning is cheap: clones share the same cache, in-flight table and
/// metrics recorder.
///
/// # Type Parameters
///
/// * `V` - Cached value; cloned out to every caller. Wrap large payloads in
///   `Arc` so clones stay cheap and identical.
/// * `E` - Producer error; shared between joined callers behind an `Arc`.
pub struct Coalescer<V, E> {
    tables: Arc<Mutex<Tables<V, E>>>,
    metrics: Arc<MetricsRecorder>,
}

impl<V, E> Clone for Coalescer<V, E> {
    fn clone(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<V, E> fmt::Debug for Coalescer<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("Coalescer")
            .field("cached", &tables.cache.len())
            .field("in_flight", &tables.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl<V, E> Default for Coalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Coalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    /// Create an empty engine that records into the process-wide metrics.
    pub fn new() -> Self {
        Self::with_metrics(MetricsRecorder::global())
    }

    /// Create an empty engine that records into `metrics`.
    ///
    /// Tests use this to get isolated counters.
    pub fn with_metrics(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::new())),
            metrics,
        }
    }

    /// The recorder this engine reports to.
    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Return a fresh cached value, join an in-flight call, or start a new one.
    ///
    /// # Arguments
    ///
    /// * `key` - Opaque cache key, unique per query and parameters
    /// * `operation` - Metrics bucket for this call
    /// * `producer` - Invoked with the call's cancellation controller when a
    ///   new call is needed
    /// * `options` - Cache lifetime, cache/dedupe switches and caller signal
    ///
    /// # Errors
    ///
    /// - `FetchError::Failed` with the producer's own error, shared by every
    ///   joined caller
    /// - `FetchError::Cancelled` if the call or this caller was cancelled
    /// - `FetchError::Panicked` if the producer panicked
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime; the producer runs on a spawned
    /// task so bookkeeping completes even if every caller stops waiting.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        operation: &str,
        producer: F,
        options: FetchOptions,
    ) -> FetchResult<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        debug_assert!(!key.is_empty(), "cache key must not be empty");

        match self.admit(key, operation, producer, &options) {
            Admission::Hit(value) => Ok(value),
            Admission::Joined(receiver) | Admission::Started(receiver) => {
                Self::wait(receiver, options.signal.as_ref()).await
            }
        }
    }

    /// Cancel and forget the in-flight call for `key`, if any.
    ///
    /// Every caller attached to the call receives `FetchError::Cancelled`.
    /// The cache table is untouched.
    pub fn cancel(&self, key: &str) {
        if self.tables.lock().cancel(key) {
            debug!(key, "Cancelled in-flight call");
        }
    }

    /// Drop cached values and cancel in-flight calls.
    ///
    /// With `None`, everything is cleared. With `Some(prefix)`, only keys
    /// starting with `prefix` are affected. Controllers are cancelled before
    /// their slots are removed. Idempotent.
    pub fn invalidate(&self, prefix: Option<&str>) {
        let (cleared, cancelled) = self.tables.lock().invalidate(prefix);
        info!(
            prefix = prefix.unwrap_or("*"),
            cleared, cancelled, "Cache invalidated"
        );
    }

    /// Fresh cached value for `key`, without recording a metric.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.tables.lock().fresh(key, Instant::now()).cloned()
    }

    /// Number of entries in the cache table, including stale ones.
    pub fn cached_len(&self) -> usize {
        self.tables.lock().cache.len()
    }

    /// Number of calls currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.tables.lock().in_flight.len()
    }

    /// Returns true if a call for `key` is in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.tables.lock().in_flight.contains_key(key)
    }

    /// Decide how to serve a request. Holds the lock for the whole decision
    /// and never suspends.
    fn admit<F, Fut>(
        &self,
        key: &str,
        operation: &str,
        producer: F,
        options: &FetchOptions,
    ) -> Admission<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut tables = self.tables.lock();

        let cached = if options.caching_enabled() {
            tables.fresh(key, Instant::now()).cloned()
        } else {
            None
        };
        if let Some(value) = cached {
            drop(tables);
            self.metrics
                .record(operation, Duration::ZERO, CallOutcome::cache_hit());
            debug!(key, operation, "Cache hit");
            return Admission::Hit(value);
        }

        if options.dedupe_in_flight {
            if let Some(call) = tables.in_flight.get(key) {
                debug!(key, operation, call_id = call.id, "Joined in-flight call");
                return Admission::Joined(call.outcome.subscribe());
            }
        }

        let id = tables.next_call_id();
        let controller = match &options.signal {
            Some(signal) => signal.child_token(),
            None => CancellationToken::new(),
        };
        let (outcome, receiver) = broadcast::channel(1);
        let replaced = tables.in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                controller: controller.clone(),
                outcome: outcome.clone(),
            },
        );
        drop(tables);

        debug!(
            key,
            operation,
            call_id = id,
            replaced = replaced.is_some(),
            "Starting producer call"
        );

        let started = Instant::now();
        let work = match panic::catch_unwind(AssertUnwindSafe(|| producer(controller.clone()))) {
            Ok(work) => work,
            Err(_) => {
                self.tables.lock().settle(key, id);
                self.metrics
                    .record(operation, started.elapsed(), CallOutcome::failure());
                warn!(key, operation, call_id = id, "Producer panicked before starting");
                // Joiners that attached after the slot was registered are
                // still subscribed.
                let _ = outcome.send(Err(FetchError::Panicked));
                return Admission::Started(receiver);
            }
        };
        let driver = Driver {
            tables: Arc::clone(&self.tables),
            metrics: Arc::clone(&self.metrics),
            key: key.to_string(),
            operation: operation.to_string(),
            id,
            controller,
            ttl: options.caching_enabled().then_some(options.ttl),
            started,
        };
        tokio::spawn(driver.run(work, outcome));

        Admission::Started(receiver)
    }

    /// Wait for a call's outcome, or for the caller's own signal.
    async fn wait(
        mut receiver: broadcast::Receiver<FetchResult<V, E>>,
        signal: Option<&CancellationToken>,
    ) -> FetchResult<V, E> {
        let received = match signal {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(FetchError::Cancelled),
                received = receiver.recv() => received,
            },
            None => receiver.recv().await,
        };

        // The driver always sends before dropping its sender unless the
        // runtime is shutting down.
        received.unwrap_or(Err(FetchError::Cancelled))
    }
}

/// Runs one producer call to completion and settles its bookkeeping.
struct Driver<V, E> {
    tables: Arc<Mutex<Tables<V, E>>>,
    metrics: Arc<MetricsRecorder>,
    key: String,
    operation: String,
    id: u64,
    controller: CancellationToken,
    /// Cache lifetime when caching is enabled for this call.
    ttl: Option<Duration>,
    started: Instant,
}

impl<V, E> Driver<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    async fn run<Fut>(self, work: Fut, outcome: broadcast::Sender<FetchResult<V, E>>)
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let settled = tokio::select! {
            biased;
            _ = self.controller.cancelled() => Err(FetchError::Cancelled),
            settled = AssertUnwindSafe(work).catch_unwind() => match settled {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(FetchError::Failed(Arc::new(e))),
                Err(_) => Err(FetchError::Panicked),
            },
        };
        let elapsed = self.started.elapsed();

        let result = {
            let mut tables = self.tables.lock();
            // A cancel or invalidate that landed after the producer finished
            // still wins: the value is neither cached nor delivered.
            let result = match settled {
                Ok(_) if self.controller.is_cancelled() => Err(FetchError::Cancelled),
                other => other,
            };
            if let (Ok(value), Some(ttl)) = (&result, self.ttl) {
                let now = Instant::now();
                tables.cache.insert(
                    self.key.clone(),
                    CacheEntry {
                        value: value.clone(),
                        expires_at: now + ttl.min(MAX_TTL),
                    },
                );
            }
            tables.settle(&self.key, self.id);
            result
        };

        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(_) => {
                self.metrics
                    .record(&self.operation, elapsed, CallOutcome::success());
                debug!(
                    key = %self.key,
                    operation = %self.operation,
                    call_id = self.id,
                    duration_ms,
                    cached = self.ttl.is_some(),
                    "Producer call succeeded"
                );
            }
            Err(FetchError::Cancelled) => {
                self.metrics
                    .record(&self.operation, elapsed, CallOutcome::failure());
                debug!(
                    key = %self.key,
                    operation = %self.operation,
                    call_id = self.id,
                    duration_ms,
                    "Producer call cancelled"
                );
            }
            Err(e) => {
                self.metrics
                    .record(&self.operation, elapsed, CallOutcome::failure());
                warn!(
                    key = %self.key,
                    operation = %self.operation,
                    call_id = self.id,
                    duration_ms,
                    error = %e,
                    "Producer call failed"
                );
            }
        }

        // No receivers left is fine: every caller may have stopped waiting.
        let _ = outcome.send(result);
    }
}
