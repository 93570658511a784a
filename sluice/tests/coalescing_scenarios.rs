//! Integration tests for the coalescing cache and its metrics.
//!
//! These tests drive the public API end to end:
//! - Concurrent callers collapsing onto one producer call
//! - TTL expiry with a paused Tokio clock
//! - Failure propagation to joined callers
//! - Prefix invalidation while calls are in flight
//!
//! Run with: `cargo test --test coalescing_scenarios`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sluice::{CancellationToken, Coalescer, FetchError, FetchOptions, MetricsRecorder};

// ============================================================================
// Helper Functions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Members(Vec<&'static str>);

#[derive(Debug, PartialEq)]
struct ApiError(u16);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "api returned status {}", self.0)
    }
}

type Engine = Coalescer<Arc<Members>, ApiError>;

fn isolated() -> (Engine, Arc<MetricsRecorder>) {
    let metrics = Arc::new(MetricsRecorder::new());
    (Coalescer::with_metrics(Arc::clone(&metrics)), metrics)
}

/// Simulated network fetch: counts invocations and takes `latency` to answer.
fn fetch_members(
    invocations: &Arc<AtomicUsize>,
    latency: Duration,
) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, Result<Arc<Members>, ApiError>> {
    let invocations = Arc::clone(invocations);
    move |token| {
        invocations.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::select! {
                _ = token.cancelled() => Err(ApiError(499)),
                _ = tokio::time::sleep(latency) => {
                    Ok(Arc::new(Members(vec!["AAPL", "MSFT", "NVDA"])))
                }
            }
        })
    }
}

fn failing_fetch(
    invocations: &Arc<AtomicUsize>,
    latency: Duration,
) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, Result<Arc<Members>, ApiError>> {
    let invocations = Arc::clone(invocations);
    move |_token| {
        invocations.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            Err(ApiError(503))
        })
    }
}

const TTL: Duration = Duration::from_millis(30_000);
const LATENCY: Duration = Duration::from_millis(500);

// ============================================================================
// Scenarios
// ============================================================================

/// Two rapid calls while the first is still fetching share one invocation.
#[tokio::test(start_paused = true)]
async fn test_scenario_a_rapid_calls_coalesce() {
    let (engine, metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));
    let options = FetchOptions::cached(TTL);

    let (first, second) = tokio::join!(
        engine.get_or_fetch(
            "sector:1",
            "members",
            fetch_members(&invocations, LATENCY),
            options.clone()
        ),
        engine.get_or_fetch(
            "sector:1",
            "members",
            fetch_members(&invocations, LATENCY),
            options.clone()
        ),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));

    let entry = metrics.get("members").unwrap();
    assert_eq!(entry.calls, 1);
    assert_eq!(entry.success, 1);
    assert_eq!(entry.cache_hits, 0);
}

/// The same call after the TTL has elapsed fetches again.
#[tokio::test(start_paused = true)]
async fn test_scenario_b_expired_entry_refetches() {
    let (engine, metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));

    engine
        .get_or_fetch(
            "sector:1",
            "members",
            fetch_members(&invocations, LATENCY),
            FetchOptions::cached(TTL),
        )
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(40)).await;

    engine
        .get_or_fetch(
            "sector:1",
            "members",
            fetch_members(&invocations, LATENCY),
            FetchOptions::cached(TTL),
        )
        .await
        .unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    let entry = metrics.get("members").unwrap();
    assert_eq!(entry.calls, 2);
    assert_eq!(entry.cache_hits, 0);
}

/// A rejected fetch reaches every caller and leaves the cache empty.
#[tokio::test(start_paused = true)]
async fn test_scenario_c_failure_reaches_all_callers() {
    let (engine, metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));
    let options = FetchOptions::cached(TTL);

    let (original, joined) = tokio::join!(
        engine.get_or_fetch(
            "sector:1",
            "members",
            failing_fetch(&invocations, LATENCY),
            options.clone()
        ),
        engine.get_or_fetch(
            "sector:1",
            "members",
            failing_fetch(&invocations, LATENCY),
            options.clone()
        ),
    );

    assert_eq!(original.unwrap_err().producer_error(), Some(&ApiError(503)));
    assert_eq!(joined.unwrap_err().producer_error(), Some(&ApiError(503)));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(engine.peek("sector:1"), None);
    assert_eq!(engine.cached_len(), 0);

    let entry = metrics.get("members").unwrap();
    assert_eq!(entry.calls, 1);
    assert_eq!(entry.failed, 1);
}

/// Prefix invalidation cancels matching in-flight calls only.
#[tokio::test(start_paused = true)]
async fn test_scenario_d_prefix_invalidation_during_flight() {
    let (engine, _metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));

    let sector = tokio::spawn({
        let engine = engine.clone();
        let fetch = fetch_members(&invocations, LATENCY);
        async move {
            engine
                .get_or_fetch("sector:1", "members", fetch, FetchOptions::cached(TTL))
                .await
        }
    });
    let other = tokio::spawn({
        let engine = engine.clone();
        let fetch = fetch_members(&invocations, LATENCY);
        async move {
            engine
                .get_or_fetch("other:1", "quotes", fetch, FetchOptions::cached(TTL))
                .await
        }
    });

    while engine.in_flight_len() < 2 {
        tokio::task::yield_now().await;
    }

    engine.invalidate(Some("sector:"));
    assert!(!engine.is_in_flight("sector:1"));
    assert!(engine.is_in_flight("other:1"));

    let sector = sector.await.unwrap();
    assert!(matches!(sector, Err(FetchError::Cancelled)));

    let other = other.await.unwrap().unwrap();
    assert_eq!(other.0, vec!["AAPL", "MSFT", "NVDA"]);
    assert!(engine.peek("other:1").is_some());
    assert!(engine.peek("sector:1").is_none());
}

// ============================================================================
// Properties
// ============================================================================

/// Every call issued before expiry counts as exactly one cache hit.
#[tokio::test(start_paused = true)]
async fn test_hits_are_counted_once_per_call() {
    let (engine, metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));

    let original = engine
        .get_or_fetch(
            "sector:7",
            "members",
            fetch_members(&invocations, LATENCY),
            FetchOptions::cached(TTL),
        )
        .await
        .unwrap();

    for _ in 0..10 {
        let cached = engine
            .get_or_fetch(
                "sector:7",
                "members",
                fetch_members(&invocations, LATENCY),
                FetchOptions::cached(TTL),
            )
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&original, &cached));
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let entry = metrics.get("members").unwrap();
    assert_eq!(entry.calls, 11);
    assert_eq!(entry.cache_hits, 10);
    assert!(entry.max >= LATENCY);
}

/// N concurrent callers produce one invocation and one metric record.
#[tokio::test(start_paused = true)]
async fn test_fan_in_emits_one_metric() {
    let (engine, metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..25)
        .map(|_| {
            let engine = engine.clone();
            let fetch = fetch_members(&invocations, LATENCY);
            tokio::spawn(async move {
                engine
                    .get_or_fetch("sector:9", "members", fetch, FetchOptions::default())
                    .await
            })
        })
        .collect();

    let mut values = Vec::new();
    for caller in callers {
        values.push(caller.await.unwrap().unwrap());
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(metrics.get("members").unwrap().calls, 1);
}

/// Invalidating twice is indistinguishable from invalidating once.
#[tokio::test(start_paused = true)]
async fn test_invalidate_twice_equals_once() {
    let (engine, _metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));

    for key in ["sector:1", "sector:2"] {
        engine
            .get_or_fetch(
                key,
                "members",
                fetch_members(&invocations, LATENCY),
                FetchOptions::cached(TTL),
            )
            .await
            .unwrap();
    }

    engine.invalidate(None);
    let after_once = (engine.cached_len(), engine.in_flight_len());
    engine.invalidate(None);
    let after_twice = (engine.cached_len(), engine.in_flight_len());

    assert_eq!(after_once, (0, 0));
    assert_eq!(after_once, after_twice);
}

/// Cancellations are reported distinctly from failures.
#[tokio::test(start_paused = true)]
async fn test_cancel_is_not_a_failure_variant() {
    let (engine, _metrics) = isolated();
    let invocations = Arc::new(AtomicUsize::new(0));
    let signal = CancellationToken::new();

    let caller = tokio::spawn({
        let engine = engine.clone();
        let fetch = fetch_members(&invocations, LATENCY);
        let options = FetchOptions::cached(TTL).with_signal(signal.clone());
        async move { engine.get_or_fetch("sector:3", "members", fetch, options).await }
    });
    while !engine.is_in_flight("sector:3") {
        tokio::task::yield_now().await;
    }

    signal.cancel();
    let err = caller.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.producer_error().is_none());
}
