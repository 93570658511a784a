//! Lock-sharded metrics table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::snapshot::MetricSnapshot;

static GLOBAL_RECORDER: OnceLock<Arc<MetricsRecorder>> = OnceLock::new();

/// Classification of a single recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    /// The call produced a value.
    pub ok: bool,
    /// The value came from the cache table.
    pub cache_hit: bool,
}

impl CallOutcome {
    /// A producer call that succeeded.
    pub const fn success() -> Self {
        Self {
            ok: true,
            cache_hit: false,
        }
    }

    /// A producer call that failed, panicked or was cancelled.
    pub const fn failure() -> Self {
        Self {
            ok: false,
            cache_hit: false,
        }
    }

    /// A call served from the cache table.
    pub const fn cache_hit() -> Self {
        Self {
            ok: true,
            cache_hit: true,
        }
    }
}

/// Accumulated counters for one operation name.
#[derive(Debug, Clone)]
struct MetricEntry {
    /// Insertion order, used to keep ties stable in snapshots.
    seq: u64,
    calls: u64,
    success: u64,
    failed: u64,
    cache_hits: u64,
    total: Duration,
    max: Duration,
    last: Duration,
    last_at: DateTime<Utc>,
}

impl MetricEntry {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            calls: 0,
            success: 0,
            failed: 0,
            cache_hits: 0,
            total: Duration::ZERO,
            max: Duration::ZERO,
            last: Duration::ZERO,
            last_at: DateTime::<Utc>::default(),
        }
    }

    fn apply(&mut self, duration: Duration, outcome: CallOutcome) {
        self.calls += 1;
        self.total = self.total.saturating_add(duration);
        self.max = self.max.max(duration);
        self.last = duration;
        self.last_at = Utc::now();

        if outcome.ok {
            self.success += 1;
        } else {
            self.failed += 1;
        }
        if outcome.cache_hit {
            self.cache_hits += 1;
        }
    }

    fn to_snapshot(&self, name: &str) -> MetricSnapshot {
        MetricSnapshot {
            name: name.to_string(),
            calls: self.calls,
            success: self.success,
            failed: self.failed,
            cache_hits: self.cache_hits,
            total: self.total,
            max: self.max,
            last: self.last,
            last_at: self.last_at,
        }
    }
}

/// Process-wide call metrics, keyed by operation name.
///
/// Entries are created lazily on first observation and live until
/// [`clear`](Self::clear). All counters are monotonically non-decreasing
/// between clears. Average duration is derived at snapshot time, never
/// stored.
///
/// Recording is synchronous and infallible; it is safe to call from any
/// task or thread.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    entries: DashMap<String, MetricEntry>,
    next_seq: AtomicU64,
}

impl MetricsRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the shared process-wide recorder.
    ///
    /// Engines created with [`Coalescer::new`](crate::Coalescer::new) record
    /// here.
    pub fn global() -> Arc<MetricsRecorder> {
        Arc::clone(GLOBAL_RECORDER.get_or_init(|| Arc::new(MetricsRecorder::new())))
    }

    /// Record one completed call.
    pub fn record(&self, name: &str, duration: Duration, outcome: CallOutcome) {
        // Fast path avoids allocating the key for names already present.
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.apply(duration, outcome);
            return;
        }

        self.entries
            .entry(name.to_string())
            .or_insert_with(|| MetricEntry::new(self.next_seq.fetch_add(1, Ordering::Relaxed)))
            .apply(duration, outcome);
    }

    /// Record one completed call with a duration in fractional milliseconds.
    ///
    /// Negative and NaN durations are recorded as zero. Durations too large
    /// for [`Duration`] saturate at [`Duration::MAX`].
    pub fn record_ms(&self, name: &str, duration_ms: f64, outcome: CallOutcome) {
        let duration = if duration_ms > 0.0 {
            Duration::try_from_secs_f64(duration_ms / 1000.0).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        self.record(name, duration, outcome);
    }

    /// Point-in-time copy of every entry.
    ///
    /// Ordered by total call count, highest first. Entries with equal call
    /// counts keep the order in which their names were first recorded.
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        let mut rows: Vec<(u64, MetricSnapshot)> = self
            .entries
            .iter()
            .map(|entry| (entry.seq, entry.to_snapshot(entry.key())))
            .collect();

        // DashMap iteration order is arbitrary: restore insertion order
        // first, then stable-sort by call count.
        rows.sort_by_key(|(seq, _)| *seq);
        rows.sort_by(|(_, a), (_, b)| b.calls.cmp(&a.calls));

        rows.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Snapshot of a single operation, if it has been recorded.
    pub fn get(&self, name: &str) -> Option<MetricSnapshot> {
        self.entries.get(name).map(|entry| entry.to_snapshot(name))
    }

    /// Number of distinct operation names recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded since the last clear.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
