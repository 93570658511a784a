//! Point-in-time view of one operation's metrics.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Copy of the counters for one operation name, as returned by
/// [`MetricsRecorder::snapshot`](super::MetricsRecorder::snapshot).
///
/// Serializes with durations as fractional milliseconds and the derived
/// average included as `average_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    /// Operation name.
    pub name: String,
    /// Total recorded calls (successes plus failures).
    pub calls: u64,
    /// Calls that produced a value, including cache hits.
    pub success: u64,
    /// Calls that failed, panicked or were cancelled.
    pub failed: u64,
    /// Calls served from the cache table.
    pub cache_hits: u64,
    /// Sum of all recorded durations.
    pub total: Duration,
    /// Longest recorded duration.
    pub max: Duration,
    /// Duration of the most recent call.
    pub last: Duration,
    /// Wall-clock time of the most recent call.
    pub last_at: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Mean duration across all recorded calls, cache hits included.
    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.calls);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Fraction of calls served from cache, in `0.0..=1.0`.
    pub fn hit_ratio(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.calls as f64
    }
}

impl Serialize for MetricSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_struct("MetricSnapshot", 10)?;
        row.serialize_field("name", &self.name)?;
        row.serialize_field("calls", &self.calls)?;
        row.serialize_field("success", &self.success)?;
        row.serialize_field("failed", &self.failed)?;
        row.serialize_field("cache_hits", &self.cache_hits)?;
        row.serialize_field("total_ms", &millis(self.total))?;
        row.serialize_field("average_ms", &millis(self.average()))?;
        row.serialize_field("max_ms", &millis(self.max))?;
        row.serialize_field("last_ms", &millis(self.last))?;
        row.serialize_field("last_at", &self.last_at)?;
        row.end()
    }
}

impl fmt::Display for MetricSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} calls ({} ok, {} failed, {} cached), avg {:.1}ms, max {:.1}ms, last {:.1}ms",
            self.name,
            self.calls,
            self.success,
            self.failed,
            self.cache_hits,
            millis(self.average()),
            millis(self.max),
            millis(self.last)
        )
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricSnapshot {
        MetricSnapshot {
            name: "fetch-sector-members".to_string(),
            calls: 4,
            success: 3,
            failed: 1,
            cache_hits: 2,
            total: Duration::from_millis(1000),
            max: Duration::from_millis(600),
            last: Duration::ZERO,
            last_at: DateTime::<Utc>::default(),
        }
    }

    #[test]
    fn test_average_is_derived() {
        assert_eq!(sample().average(), Duration::from_millis(250));
    }

    #[test]
    fn test_average_of_empty_entry_is_zero() {
        let mut snapshot = sample();
        snapshot.calls = 0;
        assert_eq!(snapshot.average(), Duration::ZERO);
        assert_eq!(snapshot.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio() {
        assert!((sample().hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display() {
        let display = sample().to_string();
        assert!(display.starts_with("fetch-sector-members: 4 calls"));
        assert!(display.contains("1 failed"));
        assert!(display.contains("avg 250.0ms"));
        assert!(display.contains("max 600.0ms"));
    }

    #[test]
    fn test_serializes_durations_as_millis() {
        let snapshot = sample();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["name"], "fetch-sector-members");
        assert_eq!(json["calls"], 4);
        assert_eq!(json["total_ms"], 1000.0);
        assert_eq!(json["max_ms"], 600.0);
        assert_eq!(json["average_ms"], 250.0);
    }
}
