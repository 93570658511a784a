//! Call metrics keyed by logical operation name.
//!
//! Every call that reaches a producer or is served from cache is recorded
//! exactly once under its operation name. Many cache keys usually share one
//! operation name (for example every `sector:{id}` key under
//! `"fetch-sector-members"`), so the recorder reports per-operation totals
//! rather than per-key detail.
//!
//! # Architecture
//!
//! ```text
//! Coalescer ──record()──► MetricsRecorder ──snapshot()──► Vec<MetricSnapshot> ──► Views
//!                         (DashMap entries)               (sorted, point-in-time)   (CLI, logs)
//! ```
//!
//! The recorder is a pure sink: it holds no reference back to the cache.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sluice::metrics::{CallOutcome, MetricsRecorder};
//!
//! let metrics = MetricsRecorder::new();
//! metrics.record("fetch-sector-members", Duration::from_millis(120), CallOutcome::success());
//! metrics.record("fetch-sector-members", Duration::ZERO, CallOutcome::cache_hit());
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot[0].calls, 2);
//! assert_eq!(snapshot[0].cache_hits, 1);
//! ```

mod recorder;
mod snapshot;

pub use recorder::{CallOutcome, MetricsRecorder};
pub use snapshot::MetricSnapshot;
