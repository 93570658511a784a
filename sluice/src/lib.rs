//! Sluice - request coalescing cache with call metrics
//!
//! This library sits between application code and a remote data source. It
//! turns many concurrent, possibly overlapping reads into the minimum number
//! of producer calls, and records per-operation call metrics.
//!
//! - [`Coalescer`] decides whether to serve from cache, join an in-flight
//!   call, or start a new one, and wires up cancellation.
//! - [`MetricsRecorder`] aggregates call counts and durations per operation
//!   name.
//! - [`global`] holds the process-wide default instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sluice::{Coalescer, FetchOptions};
//!
//! # async fn example() -> Result<(), sluice::FetchError<std::io::Error>> {
//! let engine: Coalescer<String, std::io::Error> = Coalescer::new();
//!
//! let body = engine
//!     .get_or_fetch(
//!         "sector:1",
//!         "fetch-sector-members",
//!         |_token| async { Ok("members".to_string()) },
//!         FetchOptions::cached(Duration::from_secs(30)),
//!     )
//!     .await?;
//! assert_eq!(body, "members");
//! # Ok(())
//! # }
//! ```

pub mod coalesce;
pub mod error;
pub mod global;
pub mod metrics;
pub mod types;

pub use coalesce::Coalescer;
pub use error::{FetchError, FetchResult};
pub use metrics::{CallOutcome, MetricSnapshot, MetricsRecorder};
pub use types::FetchOptions;

/// Re-exported so callers can build signals without a direct dependency.
pub use tokio_util::sync::CancellationToken;
