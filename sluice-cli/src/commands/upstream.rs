//! Simulated upstream data source.
//!
//! Stands in for a remote API: every invocation takes a fixed latency,
//! watches its cancellation token while waiting, and can be configured to
//! fail on a fixed schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sluice::CancellationToken;
use thiserror::Error;
use tracing::debug;

/// Errors produced by the simulated upstream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    /// Scheduled failure.
    #[error("upstream unavailable (invocation {invocation})")]
    Unavailable { invocation: u64 },

    /// The call's token fired before the response arrived.
    #[error("request abandoned (invocation {invocation})")]
    Abandoned { invocation: u64 },
}

/// Fake remote source counting how often it is actually hit.
#[derive(Debug)]
pub struct Upstream {
    invocations: AtomicU64,
    latency: Duration,
    fail_every: Option<u64>,
}

impl Upstream {
    pub fn new(latency: Duration, fail_every: Option<u64>) -> Self {
        Self {
            invocations: AtomicU64::new(0),
            latency,
            fail_every,
        }
    }

    /// Number of times the upstream has been invoked.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Answer a request for `key`.
    pub async fn fetch(
        self: Arc<Self>,
        key: String,
        token: CancellationToken,
    ) -> Result<Arc<String>, UpstreamError> {
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(key = %key, invocation, "Upstream request started");

        tokio::select! {
            _ = token.cancelled() => {
                debug!(key = %key, invocation, "Upstream request abandoned");
                return Err(UpstreamError::Abandoned { invocation });
            }
            _ = tokio::time::sleep(self.latency) => {}
        }

        if fails_on(invocation, self.fail_every) {
            return Err(UpstreamError::Unavailable { invocation });
        }
        Ok(Arc::new(format!("{}#{}", key, invocation)))
    }
}

/// Whether the `invocation`-th call (1-based) is scheduled to fail.
pub fn fails_on(invocation: u64, fail_every: Option<u64>) -> bool {
    match fail_every {
        Some(n) if n > 0 => invocation % n == 0,
        _ => false,
    }
}
