//! `sluice demo-invalidate` - prefix invalidation against in-flight calls.
//!
//! Starts slow calls under two key prefixes, invalidates one prefix while
//! they are still running, and reports how each call settled. Calls under
//! the invalidated prefix end as cancelled; the others complete and are
//! cached.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use sluice::{global, FetchOptions};
use tracing::info;

use super::simulate::ItemEngine;
use super::upstream::{Upstream, UpstreamError};
use crate::error::CliError;

const OPERATION: &str = "demo-fetch";
const PREFIXES: [&str; 2] = ["sector:", "quote:"];

/// Arguments for `sluice demo-invalidate`.
#[derive(Debug, Args)]
pub struct InvalidateArgs {
    /// Calls started under each prefix
    #[arg(long, default_value_t = 3)]
    pub per_prefix: usize,

    /// Upstream latency per invocation in milliseconds
    #[arg(long, default_value_t = 500)]
    pub latency_ms: u64,

    /// Delay before invalidating, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub after_ms: u64,

    /// Prefix to invalidate (`sector:` or `quote:`)
    #[arg(long, default_value = "sector:")]
    pub prefix: String,
}

/// How a single demo call settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for Settled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Settled::Completed => write!(f, "completed"),
            Settled::Cancelled => write!(f, "cancelled"),
            Settled::Failed => write!(f, "failed"),
        }
    }
}

/// Per-key outcome of the demo, in start order.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoReport {
    pub prefix: String,
    pub calls: Vec<(String, Settled)>,
    pub cached: Vec<String>,
}

impl DemoReport {
    pub fn count(&self, settled: Settled) -> usize {
        self.calls.iter().filter(|(_, s)| *s == settled).count()
    }
}

/// Run `sluice demo-invalidate` against the process-wide engine.
pub async fn run(args: InvalidateArgs) -> Result<(), CliError> {
    if !PREFIXES.contains(&args.prefix.as_str()) {
        return Err(CliError::Config(format!(
            "--prefix must be one of {:?}, got {:?}",
            PREFIXES, args.prefix
        )));
    }
    if args.after_ms >= args.latency_ms {
        return Err(CliError::Config(
            "--after-ms must be shorter than --latency-ms".to_string(),
        ));
    }

    let engine = global::coalescer::<Arc<String>, UpstreamError>();
    let report = demo(&engine, &args, |prefix| global::invalidate_all(Some(prefix))).await?;

    println!("Invalidated prefix: {}", report.prefix);
    println!();
    for (key, settled) in &report.calls {
        println!("  {:<12} {}", key, settled);
    }
    println!();
    println!(
        "{} completed, {} cancelled, {} failed; cached keys: {}",
        report.count(Settled::Completed),
        report.count(Settled::Cancelled),
        report.count(Settled::Failed),
        report.cached.join(", ")
    );
    Ok(())
}

/// Start the demo calls on `engine` and invalidate `args.prefix` midway.
pub async fn demo<I>(
    engine: &ItemEngine,
    args: &InvalidateArgs,
    invalidate: I,
) -> Result<DemoReport, CliError>
where
    I: FnOnce(&str),
{
    let upstream = Arc::new(Upstream::new(Duration::from_millis(args.latency_ms), None));
    let options = FetchOptions::cached(Duration::from_secs(60));

    let keys: Vec<String> = PREFIXES
        .iter()
        .flat_map(|prefix| (0..args.per_prefix).map(move |n| format!("{}{}", prefix, n)))
        .collect();

    let calls: Vec<_> = keys
        .iter()
        .map(|key| {
            let engine = engine.clone();
            let upstream = Arc::clone(&upstream);
            let key = key.clone();
            let options = options.clone();
            tokio::spawn(async move {
                let producer_key = key.clone();
                engine
                    .get_or_fetch(
                        &key,
                        OPERATION,
                        move |token| upstream.fetch(producer_key, token),
                        options,
                    )
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(args.after_ms)).await;
    info!(
        prefix = %args.prefix,
        in_flight = engine.in_flight_len(),
        "Invalidating prefix"
    );
    invalidate(&args.prefix);

    let mut settled = Vec::with_capacity(keys.len());
    for (key, call) in keys.iter().zip(calls) {
        let outcome = match call.await? {
            Ok(_) => Settled::Completed,
            Err(e) if e.is_cancelled() => Settled::Cancelled,
            Err(_) => Settled::Failed,
        };
        settled.push((key.clone(), outcome));
    }

    let cached = keys
        .iter()
        .filter(|key| engine.peek(key).is_some())
        .cloned()
        .collect();

    Ok(DemoReport {
        prefix: args.prefix.clone(),
        calls: settled,
        cached,
    })
}
