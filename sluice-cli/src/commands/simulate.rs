//! `sluice simulate` - concurrent workload against the coalescing cache.
//!
//! Each round spawns `callers` tasks that request `keys` distinct keys
//! (`item:0`, `item:1`, ...) at the same time. With deduplication on, each
//! key reaches the upstream at most once per round; with caching on, later
//! rounds inside the TTL are served without touching the upstream at all.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use sluice::{global, Coalescer, FetchOptions};
use tracing::info;

use super::report;
use super::upstream::{Upstream, UpstreamError};
use crate::error::CliError;

/// Metric name the simulated calls are recorded under.
pub const OPERATION: &str = "fetch-item";

const DEFAULT_KEYS: usize = 4;
const DEFAULT_CALLERS: usize = 16;
const DEFAULT_ROUNDS: u32 = 3;
const DEFAULT_LATENCY_MS: u64 = 200;
const DEFAULT_TTL_MS: u64 = 1_000;

/// Engine type used by the simulated workload.
pub type ItemEngine = Coalescer<Arc<String>, UpstreamError>;

/// Arguments for `sluice simulate`.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Distinct keys requested each round
    #[arg(long, default_value_t = DEFAULT_KEYS)]
    pub keys: usize,

    /// Concurrent callers per round
    #[arg(long, default_value_t = DEFAULT_CALLERS)]
    pub callers: usize,

    /// Number of rounds
    #[arg(long, default_value_t = DEFAULT_ROUNDS)]
    pub rounds: u32,

    /// Upstream latency per invocation in milliseconds
    #[arg(long, default_value_t = DEFAULT_LATENCY_MS)]
    pub latency_ms: u64,

    /// Cache TTL in milliseconds (0 disables caching)
    #[arg(long, default_value_t = DEFAULT_TTL_MS)]
    pub ttl_ms: u64,

    /// Fail every Nth upstream invocation (0 never fails)
    #[arg(long, default_value_t = 0)]
    pub fail_every: u64,

    /// Pause between rounds in milliseconds
    #[arg(long, default_value_t = 0)]
    pub gap_ms: u64,

    /// Start a fresh upstream call for every caller
    #[arg(long)]
    pub no_dedupe: bool,

    /// Never read or write the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validated workload settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub keys: usize,
    pub callers: usize,
    pub rounds: u32,
    pub latency: Duration,
    pub ttl: Duration,
    pub fail_every: Option<u64>,
    pub gap: Duration,
    pub dedupe: bool,
    pub cache: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            keys: DEFAULT_KEYS,
            callers: DEFAULT_CALLERS,
            rounds: DEFAULT_ROUNDS,
            latency: Duration::from_millis(DEFAULT_LATENCY_MS),
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            fail_every: None,
            gap: Duration::ZERO,
            dedupe: true,
            cache: true,
        }
    }
}

impl SimulationConfig {
    /// Per-call options derived from the workload settings.
    pub fn options(&self) -> FetchOptions {
        let mut options = FetchOptions::default().with_ttl(self.ttl);
        if !self.cache {
            options = options.without_cache();
        }
        if !self.dedupe {
            options = options.without_dedupe();
        }
        options
    }

    fn validate(&self) -> Result<(), CliError> {
        if self.keys == 0 {
            return Err(CliError::Config("--keys must be at least 1".to_string()));
        }
        if self.callers == 0 {
            return Err(CliError::Config("--callers must be at least 1".to_string()));
        }
        if self.rounds == 0 {
            return Err(CliError::Config("--rounds must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl TryFrom<&SimulateArgs> for SimulationConfig {
    type Error = CliError;

    fn try_from(args: &SimulateArgs) -> Result<Self, Self::Error> {
        let config = Self {
            keys: args.keys,
            callers: args.callers,
            rounds: args.rounds,
            latency: Duration::from_millis(args.latency_ms),
            ttl: Duration::from_millis(args.ttl_ms),
            fail_every: (args.fail_every > 0).then_some(args.fail_every),
            gap: Duration::from_millis(args.gap_ms),
            dedupe: !args.no_dedupe,
            cache: !args.no_cache,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Caller-side totals across all rounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub rounds: u32,
    pub requests: u64,
    pub ok: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub upstream_invocations: u64,
}

/// Run `sluice simulate` against the process-wide engine.
pub async fn run(args: SimulateArgs) -> Result<(), CliError> {
    let config = SimulationConfig::try_from(&args)?;
    info!(
        keys = config.keys,
        callers = config.callers,
        rounds = config.rounds,
        "Starting simulation"
    );

    let engine = global::coalescer::<Arc<String>, UpstreamError>();
    let summary = simulate(&engine, &config).await?;
    let metrics = engine.metrics().snapshot();

    if args.json {
        report::print_json(&summary, &metrics)
    } else {
        report::print_table(&summary, &metrics);
        Ok(())
    }
}

/// Drive the workload described by `config` through `engine`.
pub async fn simulate(engine: &ItemEngine, config: &SimulationConfig) -> Result<Summary, CliError> {
    let upstream = Arc::new(Upstream::new(config.latency, config.fail_every));
    let mut summary = Summary {
        rounds: config.rounds,
        ..Summary::default()
    };

    for round in 1..=config.rounds {
        let callers: Vec<_> = (0..config.callers)
            .map(|caller| {
                let engine = engine.clone();
                let upstream = Arc::clone(&upstream);
                let key = format!("item:{}", caller % config.keys);
                let options = config.options();
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

        let (mut ok, mut failed, mut cancelled) = (0u64, 0u64, 0u64);
        for caller in callers {
            match caller.await? {
                Ok(_) => ok += 1,
                Err(e) if e.is_cancelled() => cancelled += 1,
                Err(_) => failed += 1,
            }
        }

        info!(round, ok, failed, cancelled, "Round complete");
        summary.requests += config.callers as u64;
        summary.ok += ok;
        summary.failed += failed;
        summary.cancelled += cancelled;

        if round < config.rounds && !config.gap.is_zero() {
            tokio::time::sleep(config.gap).await;
        }
    }

    summary.upstream_invocations = upstream.invocations();
    Ok(summary)
}
