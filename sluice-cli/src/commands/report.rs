//! Rendering of simulation results.

use sluice::MetricSnapshot;

use super::simulate::Summary;
use crate::error::CliError;

/// Print the caller summary followed by a metrics table.
pub fn print_table(summary: &Summary, metrics: &[MetricSnapshot]) {
    println!("Sluice Simulation");
    println!("=================");
    println!();
    println!("Rounds:     {}", summary.rounds);
    println!("Requests:   {}", summary.requests);
    println!(
        "Outcomes:   {} ok, {} failed, {} cancelled",
        summary.ok, summary.failed, summary.cancelled
    );
    println!("Upstream:   {} invocations", summary.upstream_invocations);
    println!();

    if metrics.is_empty() {
        println!("No calls recorded.");
        return;
    }

    println!(
        "{:<20} {:>7} {:>7} {:>7} {:>7} {:>9} {:>9} {:>9}  {}",
        "OPERATION", "CALLS", "OK", "FAILED", "CACHED", "AVG ms", "MAX ms", "LAST ms", "LAST AT"
    );
    for row in metrics {
        println!(
            "{:<20} {:>7} {:>7} {:>7} {:>7} {:>9.1} {:>9.1} {:>9.1}  {}",
            row.name,
            row.calls,
            row.success,
            row.failed,
            row.cache_hits,
            row.average().as_secs_f64() * 1000.0,
            row.max.as_secs_f64() * 1000.0,
            row.last.as_secs_f64() * 1000.0,
            row.last_at.format("%H:%M:%S%.3f")
        );
    }
}

/// Build the JSON form of the report.
pub fn to_json(summary: &Summary, metrics: &[MetricSnapshot]) -> Result<serde_json::Value, CliError> {
    Ok(serde_json::json!({
        "summary": {
            "rounds": summary.rounds,
            "requests": summary.requests,
            "ok": summary.ok,
            "failed": summary.failed,
            "cancelled": summary.cancelled,
            "upstream_invocations": summary.upstream_invocations,
        },
        "metrics": serde_json::to_value(metrics)?,
    }))
}

/// Print the report as pretty JSON.
pub fn print_json(summary: &Summary, metrics: &[MetricSnapshot]) -> Result<(), CliError> {
    let report = to_json(summary, metrics)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
