//! Sluice CLI - drive the coalescing cache against a simulated upstream
//!
//! This binary exercises the sluice library end to end and prints the
//! resulting call metrics.

mod commands;
mod error;
mod logging;

use clap::{Parser, Subcommand};

use commands::invalidate::InvalidateArgs;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "sluice", version, about = "Request coalescing cache inspector")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a concurrent workload and print the call metrics
    Simulate(SimulateArgs),
    /// Start calls on two key prefixes and invalidate one of them
    DemoInvalidate(InvalidateArgs),
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match command {
        Commands::Simulate(args) => runtime.block_on(commands::simulate::run(args)),
        Commands::DemoInvalidate(args) => runtime.block_on(commands::invalidate::run(args)),
    }
}
