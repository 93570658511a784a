//! Error type for the CLI binary.

use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid command-line arguments.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The async runtime could not be started.
    #[error("Failed to create Tokio runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// A spawned caller task did not finish.
    #[error("Caller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The report could not be serialized.
    #[error("Failed to write report: {0}")]
    Output(#[from] serde_json::Error),
}
