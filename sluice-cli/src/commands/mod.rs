//! CLI command implementations.

pub mod invalidate;
pub mod report;
pub mod simulate;
pub mod upstream;
