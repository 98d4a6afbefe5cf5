//! Subcommand implementations
//!
//! Each module pairs a clap `Args` struct with an `execute` function. Flags
//! left unset fall back to the loaded toolkit configuration.

pub mod config;
pub mod leak;
pub mod lock;
pub mod pool;

use std::time::Duration;

/// Format a duration as milliseconds with two decimals
pub fn millis(duration: Duration) -> String {
    format!("{:.2}ms", duration.as_micros() as f64 / 1000.0)
}
