//! Error types for the toolkit.
//!
//! Each mechanism owns its error type next to the code that raises it. The
//! root `Error` wraps all of them so callers that drive several mechanisms
//! can use a single `Result`.
//!
//! Some outcomes are deliberately not errors:
//!
//! - A missing or malformed configuration value is replaced by a documented
//!   default and logged.
//! - Misusing a pool (releasing a foreign object) is accepted silently.
//! - Re-entering a held lock deadlocks; it is a caller obligation, not a
//!   reported failure.

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::dispatch::DispatchError;
pub use crate::pool::record::RecordError;
pub use crate::runner::RunError;
pub use crate::sync::lock::LockError;

/// Root error type for the toolkit.
#[derive(Debug, Error)]
pub enum Error {
    /// Deadline-bounded execution errors
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// Task dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Timed lock acquisition errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pooled record decode errors
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

/// Result type using the toolkit's root error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_run_error_converts_into_root() {
        let err: Error = RunError::TimedOut(Duration::from_millis(5)).into();
        assert!(matches!(err, Error::Run(RunError::TimedOut(_))));
        assert_eq!(err.to_string(), "Run error: task timed out after 5ms");
    }

    #[test]
    fn test_dispatch_error_converts_into_root() {
        let err: Error = DispatchError::QueueFull.into();
        assert!(matches!(err, Error::Dispatch(DispatchError::QueueFull)));
    }
}
