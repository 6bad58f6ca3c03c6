//! Error types for blescan-core.
//!
//! Scan errors are transient by nature: the pipeline driver treats any
//! [`Error`] from a scan source as an empty result and tries again on the
//! next cycle. Only [`Error::InvalidConfig`] indicates a problem that a retry
//! cannot fix.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while scanning or analysing scans.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is present or powered.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// Failed to parse advertisement data.
    #[error("Invalid advertisement data: {0}")]
    InvalidData(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid engine or scanner configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using blescan-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("scan", Duration::from_secs(2));
        assert_eq!(err.to_string(), "Operation 'scan' timed out after 2s");
    }

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("delta must be positive");
        assert!(err.to_string().contains("delta must be positive"));
    }
}
