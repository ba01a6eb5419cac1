//! Custom error types for the application.
//!
//! This module defines the primary error type, `CalError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration and I/O issues to instrument-specific problems.
//!
//! By using `#[from]`, `CalError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the application with
//! the `?` operator. Adapter and driver code reports errors through `anyhow`
//! and attaches a `CalError` where the kind matters to callers (fault policy,
//! cancellation), so tests and the sweep engine can downcast on it.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, CalError>;

/// Application-level error kinds.
#[derive(Error, Debug)]
pub enum CalError {
    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration parsed fine but contains invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying file or port I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial link failure that is not a plain `std::io::Error`.
    #[error("Link error: {0}")]
    Link(String),

    /// Operation attempted on a link that was never opened or already closed.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// Built without serial support.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// The voltmeter returned a line that does not parse as a float.
    #[error("Unparseable voltmeter reading: {raw:?}")]
    Reading {
        /// The raw response line, preserved for diagnostics.
        raw: String,
    },

    /// CSV output failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The sweep was cancelled by the operator.
    #[error("Sweep cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CalError::Reading {
            raw: "garbage\n".to_string(),
        };
        assert!(err.to_string().contains("garbage"));
    }

    #[test]
    fn test_configuration_error_display() {
        let err = CalError::Configuration("d_v must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: d_v must be positive"
        );
    }
}
