//! Error types for devmon

use std::io;
use thiserror::Error;

/// Result type alias for devmon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for device enumeration and monitoring
///
/// Native status codes and null handles never cross the public API; every
/// call into the device library is translated into one of these variants at
/// the point of the call.
#[derive(Error, Debug)]
pub enum Error {
    /// Device library missing, failed to initialize, or failed to allocate
    #[error("Device capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Subsystem match rejected by the device library
    #[error("Invalid subsystem filter '{subsystem}': {reason}")]
    InvalidFilter { subsystem: String, reason: String },

    /// Device scan returned a negative status
    #[error("Device scan failed (status {status})")]
    ScanFailed { status: i32 },

    /// Monitor could not be switched to receiving mode
    #[error("Failed to enable receiving on monitor '{source_name}' (status {status})")]
    ActivationFailed { source_name: String, status: i32 },

    /// Operation attempted on a torn-down context, enumerator or monitor
    #[error("{0} is closed")]
    Closed(&'static str),

    /// A native handle was released twice
    #[error("{0} was already released")]
    DoubleRelease(&'static str),

    /// A blocking receive was cancelled from outside
    #[error("Blocking receive interrupted")]
    Interrupted,

    /// Operation called out of order for the object's lifecycle
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a capability unavailable error
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Error::CapabilityUnavailable(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Whether the error is a programming error rather than an environmental failure
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Error::DoubleRelease(_) | Error::InvalidState { .. } | Error::Closed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::InvalidFilter {
            subsystem: "usb".to_string(),
            reason: "status -22".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid subsystem filter 'usb': status -22");

        let err = Error::ActivationFailed {
            source_name: "udev".to_string(),
            status: -1,
        };
        assert!(err.to_string().contains("'udev'"));
        assert_eq!(Error::Closed("monitor").to_string(), "monitor is closed");
    }

    #[test]
    fn test_programming_errors() {
        assert!(Error::DoubleRelease("context").is_programming_error());
        assert!(!Error::Interrupted.is_programming_error());
        assert!(!Error::unavailable("no libudev").is_programming_error());
    }
}
