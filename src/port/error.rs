//! Driver-level error types.
//!
//! These are the failures a `SerialDriver` can report. The session layer wraps
//! them in `BridgeError::Io` so every driver failure reaches callers with the
//! same wire code.

use thiserror::Error;

/// Errors that can occur while talking to the serial driver.
#[derive(Debug, Error)]
pub enum PortError {
    /// The device path does not exist on this system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during a transfer or control request.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The driver rejected a parameter or combination of parameters.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transfer did not complete within its timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The device is already claimed by this driver.
    #[error("Port is already open")]
    AlreadyOpen,

    /// The device handle has not been acquired.
    #[error("Port is not open")]
    NotOpen,

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Create an Io error of kind `Other` from a message.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(std::io::Error::other(message.into()))
    }
}
