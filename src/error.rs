//! Adapter-level error type.
//!
//! Every failure a session command can produce is a `BridgeError`. Each
//! variant maps to a stable wire code so the command surface can report it
//! without leaking Rust type names.

use crate::port::PortError;
use thiserror::Error;

/// A specialized `Result` type for session and registry operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Wire code for any driver failure.
pub const IO_ERROR_CODE: &str = "IoError";

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Any failure reported by the serial driver.
    #[error("I/O error: {0}")]
    Io(#[from] PortError),

    #[error("Operation requires an open serial port, but the port is closed.")]
    NotOpen,

    #[error("Port is already open. Close it before trying to open it again.")]
    AlreadyOpen,

    /// A command argument was missing, mistyped or out of range.
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },

    #[error("Failed to start the background reader: {0}")]
    ReaderSpawn(#[source] std::io::Error),

    /// No tokio runtime was available to host the delivery context.
    #[error("No async runtime available for event delivery: {0}")]
    NoRuntime(String),

    #[error("No session registered for interface {0}")]
    UnknownInterface(u32),

    #[error("A session is already registered for interface {0}")]
    DuplicateInterface(u32),
}

impl BridgeError {
    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Stable code reported on the command surface and to event sinks.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => IO_ERROR_CODE,
            Self::NotOpen => "PortNotOpen",
            Self::AlreadyOpen => "PortAlreadyOpen",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::ReaderSpawn(_) => "ReaderSpawnFailed",
            Self::NoRuntime(_) => "NoRuntime",
            Self::UnknownInterface(_) => "UnknownInterface",
            Self::DuplicateInterface(_) => "DuplicateInterface",
        }
    }

    /// Whether this error came from the driver.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
