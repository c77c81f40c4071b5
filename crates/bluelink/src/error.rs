//! Error types for the Bluetooth link

use std::fmt;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Categories
// ----------------------------------------------------------------------------

/// Category attached to every communication error event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Scan or service discovery failed
    Discovery,
    /// Controller or socket could not connect, or dropped with an error
    Connection,
    /// Required service or characteristic missing after discovery
    Protocol,
    /// Read or write failure in the native layer
    Io,
}

impl ErrorKind {
    /// Human readable category label
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Discovery => "Bluetooth Discovery Error",
            ErrorKind::Connection => "Bluetooth Link Error",
            ErrorKind::Protocol => "Bluetooth Protocol Error",
            ErrorKind::Io => "Bluetooth I/O Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ----------------------------------------------------------------------------
// Native Layer Errors
// ----------------------------------------------------------------------------

/// Failures reported by a Bluetooth stack backend
#[derive(Error, Debug)]
pub enum NativeError {
    #[error("Remote device not found: {0}")]
    UnknownDevice(String),

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Write rejected: {0}")]
    Write(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation not supported on this platform: {0}")]
    Unsupported(&'static str),
}

impl NativeError {
    /// Category reported when this failure ends a session
    pub fn kind(&self) -> ErrorKind {
        match self {
            NativeError::UnknownDevice(_) | NativeError::Controller(_) => ErrorKind::Connection,
            NativeError::Socket(_) | NativeError::Unsupported(_) => ErrorKind::Connection,
            NativeError::Service(_) => ErrorKind::Discovery,
            NativeError::Write(_) | NativeError::Io(_) => ErrorKind::Io,
        }
    }
}

// ----------------------------------------------------------------------------
// Setup Errors
// ----------------------------------------------------------------------------

/// Errors returned by fallible setup APIs
#[derive(Error, Debug)]
pub enum BluetoothError {
    #[error("Bluetooth adapter not available")]
    AdapterNotAvailable,

    #[error("Bluetooth stack error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[error("Invalid device locator: {0}")]
    InvalidLocator(String),

    #[error("Addressing mode mismatch: expected {expected}, got {actual}")]
    AddressingMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Link task channel closed")]
    ChannelClosed,

    #[error("Native layer error: {0}")]
    Native(#[from] NativeError),
}

/// Result type for setup operations
pub type Result<T> = std::result::Result<T, BluetoothError>;
