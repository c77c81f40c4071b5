//! Error handling for the bluelink CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluelink::BluetoothError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No device named {0} found")]
    DeviceNotFound(String),

    #[error("Link failed: {0}")]
    Link(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
