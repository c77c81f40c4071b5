//! Link and scanner configuration

use std::time::Duration;

use crate::device::AddressingMode;

// ----------------------------------------------------------------------------
// Link Configuration
// ----------------------------------------------------------------------------

/// Configuration for a Bluetooth link
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LinkConfig {
    /// How the target device is addressed
    pub addressing_mode: AddressingMode,
    /// Give up on a connection attempt that has not reached Ready in time.
    /// `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            addressing_mode: AddressingMode::Address,
            connect_timeout: None,
        }
    }
}

impl LinkConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the addressing mode
    pub fn with_addressing_mode(mut self, mode: AddressingMode) -> Self {
        self.addressing_mode = mode;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

// ----------------------------------------------------------------------------
// Scan Configuration
// ----------------------------------------------------------------------------

/// Configuration for device scanning
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScanConfig {
    /// How discovered devices are identified
    pub addressing_mode: AddressingMode,
    /// Stop scanning after this long. `None` scans until stopped.
    pub scan_duration: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            addressing_mode: AddressingMode::Address,
            scan_duration: Some(Duration::from_secs(10)),
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addressing_mode(mut self, mode: AddressingMode) -> Self {
        self.addressing_mode = mode;
        self
    }

    pub fn with_scan_duration(mut self, duration: Option<Duration>) -> Self {
        self.scan_duration = duration;
        self
    }
}
