//! CLI configuration file
//!
//! An optional TOML file provides scan and link defaults; command line flags
//! override it.
//!
//! ```toml
//! [scan]
//! addressing_mode = "address"
//! duration_secs = 10
//!
//! [link]
//! connect_timeout_secs = 20
//! ```

use std::path::Path;
use std::time::Duration;

use bluelink::{AddressingMode, LinkConfig, ScanConfig};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub scan: ScanSection,
    pub link: LinkSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub addressing_mode: AddressingMode,
    /// `0` scans until discovery finishes on its own
    pub duration_secs: u64,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            addressing_mode: AddressingMode::Address,
            duration_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub connect_timeout_secs: Option<u64>,
}

impl CliConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn with_addressing_mode(mut self, mode: AddressingMode) -> Self {
        self.scan.addressing_mode = mode;
        self
    }

    pub fn with_scan_duration(mut self, secs: u64) -> Self {
        self.scan.duration_secs = secs;
        self
    }

    pub fn scan_config(&self) -> ScanConfig {
        let duration = match self.scan.duration_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        ScanConfig::new()
            .with_addressing_mode(self.scan.addressing_mode)
            .with_scan_duration(duration)
    }

    pub fn link_config(&self) -> LinkConfig {
        let config = LinkConfig::new().with_addressing_mode(self.scan.addressing_mode);
        match self.link.connect_timeout_secs {
            Some(secs) => config.with_connect_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}
