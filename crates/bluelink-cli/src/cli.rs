//! Command-line interface definitions and parsing

use bluelink::AddressingMode;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// How devices are identified on this host
    #[arg(short, long, value_enum)]
    pub addressing: Option<Addressing>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan for nearby devices
    Scan {
        /// Print the found devices as saved-settings JSON
        #[arg(long)]
        json: bool,
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Connect to a device and bridge it to stdin/stdout
    Connect {
        /// Display name of a device to find by scanning
        #[arg(short, long, conflicts_with_all = ["address", "settings"])]
        name: Option<String>,
        /// Hardware address or platform identifier of the device
        #[arg(long, conflicts_with = "settings")]
        address: Option<String>,
        /// Use the BLE serial service instead of classic RFCOMM
        #[arg(long, requires = "address")]
        ble: bool,
        /// Saved device settings file (JSON)
        #[arg(short, long)]
        settings: Option<String>,
        /// Save the selected device's settings to this file
        #[arg(long)]
        save: Option<String>,
        /// Print received bytes as hex instead of raw
        #[arg(long)]
        hex: bool,
    },
}

/// Addressing mode as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Addressing {
    Address,
    OpaqueId,
}

impl From<Addressing> for AddressingMode {
    fn from(value: Addressing) -> Self {
        match value {
            Addressing::Address => AddressingMode::Address,
            Addressing::OpaqueId => AddressingMode::OpaqueId,
        }
    }
}
