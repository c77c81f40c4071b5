//! bluelink CLI library
//!
//! Command-line front end for scanning Bluetooth serial devices and bridging
//! a link to stdin/stdout.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::CliConfig;
pub use error::{CliError, Result};
