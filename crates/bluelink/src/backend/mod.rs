//! Native layer implementations backed by the host Bluetooth stack
//!
//! - All platforms: low energy central and scanning via `btleplug`
//! - **Linux**: classic RFCOMM sockets via `bluer` and the BlueZ profile API

mod central;
#[cfg(target_os = "linux")]
mod rfcomm;

pub use central::BtleplugStack;
#[cfg(target_os = "linux")]
pub use rfcomm::BluerRfcomm;
