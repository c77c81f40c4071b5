//! Bluetooth byte-stream links for serial-style remote devices
//!
//! A link carries an opaque byte stream to one remote device over one of two
//! transports, chosen per device:
//!
//! - **BLE**: the GATT serial emulation service (`0000ffe0-…`) with a single
//!   RX/TX characteristic (`0000ffe1-…`); notifications deliver inbound bytes
//!   and writes are split into 20 byte chunks
//! - **Classic**: an RFCOMM stream socket to the serial port profile
//!
//! ## Architecture
//!
//! - [`device`] - Device descriptors, addressing modes and persisted settings
//! - [`scanner`] - Device discovery with a deduplicated device list
//! - [`link`] - The link state machine
//! - [`native`] - Traits a Bluetooth stack implements for the link and scanner
//! - [`backend`] - btleplug and BlueZ implementations of the native layer
//! - [`task`] - Async driver owning a link
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bluelink::{BluetoothLink, BtleplugStack, DeviceDescriptor, LinkConfig, LinkEvent, LinkTask, Locator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stack = BtleplugStack::new().await?;
//! let device = DeviceDescriptor::new(
//!     "Drone (BLE)",
//!     Locator::address("AA:BB:CC:DD:EE:FF")?,
//!     true,
//! );
//!
//! let (link, mut events) = BluetoothLink::new(device, LinkConfig::default(), stack);
//! let (task, handle) = LinkTask::new(link);
//! task.spawn();
//!
//! handle.connect()?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LinkEvent::Connected => handle.write(b"hello".to_vec())?,
//!         LinkEvent::BytesReceived(bytes) => println!("{} bytes", bytes.len()),
//!         LinkEvent::Disconnected => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod link;
pub mod native;
pub mod protocol;
pub mod scanner;
pub mod task;

#[cfg(test)]
mod testing;

// Public API exports
pub use backend::BtleplugStack;
pub use config::{LinkConfig, ScanConfig};
pub use device::{AddressingMode, DeviceDescriptor, DeviceSettings, Locator};
pub use error::{BluetoothError, ErrorKind, NativeError, Result};
pub use event::LinkEvent;
pub use link::{BluetoothLink, LinkState};
pub use native::{BluetoothStack, DiscoveryStack, EventSink, Registration, SessionId};
pub use scanner::{DeviceScanner, ScannerEvent};
pub use task::{LinkCommand, LinkHandle, LinkTask};
