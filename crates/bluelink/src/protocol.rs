//! GATT serial emulation constants and write chunking

use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Serial emulation service exposed by HM-10 style BLE UART bridges
pub const SERIAL_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFE0_0000_1000_8000_00805F9B34FB);

/// Combined RX/TX characteristic of the serial emulation service
pub const RX_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000FFE1_0000_1000_8000_00805F9B34FB);

/// Client characteristic configuration descriptor
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// Serial port profile service class used by classic RFCOMM devices
pub const SERIAL_PORT_SERVICE_CLASS_UUID: Uuid =
    Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

// ----------------------------------------------------------------------------
// Notification Configuration
// ----------------------------------------------------------------------------

/// CCCD value that turns notifications on
pub const NOTIFICATIONS_ENABLE: [u8; 2] = [0x01, 0x00];

/// CCCD value that turns notifications off. Seeing it acknowledged means the
/// session is being closed.
pub const NOTIFICATIONS_DISABLE: [u8; 2] = [0x00, 0x00];

// ----------------------------------------------------------------------------
// Chunking
// ----------------------------------------------------------------------------

/// Largest payload issued in a single BLE characteristic write
pub const BLE_CHUNK_SIZE: usize = 20;

/// Display name suffix that marks a low energy device
pub const BLE_NAME_SUFFIX: &str = " (BLE)";

/// Split a payload into the writes issued against the RX/TX characteristic.
///
/// Payloads up to [`BLE_CHUNK_SIZE`] go out as one write; longer payloads are
/// cut into consecutive full chunks with the remainder last.
pub fn write_chunks(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.chunks(BLE_CHUNK_SIZE)
}

/// Number of characteristic writes needed for `len` bytes
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(BLE_CHUNK_SIZE)
}

/// Append the BLE marker to a raw advertised name
pub fn ble_display_name(name: &str) -> String {
    format!("{}{}", name, BLE_NAME_SUFFIX)
}
