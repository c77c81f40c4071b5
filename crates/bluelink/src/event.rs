//! Events delivered to the owner of a link

use crate::error::ErrorKind;

/// Notifications emitted by a [`BluetoothLink`](crate::BluetoothLink)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Link is ready for application traffic
    Connected,
    /// The active session was torn down
    Disconnected,
    /// Bytes read from the remote device
    BytesReceived(Vec<u8>),
    /// A write was handed to the native layer; carries the original buffer
    BytesSent(Vec<u8>),
    /// Native layer failure that ended the session
    CommunicationError { kind: ErrorKind, message: String },
}

impl LinkEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, LinkEvent::CommunicationError { .. })
    }
}
