//! Classic RFCOMM path of the link

use tracing::{info, warn};

use crate::error::{ErrorKind, NativeError};
use crate::event::LinkEvent;
use crate::native::{
    BluetoothStack, EventSink, NativeEvent, Registration, RfcommSocket, SessionId, SocketEvent,
};
use crate::protocol::SERIAL_PORT_SERVICE_CLASS_UUID;

use super::{BluetoothLink, LinkState, Session};

/// Socket of one RFCOMM connection
pub(super) struct ClassicSession {
    pub(super) id: SessionId,
    pub(super) state: LinkState,
    registration: Registration,
    socket: Box<dyn RfcommSocket>,
}

impl ClassicSession {
    /// Hand the whole buffer to the socket. True if any bytes were accepted.
    pub(super) fn write(&mut self, data: &[u8]) -> bool {
        match self.socket.write(data) {
            Ok(written) if written > 0 => true,
            Ok(_) => {
                warn!("Bluetooth write error: no bytes accepted");
                false
            }
            Err(e) => {
                warn!("Bluetooth write error: {}", e);
                false
            }
        }
    }

    /// Read everything the socket has buffered, one buffer per pass
    fn drain(&mut self) -> (Vec<Vec<u8>>, Option<NativeError>) {
        let mut buffers = Vec::new();

        loop {
            let available = self.socket.bytes_available();
            if available == 0 {
                break;
            }

            let mut buf = vec![0u8; available];
            match self.socket.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => {
                    buf.truncate(read);
                    buffers.push(buf);
                }
                Err(e) => return (buffers, Some(e)),
            }
        }

        (buffers, None)
    }

    /// Stop event delivery before the socket goes away
    pub(super) fn release(mut self) {
        self.registration.cancel();
        self.socket.close();
    }
}

impl<S: BluetoothStack> BluetoothLink<S> {
    pub(super) fn connect_classic(
        &mut self,
        id: SessionId,
        sink: EventSink<NativeEvent>,
        registration: Registration,
    ) {
        let mut socket = match self.stack.create_rfcomm_socket(sink) {
            Ok(socket) => socket,
            Err(e) => {
                registration.cancel();
                self.report_error(
                    ErrorKind::Connection,
                    format!("Failed to create RFCOMM socket: {}", e),
                );
                return;
            }
        };

        socket.connect_to_service(&self.device.locator, SERIAL_PORT_SERVICE_CLASS_UUID);
        self.session = Session::Classic(ClassicSession {
            id,
            state: LinkState::SocketConnecting,
            registration,
            socket,
        });
    }

    pub(super) fn on_socket_event(&mut self, event: SocketEvent) {
        let Session::Classic(session) = &mut self.session else {
            return;
        };

        match event {
            SocketEvent::Connected => {
                session.state = LinkState::Ready;
                self.connected = true;
                info!("RFCOMM link to {} ready", self.device);
                self.emit(LinkEvent::Connected);
            }
            SocketEvent::Disconnected => {
                // The socket stays owned until disconnect() releases it
                session.state = LinkState::Disconnected;
                self.connected = false;
                warn!("Bluetooth disconnected");
            }
            SocketEvent::ReadyRead => {
                let (buffers, error) = session.drain();
                for buf in buffers {
                    self.emit(LinkEvent::BytesReceived(buf));
                }
                if let Some(e) = error {
                    self.report_error(ErrorKind::Io, format!("Read failed: {}", e));
                }
            }
            SocketEvent::Error(e) => {
                self.report_error(ErrorKind::Connection, e.to_string());
            }
        }
    }
}
