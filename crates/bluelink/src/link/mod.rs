//! Bluetooth link state machine
//!
//! A [`BluetoothLink`] drives one remote device over either the BLE serial
//! emulation service or a classic RFCOMM socket. It never blocks: native
//! completions arrive as [`NativeEvent`]s which the owner feeds back through
//! [`BluetoothLink::handle_native_event`] (or lets [`LinkTask`](crate::LinkTask)
//! do it). All outcomes are reported as [`LinkEvent`]s on the channel returned
//! by [`BluetoothLink::new`].

mod ble;
mod classic;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::device::DeviceDescriptor;
use crate::error::ErrorKind;
use crate::event::LinkEvent;
use crate::native::{BluetoothStack, EventSink, NativeEvent, SessionId};

use self::ble::BleSession;
use self::classic::ClassicSession;

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Connection state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    ServiceFound,
    NotifyEnabling,
    SocketConnecting,
    Ready,
}

/// Native resources of the current connection attempt
#[derive(Default)]
enum Session {
    #[default]
    Idle,
    Ble(BleSession),
    Classic(ClassicSession),
}

impl Session {
    fn id(&self) -> Option<SessionId> {
        match self {
            Session::Idle => None,
            Session::Ble(s) => Some(s.id),
            Session::Classic(s) => Some(s.id),
        }
    }
}

// ----------------------------------------------------------------------------
// Link
// ----------------------------------------------------------------------------

/// Byte-stream link to one Bluetooth device
pub struct BluetoothLink<S> {
    device: DeviceDescriptor,
    config: LinkConfig,
    stack: S,
    session: Session,
    /// Ready for application traffic
    connected: bool,
    next_session: SessionId,
    events: mpsc::UnboundedSender<LinkEvent>,
    native_tx: mpsc::UnboundedSender<(SessionId, NativeEvent)>,
    native_rx: mpsc::UnboundedReceiver<(SessionId, NativeEvent)>,
}

impl<S: BluetoothStack> BluetoothLink<S> {
    /// Create a link for `device`. The returned receiver is the link's only
    /// event observer.
    pub fn new(
        device: DeviceDescriptor,
        config: LinkConfig,
        stack: S,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (native_tx, native_rx) = mpsc::unbounded_channel();

        let link = Self {
            device,
            config,
            stack,
            session: Session::Idle,
            connected: false,
            next_session: 1,
            events,
            native_tx,
            native_rx,
        };

        (link, event_rx)
    }

    /// Start connecting to the configured device.
    ///
    /// Returns immediately; the outcome is reported through events. Any
    /// previous session is torn down first.
    pub fn connect(&mut self) {
        self.teardown();

        if self.device.locator.mode() != self.config.addressing_mode {
            self.report_error(
                ErrorKind::Connection,
                format!(
                    "Device {} is not addressable in {} mode",
                    self.device, self.config.addressing_mode
                ),
            );
            return;
        }

        let session_id = self.next_session;
        self.next_session += 1;
        let (sink, registration) = EventSink::register(session_id, self.native_tx.clone());

        info!(
            "Connecting to {} (BLE: {}, session {})",
            self.device, self.device.is_ble, session_id
        );

        if self.device.is_ble {
            self.connect_ble(session_id, sink, registration);
        } else {
            self.connect_classic(session_id, sink, registration);
        }
    }

    /// Send bytes to the remote device.
    ///
    /// Dropped silently unless the link is Ready.
    pub fn write(&mut self, data: &[u8]) {
        if !self.connected {
            debug!("Dropping {} byte write, link not ready", data.len());
            return;
        }

        match &mut self.session {
            Session::Ble(session) => {
                session.write(data);
                // One notification for the whole buffer, even if a chunk failed
                self.emit(LinkEvent::BytesSent(data.to_vec()));
            }
            Session::Classic(session) => {
                if session.write(data) {
                    self.emit(LinkEvent::BytesSent(data.to_vec()));
                }
            }
            Session::Idle => {}
        }
    }

    /// Wait for the next event from the native layer
    pub async fn next_native_event(&mut self) -> Option<(SessionId, NativeEvent)> {
        self.native_rx.recv().await
    }

    /// Dispatch every native event already queued, returning how many were handled
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((session, event)) = self.native_rx.try_recv() {
            self.handle_native_event(session, event);
            handled += 1;
        }
        handled
    }

    /// Feed one native event into the state machine.
    ///
    /// Events from sessions other than the current one are discarded.
    pub fn handle_native_event(&mut self, session: SessionId, event: NativeEvent) {
        if self.session.id() != Some(session) {
            debug!("Ignoring event from stale session {}: {:?}", session, event);
            return;
        }

        match event {
            NativeEvent::Controller(event) => self.on_controller_event(event),
            NativeEvent::Service(event) => self.on_service_event(event),
            NativeEvent::Socket(event) => self.on_socket_event(event),
        }
    }
}

impl<S> BluetoothLink<S> {
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Replace the target device; takes effect on the next [`connect`](Self::connect)
    pub fn set_device(&mut self, device: DeviceDescriptor) {
        self.device = device;
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether a connection attempt is in flight
    pub fn is_connecting(&self) -> bool {
        !matches!(self.state(), LinkState::Disconnected | LinkState::Ready)
    }

    pub fn state(&self) -> LinkState {
        if self.connected {
            return LinkState::Ready;
        }
        match &self.session {
            Session::Idle => LinkState::Disconnected,
            Session::Ble(session) => session.state,
            Session::Classic(session) => session.state,
        }
    }

    /// Tear down the active session. A no-op without one.
    pub fn disconnect(&mut self) {
        if self.teardown() {
            info!("Disconnected from {}", self.device);
        }
    }

    /// Give up on a connection attempt that has not reached Ready
    pub fn abort_connect(&mut self, reason: &str) {
        if self.is_connecting() {
            self.report_error(ErrorKind::Connection, reason.to_string());
        }
    }

    /// Report a fatal native failure and end the session
    fn report_error(&mut self, kind: ErrorKind, message: String) {
        warn!("{}: {}", kind, message);
        self.connected = false;
        self.emit(LinkEvent::CommunicationError { kind, message });
        self.teardown();
    }

    /// Release whatever session is alive. The session is detached from the
    /// link before any native handle is touched, so a nested or repeated call
    /// finds nothing left and emits nothing.
    fn teardown(&mut self) -> bool {
        self.connected = false;

        match std::mem::take(&mut self.session) {
            Session::Idle => false,
            Session::Ble(session) => {
                debug!("Releasing BLE session {}", session.id);
                session.release();
                self.emit(LinkEvent::Disconnected);
                true
            }
            Session::Classic(session) => {
                debug!("Releasing RFCOMM session {}", session.id);
                session.release();
                self.emit(LinkEvent::Disconnected);
                true
            }
        }
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Link event receiver dropped");
        }
    }
}

impl<S> Drop for BluetoothLink<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests;
