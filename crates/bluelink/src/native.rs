//! Seam between the link state machine and a Bluetooth stack
//!
//! Backends implement the traits in this module. Every call is non-blocking:
//! completions and unsolicited notifications come back as events pushed into
//! the [`EventSink`] handed over when the handle was created. A sink belongs to
//! exactly one session; once its [`Registration`] is cancelled nothing more is
//! delivered from it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::device::{DeviceDescriptor, Locator};
use crate::error::NativeError;

/// Identifies one native session (controller, socket or discovery run)
pub type SessionId = u64;

// ----------------------------------------------------------------------------
// Event Delivery
// ----------------------------------------------------------------------------

/// Session-scoped sender used by backends to report native events
#[derive(Debug)]
pub struct EventSink<E> {
    session: SessionId,
    registered: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<(SessionId, E)>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            registered: Arc::clone(&self.registered),
            tx: self.tx.clone(),
        }
    }
}

impl<E> EventSink<E> {
    /// Create a sink for `session` together with the registration that controls it
    pub fn register(
        session: SessionId,
        tx: mpsc::UnboundedSender<(SessionId, E)>,
    ) -> (Self, Registration) {
        let registered = Arc::new(AtomicBool::new(true));
        let sink = Self {
            session,
            registered: Arc::clone(&registered),
            tx,
        };
        (sink, Registration { registered })
    }

    /// Deliver an event. Returns false once the registration was cancelled
    /// or the receiving side is gone.
    pub fn emit(&self, event: E) -> bool {
        if !self.is_registered() {
            return false;
        }
        self.tx.send((self.session, event)).is_ok()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

/// Owner side of an [`EventSink`]
#[derive(Debug)]
pub struct Registration {
    registered: Arc<AtomicBool>,
}

impl Registration {
    /// Stop delivery from every clone of the matching sink
    pub fn cancel(&self) {
        self.registered.store(false, Ordering::Release);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ----------------------------------------------------------------------------
// Native Events
// ----------------------------------------------------------------------------

/// Low energy controller state, reported for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unconnected,
    Connecting,
    Connected,
    Discovering,
    Discovered,
    Closing,
}

/// Detail discovery state of a GATT service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    RemoteService,
    DiscoveringDetails,
    Discovered,
    Invalid,
}

/// Reference to one GATT descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRef {
    pub characteristic: Uuid,
    pub uuid: Uuid,
}

/// A characteristic as found during service detail discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl Characteristic {
    /// Look up one of this characteristic's descriptors
    pub fn descriptor(&self, uuid: Uuid) -> Option<DescriptorRef> {
        self.descriptors
            .iter()
            .find(|d| **d == uuid)
            .map(|d| DescriptorRef {
                characteristic: self.uuid,
                uuid: *d,
            })
    }
}

/// How a characteristic write is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

#[derive(Debug)]
pub enum ControllerEvent {
    Connected,
    Disconnected,
    StateChanged(ControllerState),
    ServiceDiscovered(Uuid),
    DiscoveryFinished,
    Error(NativeError),
}

#[derive(Debug)]
pub enum ServiceEvent {
    StateChanged(ServiceState),
    CharacteristicChanged { characteristic: Uuid, value: Vec<u8> },
    DescriptorWritten { descriptor: DescriptorRef, value: Vec<u8> },
    Error(NativeError),
}

#[derive(Debug)]
pub enum SocketEvent {
    Connected,
    Disconnected,
    ReadyRead,
    Error(NativeError),
}

/// Everything a link session can receive from the native layer
#[derive(Debug)]
pub enum NativeEvent {
    Controller(ControllerEvent),
    Service(ServiceEvent),
    Socket(SocketEvent),
}

impl From<ControllerEvent> for NativeEvent {
    fn from(event: ControllerEvent) -> Self {
        NativeEvent::Controller(event)
    }
}

impl From<ServiceEvent> for NativeEvent {
    fn from(event: ServiceEvent) -> Self {
        NativeEvent::Service(event)
    }
}

impl From<SocketEvent> for NativeEvent {
    fn from(event: SocketEvent) -> Self {
        NativeEvent::Socket(event)
    }
}

/// Raw record reported by a discovery agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised name, possibly empty
    pub name: String,
    /// Hardware address, when the host exposes it
    pub address: Option<String>,
    /// Platform identifier, when the host uses opaque ids
    pub opaque_id: Option<Uuid>,
    /// Low energy core configuration bit
    pub low_energy: bool,
}

#[derive(Debug)]
pub enum DiscoveryEvent {
    DeviceFound(DiscoveredDevice),
    Finished,
    Error(NativeError),
}

// ----------------------------------------------------------------------------
// Native Handles
// ----------------------------------------------------------------------------

/// Creates native session handles
pub trait BluetoothStack: Send {
    /// Create a low energy controller in central role bound to `device`
    fn create_central(
        &mut self,
        device: &DeviceDescriptor,
        events: EventSink<NativeEvent>,
    ) -> Result<Box<dyn BleController>, NativeError>;

    /// Create an unconnected RFCOMM socket
    fn create_rfcomm_socket(
        &mut self,
        events: EventSink<NativeEvent>,
    ) -> Result<Box<dyn RfcommSocket>, NativeError>;
}

/// Low energy controller in central role
pub trait BleController: Send {
    fn connect_to_device(&mut self);

    fn discover_services(&mut self);

    /// Create the handle for a discovered service, `None` if the remote does
    /// not offer it
    fn create_service(&mut self, uuid: Uuid) -> Option<Box<dyn GattService>>;

    fn disconnect_from_device(&mut self);
}

/// One remote GATT service
pub trait GattService: Send {
    fn discover_details(&mut self);

    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic>;

    /// Write a descriptor; acknowledged with [`ServiceEvent::DescriptorWritten`]
    fn write_descriptor(&mut self, descriptor: &DescriptorRef, value: &[u8]);

    /// Queue a characteristic write. An error means the service is in a failed
    /// state and the write was not issued.
    fn write_characteristic(
        &mut self,
        characteristic: &Characteristic,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), NativeError>;
}

/// Classic RFCOMM stream socket
pub trait RfcommSocket: Send {
    fn connect_to_service(&mut self, locator: &Locator, service_class: Uuid);

    /// Returns the number of bytes accepted
    fn write(&mut self, data: &[u8]) -> Result<usize, NativeError>;

    fn bytes_available(&self) -> usize;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, NativeError>;

    fn close(&mut self);
}

/// Creates discovery agents for the scanner
pub trait DiscoveryStack: Send {
    fn create_discovery_agent(
        &mut self,
        events: EventSink<DiscoveryEvent>,
    ) -> Result<Box<dyn DiscoveryAgent>, NativeError>;
}

/// Running device inquiry
pub trait DiscoveryAgent: Send {
    /// Start (or restart) a general, unlimited inquiry
    fn start(&mut self);

    fn stop(&mut self);
}
