//! BLE serial emulation path of the link

use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::event::LinkEvent;
use crate::native::{
    BleController, BluetoothStack, Characteristic, ControllerEvent, DescriptorRef, EventSink,
    GattService, NativeEvent, Registration, ServiceEvent, ServiceState, SessionId, WriteMode,
};
use crate::protocol::{
    write_chunks, CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, NOTIFICATIONS_DISABLE,
    NOTIFICATIONS_ENABLE, RX_TX_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID,
};

use super::{BluetoothLink, LinkState, Session};

// ----------------------------------------------------------------------------
// BLE Session
// ----------------------------------------------------------------------------

/// Controller, service and notification descriptor of one BLE connection
pub(super) struct BleSession {
    pub(super) id: SessionId,
    pub(super) state: LinkState,
    registration: Registration,
    controller: Box<dyn BleController>,
    service: Option<Box<dyn GattService>>,
    rx_tx: Option<Characteristic>,
    notification_descriptor: Option<DescriptorRef>,
    service_found: bool,
}

impl BleSession {
    fn new(id: SessionId, registration: Registration, controller: Box<dyn BleController>) -> Self {
        Self {
            id,
            state: LinkState::Connecting,
            registration,
            controller,
            service: None,
            rx_tx: None,
            notification_descriptor: None,
            service_found: false,
        }
    }

    /// Issue a payload as one or more unacknowledged writes, returning the
    /// number of chunks handed to the service
    pub(super) fn write(&mut self, data: &[u8]) -> usize {
        let (Some(service), Some(characteristic)) = (self.service.as_mut(), self.rx_tx.as_ref())
        else {
            return 0;
        };

        let mut issued = 0;
        for chunk in write_chunks(data) {
            if let Err(e) =
                service.write_characteristic(characteristic, chunk, WriteMode::WithoutResponse)
            {
                // Remaining bytes of this call are dropped
                warn!("Error writing chunk {}: {}", issued, e);
                break;
            }
            issued += 1;
        }
        issued
    }

    /// Disconnect the controller, then release the service and the controller
    pub(super) fn release(mut self) {
        self.registration.cancel();
        self.controller.disconnect_from_device();
        drop(self.service.take());
        drop(self.controller);
    }
}

// ----------------------------------------------------------------------------
// Event Handling
// ----------------------------------------------------------------------------

impl<S: BluetoothStack> BluetoothLink<S> {
    pub(super) fn connect_ble(
        &mut self,
        id: SessionId,
        sink: EventSink<NativeEvent>,
        registration: Registration,
    ) {
        let controller = match self.stack.create_central(&self.device, sink) {
            Ok(controller) => controller,
            Err(e) => {
                registration.cancel();
                self.report_error(
                    ErrorKind::Connection,
                    format!("Failed to create BLE controller: {}", e),
                );
                return;
            }
        };

        let mut session = BleSession::new(id, registration, controller);
        session.controller.connect_to_device();
        self.session = Session::Ble(session);
    }

    pub(super) fn on_controller_event(&mut self, event: ControllerEvent) {
        let Session::Ble(session) = &mut self.session else {
            return;
        };

        match event {
            ControllerEvent::Connected => {
                info!("Device connected, discovering services");
                session.state = LinkState::ServiceDiscovery;
                session.controller.discover_services();
            }
            ControllerEvent::ServiceDiscovered(uuid) => {
                debug!("Service discovered: {}", uuid);
                if uuid == SERIAL_SERVICE_UUID {
                    session.service_found = true;
                    session.state = LinkState::ServiceFound;
                }
            }
            ControllerEvent::DiscoveryFinished => {
                debug!("Service discovery finished");
                session.service = None;

                let service = if session.service_found {
                    session.controller.create_service(SERIAL_SERVICE_UUID)
                } else {
                    None
                };

                match service {
                    Some(mut service) => {
                        debug!("Connecting to UART service");
                        service.discover_details();
                        session.service = Some(service);
                    }
                    None => self.report_error(
                        ErrorKind::Protocol,
                        format!("UART service {} not found", SERIAL_SERVICE_UUID),
                    ),
                }
            }
            ControllerEvent::StateChanged(state) => {
                debug!("Controller state changed to {:?}", state);
            }
            ControllerEvent::Error(e) => {
                self.report_error(ErrorKind::Connection, format!("Device error: {}", e));
            }
            ControllerEvent::Disconnected => {
                info!("Device disconnected");
                self.teardown();
            }
        }
    }

    pub(super) fn on_service_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::StateChanged(ServiceState::Discovered) => self.on_service_discovered(),
            ServiceEvent::StateChanged(state) => {
                debug!("Service state changed to {:?}", state);
            }
            ServiceEvent::CharacteristicChanged { value, .. } => {
                self.emit(LinkEvent::BytesReceived(value));
            }
            ServiceEvent::DescriptorWritten { descriptor, value } => {
                self.on_descriptor_written(descriptor, value);
            }
            ServiceEvent::Error(e) => {
                let kind = e.kind();
                self.report_error(kind, format!("Service error: {}", e));
            }
        }
    }

    /// Locate the RX/TX characteristic and turn its notifications on.
    ///
    /// The link is Ready as soon as the enable write is issued, without
    /// waiting for its acknowledgement.
    fn on_service_discovered(&mut self) {
        let Session::Ble(session) = &mut self.session else {
            return;
        };
        let Some(service) = session.service.as_mut() else {
            return;
        };

        let Some(characteristic) = service.characteristic(RX_TX_CHARACTERISTIC_UUID) else {
            self.report_error(
                ErrorKind::Protocol,
                format!("RX/TX characteristic {} not found", RX_TX_CHARACTERISTIC_UUID),
            );
            return;
        };

        session.state = LinkState::NotifyEnabling;
        let descriptor = characteristic.descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION_UUID);
        match &descriptor {
            Some(descriptor) => {
                debug!("Enabling notifications");
                service.write_descriptor(descriptor, &NOTIFICATIONS_ENABLE);
            }
            None => warn!("RX/TX characteristic has no notification descriptor"),
        }

        session.notification_descriptor = descriptor;
        session.rx_tx = Some(characteristic);
        session.state = LinkState::Ready;
        self.connected = true;

        info!("BLE link to {} ready", self.device);
        self.emit(LinkEvent::Connected);
    }

    fn on_descriptor_written(&mut self, descriptor: DescriptorRef, value: Vec<u8>) {
        debug!(
            "Descriptor written. Id: {}. New value: {}",
            descriptor.uuid,
            hex::encode(&value)
        );

        let Session::Ble(session) = &self.session else {
            return;
        };

        if session.notification_descriptor == Some(descriptor) && value == NOTIFICATIONS_DISABLE {
            // Notifications switched off: treat as a request to close the link
            info!("Notifications disabled by remote, disconnecting");
            self.teardown();
        }
    }
}
