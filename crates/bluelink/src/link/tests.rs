use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::device::Locator;
use crate::native::{ControllerEvent, DescriptorRef, ServiceEvent, ServiceState, SocketEvent, WriteMode};
use crate::protocol::{
    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, RX_TX_CHARACTERISTIC_UUID,
    SERIAL_PORT_SERVICE_CLASS_UUID, SERIAL_SERVICE_UUID,
};
use crate::testing::{MockStack, Op};

const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

fn notification_descriptor() -> DescriptorRef {
    DescriptorRef {
        characteristic: RX_TX_CHARACTERISTIC_UUID,
        uuid: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
    }
}

fn device(is_ble: bool) -> DeviceDescriptor {
    let name = if is_ble { "Drone-A (BLE)" } else { "Drone-A" };
    DeviceDescriptor::new(name, Locator::address(ADDRESS).unwrap(), is_ble)
}

fn new_link(
    is_ble: bool,
    stack: MockStack,
) -> (BluetoothLink<MockStack>, UnboundedReceiver<LinkEvent>) {
    BluetoothLink::new(device(is_ble), LinkConfig::default(), stack)
}

fn drain(rx: &mut UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Walk a BLE link through discovery up to Ready
fn ble_ready(stack: &MockStack) -> (BluetoothLink<MockStack>, UnboundedReceiver<LinkEvent>) {
    let (mut link, mut rx) = new_link(true, stack.clone());
    link.connect();

    stack.emit(ControllerEvent::Connected);
    stack.emit(ControllerEvent::ServiceDiscovered(SERIAL_SERVICE_UUID));
    stack.emit(ControllerEvent::DiscoveryFinished);
    stack.emit(ServiceEvent::StateChanged(ServiceState::Discovered));
    link.process_pending_events();

    assert!(link.is_connected());
    assert_eq!(drain(&mut rx), vec![LinkEvent::Connected]);
    (link, rx)
}

fn classic_ready(stack: &MockStack) -> (BluetoothLink<MockStack>, UnboundedReceiver<LinkEvent>) {
    let (mut link, mut rx) = new_link(false, stack.clone());
    link.connect();
    stack.emit(SocketEvent::Connected);
    link.process_pending_events();

    assert!(link.is_connected());
    assert_eq!(drain(&mut rx), vec![LinkEvent::Connected]);
    (link, rx)
}

// ----------------------------------------------------------------------------
// Variant Selection
// ----------------------------------------------------------------------------

#[test]
fn test_classic_descriptor_never_creates_controller() {
    let stack = MockStack::new();
    let (mut link, _rx) = new_link(false, stack.clone());
    link.connect();

    assert_eq!(stack.count(|op| matches!(op, Op::CreateCentral(_))), 0);
    assert_eq!(
        stack.ops(),
        vec![
            Op::CreateSocket,
            Op::ConnectToService(
                Locator::address(ADDRESS).unwrap(),
                SERIAL_PORT_SERVICE_CLASS_UUID
            ),
        ]
    );
    assert_eq!(link.state(), LinkState::SocketConnecting);
}

#[test]
fn test_ble_descriptor_never_opens_socket() {
    let stack = MockStack::new();
    let (mut link, _rx) = new_link(true, stack.clone());
    link.connect();

    assert_eq!(stack.count(|op| matches!(op, Op::CreateSocket)), 0);
    assert_eq!(
        stack.ops(),
        vec![
            Op::CreateCentral(Locator::address(ADDRESS).unwrap()),
            Op::ConnectToDevice
        ]
    );
    assert_eq!(link.state(), LinkState::Connecting);
}

#[test]
fn test_locator_outside_addressing_mode_is_rejected() {
    let stack = MockStack::new();
    let config = LinkConfig::new().with_addressing_mode(crate::AddressingMode::OpaqueId);
    let (mut link, mut rx) = BluetoothLink::new(device(true), config, stack.clone());
    link.connect();

    assert!(stack.ops().is_empty());
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        LinkEvent::CommunicationError {
            kind: ErrorKind::Connection,
            ..
        }
    ));
}

// ----------------------------------------------------------------------------
// BLE Setup
// ----------------------------------------------------------------------------

#[test]
fn test_ble_connected_before_descriptor_acknowledged() {
    let stack = MockStack::new();
    let (mut link, mut rx) = new_link(true, stack.clone());
    link.connect();

    stack.emit(ControllerEvent::Connected);
    link.process_pending_events();
    assert_eq!(link.state(), LinkState::ServiceDiscovery);
    assert!(stack.ops().contains(&Op::DiscoverServices));

    stack.emit(ControllerEvent::ServiceDiscovered(SERIAL_SERVICE_UUID));
    link.process_pending_events();
    assert_eq!(link.state(), LinkState::ServiceFound);
    // The service handle waits for discovery to finish
    assert_eq!(stack.count(|op| matches!(op, Op::CreateService(_))), 0);

    stack.emit(ControllerEvent::DiscoveryFinished);
    link.process_pending_events();
    assert_eq!(stack.count(|op| matches!(op, Op::CreateService(_))), 1);
    assert!(stack.ops().contains(&Op::DiscoverDetails));

    stack.emit(ServiceEvent::StateChanged(ServiceState::Discovered));
    link.process_pending_events();

    assert!(stack.ops().contains(&Op::WriteDescriptor(
        notification_descriptor(),
        vec![0x01, 0x00]
    )));
    // No acknowledgement has been delivered yet
    assert!(link.is_connected());
    assert_eq!(link.state(), LinkState::Ready);
    assert_eq!(drain(&mut rx), vec![LinkEvent::Connected]);

    stack.emit(ServiceEvent::DescriptorWritten {
        descriptor: notification_descriptor(),
        value: vec![0x01, 0x00],
    });
    link.process_pending_events();
    assert!(link.is_connected());
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_other_services_are_ignored() {
    let stack = MockStack::new();
    let (mut link, mut rx) = new_link(true, stack.clone());
    link.connect();

    stack.emit(ControllerEvent::Connected);
    stack.emit(ControllerEvent::ServiceDiscovered(uuid::Uuid::from_u128(0x1800)));
    stack.emit(ControllerEvent::DiscoveryFinished);
    link.process_pending_events();

    assert_eq!(stack.count(|op| matches!(op, Op::CreateService(_))), 0);
    let events = drain(&mut rx);
    assert!(matches!(
        events[0],
        LinkEvent::CommunicationError {
            kind: ErrorKind::Protocol,
            ..
        }
    ));
    assert_eq!(events[1], LinkEvent::Disconnected);
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[test]
fn test_missing_characteristic_is_protocol_error() {
    let stack = MockStack::new().without_characteristics();
    let (mut link, mut rx) = new_link(true, stack.clone());
    link.connect();

    stack.emit(ControllerEvent::Connected);
    stack.emit(ControllerEvent::ServiceDiscovered(SERIAL_SERVICE_UUID));
    stack.emit(ControllerEvent::DiscoveryFinished);
    stack.emit(ServiceEvent::StateChanged(ServiceState::Discovered));
    link.process_pending_events();

    assert!(!link.is_connected());
    assert_eq!(stack.count(|op| matches!(op, Op::WriteDescriptor(..))), 0);
    let events = drain(&mut rx);
    assert_eq!(
        events.iter().filter(|e| e.is_error()).count(),
        1,
        "{:?}",
        events
    );
    assert!(!events.contains(&LinkEvent::Connected));
}

#[test]
fn test_controller_error_reports_connection_error() {
    let stack = MockStack::new();
    let (mut link, mut rx) = new_link(true, stack.clone());
    link.connect();

    stack.emit(ControllerEvent::Error(crate::NativeError::Controller(
        "UnknownRemoteDeviceError".into(),
    )));
    link.process_pending_events();

    let events = drain(&mut rx);
    assert!(matches!(
        events[0],
        LinkEvent::CommunicationError {
            kind: ErrorKind::Connection,
            ..
        }
    ));
    assert!(!link.is_connected());
    assert_eq!(link.state(), LinkState::Disconnected);
}

// ----------------------------------------------------------------------------
// BLE Data
// ----------------------------------------------------------------------------

#[test]
fn test_ble_write_of_45_bytes_issues_three_chunks() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);

    let payload: Vec<u8> = (0..45).collect();
    link.write(&payload);

    let writes = stack.characteristic_writes();
    assert_eq!(
        writes.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![20, 20, 5]
    );
    assert_eq!(writes.concat(), payload);
    assert_eq!(
        stack.count(|op| matches!(op, Op::WriteCharacteristic(_, WriteMode::WithoutResponse))),
        3
    );
    assert_eq!(drain(&mut rx), vec![LinkEvent::BytesSent(payload)]);
}

#[test]
fn test_ble_small_write_is_single_chunk() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);

    link.write(b"twenty bytes exactly");
    assert_eq!(stack.characteristic_writes().len(), 1);
    assert_eq!(
        drain(&mut rx),
        vec![LinkEvent::BytesSent(b"twenty bytes exactly".to_vec())]
    );
}

#[test]
fn test_ble_chunk_failure_stops_and_still_reports_sent() {
    let stack = MockStack::new().fail_write_at(2);
    let (mut link, mut rx) = ble_ready(&stack);

    let payload = vec![7u8; 70];
    link.write(&payload);

    assert_eq!(stack.characteristic_writes().len(), 2);
    assert_eq!(drain(&mut rx), vec![LinkEvent::BytesSent(payload)]);
    assert!(link.is_connected());
}

#[test]
fn test_ble_notifications_delivered_verbatim() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);

    stack.emit(ServiceEvent::CharacteristicChanged {
        characteristic: RX_TX_CHARACTERISTIC_UUID,
        value: vec![0xFE, 0x01],
    });
    stack.emit(ServiceEvent::CharacteristicChanged {
        characteristic: RX_TX_CHARACTERISTIC_UUID,
        value: vec![0x02],
    });
    link.process_pending_events();

    assert_eq!(
        drain(&mut rx),
        vec![
            LinkEvent::BytesReceived(vec![0xFE, 0x01]),
            LinkEvent::BytesReceived(vec![0x02]),
        ]
    );
}

#[test]
fn test_write_before_ready_is_dropped() {
    let stack = MockStack::new();
    let (mut link, mut rx) = new_link(true, stack.clone());
    link.write(b"lost");
    link.connect();
    link.write(b"lost too");

    assert!(stack.characteristic_writes().is_empty());
    assert!(drain(&mut rx).is_empty());
}

// ----------------------------------------------------------------------------
// Teardown
// ----------------------------------------------------------------------------

#[test]
fn test_disconnect_without_session_is_noop() {
    let stack = MockStack::new();
    let (mut link, mut rx) = new_link(true, stack.clone());

    link.disconnect();
    link.disconnect();

    assert!(stack.ops().is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_ble_disconnect_releases_in_order_once() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);
    stack.clear_ops();

    link.disconnect();
    link.disconnect();

    assert_eq!(
        stack.ops(),
        vec![
            Op::DisconnectFromDevice,
            Op::ReleaseService,
            Op::ReleaseController
        ]
    );
    assert_eq!(drain(&mut rx), vec![LinkEvent::Disconnected]);
    assert!(!link.is_connected());
}

#[test]
fn test_notification_disable_acts_as_disconnect() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);
    let sink = stack.native_sink().unwrap();

    stack.emit(ServiceEvent::DescriptorWritten {
        descriptor: notification_descriptor(),
        value: vec![0x00, 0x00],
    });
    link.process_pending_events();

    assert_eq!(drain(&mut rx), vec![LinkEvent::Disconnected]);
    assert!(!link.is_connected());
    assert!(!sink.is_registered());

    // Explicit call after the implicit teardown stays silent
    link.disconnect();
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_disconnect_and_remote_signal_emit_once() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);
    let sink = stack.native_sink().unwrap();

    // Remote signal already queued when the caller disconnects
    sink.emit(
        ServiceEvent::DescriptorWritten {
            descriptor: notification_descriptor(),
            value: vec![0x00, 0x00],
        }
        .into(),
    );
    link.disconnect();
    link.process_pending_events();

    // Late native callbacks after teardown are not delivered
    sink.emit(ControllerEvent::Disconnected.into());
    link.process_pending_events();

    assert_eq!(drain(&mut rx), vec![LinkEvent::Disconnected]);
}

#[test]
fn test_remote_controller_disconnect_tears_down() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);

    stack.emit(ControllerEvent::Disconnected);
    link.process_pending_events();

    assert_eq!(drain(&mut rx), vec![LinkEvent::Disconnected]);
    assert!(stack.ops().contains(&Op::ReleaseController));
}

#[test]
fn test_reconnect_replaces_previous_session() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);
    let old_sink = stack.native_sink().unwrap();

    link.connect();
    assert_eq!(drain(&mut rx), vec![LinkEvent::Disconnected]);
    assert_eq!(stack.count(|op| matches!(op, Op::CreateCentral(_))), 2);

    // Events from the first session no longer reach the link
    assert!(!old_sink.emit(ControllerEvent::Connected.into()));
    link.process_pending_events();
    assert_eq!(link.state(), LinkState::Connecting);
}

#[test]
fn test_drop_tears_down_session() {
    let stack = MockStack::new();
    let (link, mut rx) = ble_ready(&stack);
    drop(link);

    assert!(stack.ops().contains(&Op::ReleaseController));
    assert_eq!(drain(&mut rx), vec![LinkEvent::Disconnected]);
}

// ----------------------------------------------------------------------------
// Classic
// ----------------------------------------------------------------------------

#[test]
fn test_classic_write_is_one_socket_write() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);
    stack.set_socket_write_result(Some(100));

    let payload = vec![1u8; 100];
    link.write(&payload);

    assert_eq!(stack.count(|op| matches!(op, Op::SocketWrite(_))), 1);
    assert_eq!(drain(&mut rx), vec![LinkEvent::BytesSent(payload)]);
}

#[test]
fn test_classic_write_of_zero_bytes_is_silent() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);
    stack.set_socket_write_result(Some(0));

    link.write(b"hello");
    assert_eq!(stack.count(|op| matches!(op, Op::SocketWrite(_))), 1);
    assert!(drain(&mut rx).is_empty());

    stack.set_socket_write_result(None);
    link.write(b"hello");
    assert!(drain(&mut rx).is_empty());
    assert!(link.is_connected());
}

#[test]
fn test_classic_read_drains_in_passes() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);
    stack.push_socket_rx(b"abcdef");
    stack.set_read_limit(4);

    stack.emit(SocketEvent::ReadyRead);
    link.process_pending_events();

    assert_eq!(
        drain(&mut rx),
        vec![
            LinkEvent::BytesReceived(b"abcd".to_vec()),
            LinkEvent::BytesReceived(b"ef".to_vec()),
        ]
    );
}

#[test]
fn test_classic_remote_disconnect_only_clears_ready() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);

    stack.emit(SocketEvent::Disconnected);
    link.process_pending_events();
    assert!(!link.is_connected());
    assert!(drain(&mut rx).is_empty());

    stack.clear_ops();
    link.disconnect();
    assert_eq!(stack.ops(), vec![Op::SocketClose, Op::ReleaseSocket]);
    assert_eq!(drain(&mut rx), vec![LinkEvent::Disconnected]);
}

#[test]
fn test_classic_socket_error_is_reported_once() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);

    stack.emit(SocketEvent::Error(crate::NativeError::Socket(
        "Connection reset by peer".into(),
    )));
    link.process_pending_events();

    assert_eq!(
        drain(&mut rx),
        vec![
            LinkEvent::CommunicationError {
                kind: ErrorKind::Connection,
                message: "Socket error: Connection reset by peer".into(),
            },
            LinkEvent::Disconnected,
        ]
    );
}

#[test]
fn test_abort_connect_only_while_connecting() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);
    link.abort_connect("timed out");
    assert!(drain(&mut rx).is_empty());

    link.connect();
    drain(&mut rx);
    link.abort_connect("timed out");
    let events = drain(&mut rx);
    assert!(events[0].is_error());
    assert_eq!(events[1], LinkEvent::Disconnected);
}

#[test]
fn test_classic_remote_disconnect_is_not_connecting() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);

    stack.emit(SocketEvent::Disconnected);
    link.process_pending_events();
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(!link.is_connecting());

    link.abort_connect("timed out");
    assert!(drain(&mut rx).is_empty());
}

// ----------------------------------------------------------------------------
// Error Paths
// ----------------------------------------------------------------------------

#[test]
fn test_service_error_reports_discovery_error() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);

    stack.emit(ServiceEvent::Error(crate::NativeError::Service(
        "attribute table unreadable".into(),
    )));
    link.process_pending_events();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        LinkEvent::CommunicationError { kind: ErrorKind::Discovery, message }
            if message.contains("attribute table unreadable")
    ));
    assert_eq!(events[1], LinkEvent::Disconnected);
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[test]
fn test_service_write_fault_reports_io_error() {
    let stack = MockStack::new();
    let (mut link, mut rx) = ble_ready(&stack);

    stack.emit(ServiceEvent::Error(crate::NativeError::Write(
        "characteristic write error".into(),
    )));
    link.process_pending_events();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        LinkEvent::CommunicationError { kind: ErrorKind::Io, .. }
    ));
    assert_eq!(events[1], LinkEvent::Disconnected);
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[test]
fn test_classic_read_failure_after_drained_buffers() {
    let stack = MockStack::new();
    let (mut link, mut rx) = classic_ready(&stack);

    stack.set_read_limit(2);
    stack.push_socket_rx(b"abcdef");
    stack.fail_reads_after(1);
    stack.clear_ops();
    stack.emit(SocketEvent::ReadyRead);
    link.process_pending_events();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], LinkEvent::BytesReceived(b"ab".to_vec()));
    assert!(matches!(
        &events[1],
        LinkEvent::CommunicationError { kind: ErrorKind::Io, message }
            if message.starts_with("Read failed")
    ));
    assert_eq!(events[2], LinkEvent::Disconnected);
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(
        stack.ops(),
        vec![Op::SocketRead(2), Op::SocketClose, Op::ReleaseSocket]
    );
}
