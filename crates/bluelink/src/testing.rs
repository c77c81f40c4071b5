//! In-memory Bluetooth stack that records every native call

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::device::{DeviceDescriptor, Locator};
use crate::error::NativeError;
use crate::native::{
    BleController, BluetoothStack, Characteristic, DescriptorRef, DiscoveryAgent, DiscoveryEvent,
    DiscoveryStack, EventSink, GattService, NativeEvent, RfcommSocket, WriteMode,
};
use crate::protocol::{
    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, RX_TX_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID,
};

/// Native call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateCentral(Locator),
    ConnectToDevice,
    DiscoverServices,
    CreateService(Uuid),
    DiscoverDetails,
    WriteDescriptor(DescriptorRef, Vec<u8>),
    WriteCharacteristic(Vec<u8>, WriteMode),
    DisconnectFromDevice,
    ReleaseService,
    ReleaseController,
    CreateSocket,
    ConnectToService(Locator, Uuid),
    SocketWrite(Vec<u8>),
    SocketRead(usize),
    SocketClose,
    ReleaseSocket,
    CreateAgent,
    StartDiscovery,
    StopDiscovery,
    ReleaseAgent,
}

struct MockState {
    ops: Vec<Op>,
    native_sink: Option<EventSink<NativeEvent>>,
    discovery_sink: Option<EventSink<DiscoveryEvent>>,
    offer_service: bool,
    characteristics: Vec<Characteristic>,
    fail_write_at: Option<usize>,
    writes_attempted: usize,
    socket_write_result: Option<usize>,
    socket_rx: VecDeque<u8>,
    read_limit: usize,
    fail_read_after: Option<usize>,
    reads_done: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            native_sink: None,
            discovery_sink: None,
            offer_service: true,
            characteristics: vec![Characteristic {
                uuid: RX_TX_CHARACTERISTIC_UUID,
                descriptors: vec![CLIENT_CHARACTERISTIC_CONFIGURATION_UUID],
            }],
            fail_write_at: None,
            writes_attempted: 0,
            socket_write_result: None,
            socket_rx: VecDeque::new(),
            read_limit: usize::MAX,
            fail_read_after: None,
            reads_done: 0,
        }
    }
}

/// Recording stack shared between the test and the handles it hands out
#[derive(Clone, Default)]
pub struct MockStack {
    state: Arc<Mutex<MockState>>,
}

impl MockStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn record(&self, op: Op) {
        self.lock().ops.push(op);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.lock().ops.iter().filter(|op| pred(op)).count()
    }

    pub fn characteristic_writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::WriteCharacteristic(value, _) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Emit through the most recent link session's sink
    pub fn emit(&self, event: impl Into<NativeEvent>) -> bool {
        let sink = self.lock().native_sink.clone();
        sink.map(|s| s.emit(event.into())).unwrap_or(false)
    }

    /// Emit through the most recent discovery agent's sink
    pub fn emit_discovery(&self, event: DiscoveryEvent) -> bool {
        let sink = self.lock().discovery_sink.clone();
        sink.map(|s| s.emit(event)).unwrap_or(false)
    }

    pub fn native_sink(&self) -> Option<EventSink<NativeEvent>> {
        self.lock().native_sink.clone()
    }

    pub fn without_serial_service(self) -> Self {
        self.lock().offer_service = false;
        self
    }

    pub fn without_characteristics(self) -> Self {
        self.lock().characteristics.clear();
        self
    }

    /// Make the n-th characteristic write (1-based) fail
    pub fn fail_write_at(self, n: usize) -> Self {
        self.lock().fail_write_at = Some(n);
        self
    }

    /// Byte count the socket reports for writes; `None` makes writes fail
    pub fn set_socket_write_result(&self, result: Option<usize>) {
        self.lock().socket_write_result = result;
    }

    pub fn push_socket_rx(&self, data: &[u8]) {
        self.lock().socket_rx.extend(data);
    }

    /// Cap each socket read, simulating a stack that hands out data in pieces
    pub fn set_read_limit(&self, limit: usize) {
        self.lock().read_limit = limit;
    }

    /// Let `n` socket reads succeed, then fail every later one
    pub fn fail_reads_after(&self, n: usize) {
        self.lock().fail_read_after = Some(n);
    }
}

impl BluetoothStack for MockStack {
    fn create_central(
        &mut self,
        device: &DeviceDescriptor,
        events: EventSink<NativeEvent>,
    ) -> Result<Box<dyn BleController>, NativeError> {
        let mut state = self.lock();
        state.ops.push(Op::CreateCentral(device.locator.clone()));
        state.native_sink = Some(events);
        drop(state);
        Ok(Box::new(MockController {
            stack: self.clone(),
        }))
    }

    fn create_rfcomm_socket(
        &mut self,
        events: EventSink<NativeEvent>,
    ) -> Result<Box<dyn RfcommSocket>, NativeError> {
        let mut state = self.lock();
        state.ops.push(Op::CreateSocket);
        state.native_sink = Some(events);
        drop(state);
        Ok(Box::new(MockSocket {
            stack: self.clone(),
        }))
    }
}

impl DiscoveryStack for MockStack {
    fn create_discovery_agent(
        &mut self,
        events: EventSink<DiscoveryEvent>,
    ) -> Result<Box<dyn DiscoveryAgent>, NativeError> {
        let mut state = self.lock();
        state.ops.push(Op::CreateAgent);
        state.discovery_sink = Some(events);
        drop(state);
        Ok(Box::new(MockAgent {
            stack: self.clone(),
        }))
    }
}

struct MockController {
    stack: MockStack,
}

impl BleController for MockController {
    fn connect_to_device(&mut self) {
        self.stack.record(Op::ConnectToDevice);
    }

    fn discover_services(&mut self) {
        self.stack.record(Op::DiscoverServices);
    }

    fn create_service(&mut self, uuid: Uuid) -> Option<Box<dyn GattService>> {
        self.stack.record(Op::CreateService(uuid));
        if uuid == SERIAL_SERVICE_UUID && self.stack.lock().offer_service {
            Some(Box::new(MockService {
                stack: self.stack.clone(),
            }))
        } else {
            None
        }
    }

    fn disconnect_from_device(&mut self) {
        self.stack.record(Op::DisconnectFromDevice);
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.stack.record(Op::ReleaseController);
    }
}

struct MockService {
    stack: MockStack,
}

impl GattService for MockService {
    fn discover_details(&mut self) {
        self.stack.record(Op::DiscoverDetails);
    }

    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.stack
            .lock()
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
    }

    fn write_descriptor(&mut self, descriptor: &DescriptorRef, value: &[u8]) {
        self.stack
            .record(Op::WriteDescriptor(*descriptor, value.to_vec()));
    }

    fn write_characteristic(
        &mut self,
        _characteristic: &Characteristic,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), NativeError> {
        let mut state = self.stack.lock();
        state.ops.push(Op::WriteCharacteristic(value.to_vec(), mode));
        state.writes_attempted += 1;
        if state.fail_write_at == Some(state.writes_attempted) {
            return Err(NativeError::Write("characteristic write error".into()));
        }
        Ok(())
    }
}

impl Drop for MockService {
    fn drop(&mut self) {
        self.stack.record(Op::ReleaseService);
    }
}

struct MockSocket {
    stack: MockStack,
}

impl RfcommSocket for MockSocket {
    fn connect_to_service(&mut self, locator: &Locator, service_class: Uuid) {
        self.stack
            .record(Op::ConnectToService(locator.clone(), service_class));
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, NativeError> {
        let mut state = self.stack.lock();
        state.ops.push(Op::SocketWrite(data.to_vec()));
        state
            .socket_write_result
            .ok_or_else(|| NativeError::Socket("write failed".into()))
    }

    fn bytes_available(&self) -> usize {
        self.stack.lock().socket_rx.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, NativeError> {
        let mut state = self.stack.lock();
        if state.fail_read_after.is_some_and(|n| state.reads_done >= n) {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }
        state.reads_done += 1;
        let n = buf.len().min(state.socket_rx.len()).min(state.read_limit);
        for (slot, byte) in buf.iter_mut().zip(state.socket_rx.drain(..n)) {
            *slot = byte;
        }
        state.ops.push(Op::SocketRead(n));
        Ok(n)
    }

    fn close(&mut self) {
        self.stack.record(Op::SocketClose);
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        self.stack.record(Op::ReleaseSocket);
    }
}

struct MockAgent {
    stack: MockStack,
}

impl DiscoveryAgent for MockAgent {
    fn start(&mut self) {
        self.stack.record(Op::StartDiscovery);
    }

    fn stop(&mut self) {
        self.stack.record(Op::StopDiscovery);
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.stack.record(Op::ReleaseAgent);
    }
}
