//! btleplug backed GATT central and device discovery

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
    Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::{DeviceDescriptor, Locator};
use crate::error::{BluetoothError, NativeError, Result};
use crate::native::{
    BleController, BluetoothStack, Characteristic, ControllerEvent, DescriptorRef,
    DiscoveredDevice, DiscoveryAgent, DiscoveryEvent, DiscoveryStack, EventSink, GattService,
    NativeEvent, RfcommSocket, ServiceEvent, ServiceState, WriteMode,
};
use crate::protocol::{
    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, NOTIFICATIONS_DISABLE, NOTIFICATIONS_ENABLE,
};

/// How long to scan when the target is not yet known to the adapter
const LOOKUP_SCAN: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Stack
// ----------------------------------------------------------------------------

/// Native layer on top of the first btleplug adapter.
///
/// Classic RFCOMM sockets are delegated to BlueZ on Linux and unsupported
/// elsewhere.
#[derive(Clone)]
pub struct BtleplugStack {
    adapter: Adapter,
    runtime: Handle,
    #[cfg(target_os = "linux")]
    rfcomm: Option<super::rfcomm::BluerRfcomm>,
}

impl BtleplugStack {
    /// Open the first Bluetooth adapter. Must be called inside a tokio runtime.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BluetoothError::AdapterNotAvailable)?;

        info!("Bluetooth adapter initialized");

        Ok(Self {
            adapter,
            runtime: Handle::current(),
            #[cfg(target_os = "linux")]
            rfcomm: match super::rfcomm::BluerRfcomm::new().await {
                Ok(rfcomm) => Some(rfcomm),
                Err(e) => {
                    warn!("Classic RFCOMM unavailable: {}", e);
                    None
                }
            },
        })
    }
}

impl BluetoothStack for BtleplugStack {
    fn create_central(
        &mut self,
        device: &DeviceDescriptor,
        events: EventSink<NativeEvent>,
    ) -> std::result::Result<Box<dyn BleController>, NativeError> {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let worker = ControllerWorker {
            adapter: self.adapter.clone(),
            locator: device.locator.clone(),
            events,
            shared: Arc::clone(&shared),
            peripheral: None,
            watchers: Vec::new(),
        };
        self.runtime.spawn(worker.run(ops_rx));

        Ok(Box::new(BtleplugController {
            ops: ops_tx,
            shared,
        }))
    }

    #[cfg(target_os = "linux")]
    fn create_rfcomm_socket(
        &mut self,
        events: EventSink<NativeEvent>,
    ) -> std::result::Result<Box<dyn RfcommSocket>, NativeError> {
        match &self.rfcomm {
            Some(rfcomm) => Ok(Box::new(rfcomm.socket(events, self.runtime.clone()))),
            None => Err(NativeError::Unsupported("BlueZ session not available")),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn create_rfcomm_socket(
        &mut self,
        _events: EventSink<NativeEvent>,
    ) -> std::result::Result<Box<dyn RfcommSocket>, NativeError> {
        Err(NativeError::Unsupported("classic RFCOMM sockets"))
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// Requests queued to the controller worker, executed strictly in order
#[derive(Debug)]
enum ControllerOp {
    Connect,
    DiscoverServices,
    DiscoverDetails(Uuid),
    WriteDescriptor(DescriptorRef, Vec<u8>),
    Write(Uuid, Vec<u8>, WriteMode),
    Disconnect,
}

/// State published by the worker for the synchronous handles
#[derive(Default)]
struct Shared {
    services: Mutex<BTreeSet<Service>>,
    faulted: AtomicBool,
}

impl Shared {
    fn services(&self) -> std::sync::MutexGuard<'_, BTreeSet<Service>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct BtleplugController {
    ops: mpsc::UnboundedSender<ControllerOp>,
    shared: Arc<Shared>,
}

impl BtleplugController {
    fn send(&self, op: ControllerOp) {
        if self.ops.send(op).is_err() {
            debug!("Controller worker already stopped");
        }
    }
}

impl BleController for BtleplugController {
    fn connect_to_device(&mut self) {
        self.send(ControllerOp::Connect);
    }

    fn discover_services(&mut self) {
        self.send(ControllerOp::DiscoverServices);
    }

    fn create_service(&mut self, uuid: Uuid) -> Option<Box<dyn GattService>> {
        if !self.shared.services().iter().any(|s| s.uuid == uuid) {
            return None;
        }

        Some(Box::new(BtleplugService {
            uuid,
            ops: self.ops.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn disconnect_from_device(&mut self) {
        self.send(ControllerOp::Disconnect);
    }
}

struct BtleplugService {
    uuid: Uuid,
    ops: mpsc::UnboundedSender<ControllerOp>,
    shared: Arc<Shared>,
}

impl BtleplugService {
    fn send(&self, op: ControllerOp) {
        if self.ops.send(op).is_err() {
            debug!("Controller worker for service {} already stopped", self.uuid);
        }
    }
}

impl GattService for BtleplugService {
    fn discover_details(&mut self) {
        self.send(ControllerOp::DiscoverDetails(self.uuid));
    }

    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        let services = self.shared.services();
        let service = services.iter().find(|s| s.uuid == self.uuid)?;
        let found = service.characteristics.iter().find(|c| c.uuid == uuid)?;

        let mut descriptors: Vec<Uuid> = found.descriptors.iter().map(|d| d.uuid).collect();
        // Some hosts hide the CCCD; btleplug manages it through subscribe()
        let notifies = found
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);
        if notifies && !descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIGURATION_UUID) {
            descriptors.push(CLIENT_CHARACTERISTIC_CONFIGURATION_UUID);
        }

        Some(Characteristic { uuid, descriptors })
    }

    fn write_descriptor(&mut self, descriptor: &DescriptorRef, value: &[u8]) {
        self.send(ControllerOp::WriteDescriptor(*descriptor, value.to_vec()));
    }

    fn write_characteristic(
        &mut self,
        characteristic: &Characteristic,
        value: &[u8],
        mode: WriteMode,
    ) -> std::result::Result<(), NativeError> {
        if self.shared.faulted.load(Ordering::Acquire) {
            return Err(NativeError::Write("service is in an error state".into()));
        }

        self.ops
            .send(ControllerOp::Write(characteristic.uuid, value.to_vec(), mode))
            .map_err(|_| NativeError::Write("controller stopped".into()))
    }
}

// ----------------------------------------------------------------------------
// Controller Worker
// ----------------------------------------------------------------------------

/// Executes controller requests against one peripheral
struct ControllerWorker {
    adapter: Adapter,
    locator: Locator,
    events: EventSink<NativeEvent>,
    shared: Arc<Shared>,
    peripheral: Option<Peripheral>,
    watchers: Vec<JoinHandle<()>>,
}

impl ControllerWorker {
    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<ControllerOp>) {
        while let Some(op) = ops.recv().await {
            if matches!(op, ControllerOp::Disconnect) {
                self.disconnect().await;
                break;
            }
            self.execute(op).await;
        }

        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        debug!("Controller worker for {} stopped", self.locator);
    }

    async fn execute(&mut self, op: ControllerOp) {
        match op {
            ControllerOp::Connect => match self.connect().await {
                Ok(()) => self.emit(ControllerEvent::Connected),
                Err(e) => self.emit(ControllerEvent::Error(e)),
            },
            ControllerOp::DiscoverServices => self.discover_services().await,
            ControllerOp::DiscoverDetails(uuid) => {
                // btleplug resolves characteristics together with services
                debug!("Service {} details available", uuid);
                self.emit(ServiceEvent::StateChanged(ServiceState::Discovered));
            }
            ControllerOp::WriteDescriptor(descriptor, value) => {
                self.write_descriptor(descriptor, value).await;
            }
            ControllerOp::Write(uuid, value, mode) => self.write(uuid, value, mode).await,
            ControllerOp::Disconnect => {}
        }
    }

    async fn connect(&mut self) -> std::result::Result<(), NativeError> {
        let peripheral = find_peripheral(&self.adapter, &self.locator).await?;
        peripheral.connect().await.map_err(controller_error)?;

        self.watch_notifications(&peripheral).await?;
        self.watch_disconnect(&peripheral).await?;
        self.peripheral = Some(peripheral);

        info!("Connected to {}", self.locator);
        Ok(())
    }

    async fn discover_services(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            return;
        };

        if let Err(e) = peripheral.discover_services().await {
            self.emit(ControllerEvent::Error(controller_error(e)));
            return;
        }

        let services = peripheral.services();
        for service in &services {
            self.emit(ControllerEvent::ServiceDiscovered(service.uuid));
        }
        *self.shared.services() = services;
        self.emit(ControllerEvent::DiscoveryFinished);
    }

    async fn write_descriptor(&mut self, descriptor: DescriptorRef, value: Vec<u8>) {
        let Some(peripheral) = self.peripheral.clone() else {
            return;
        };
        let Some(characteristic) = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == descriptor.characteristic)
        else {
            self.emit(ServiceEvent::Error(NativeError::Service(format!(
                "characteristic {} not found",
                descriptor.characteristic
            ))));
            return;
        };

        let result = if descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION_UUID
            && value == NOTIFICATIONS_ENABLE
        {
            peripheral.subscribe(&characteristic).await
        } else if descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION_UUID
            && value == NOTIFICATIONS_DISABLE
        {
            peripheral.unsubscribe(&characteristic).await
        } else {
            match characteristic
                .descriptors
                .iter()
                .find(|d| d.uuid == descriptor.uuid)
            {
                Some(target) => peripheral.write_descriptor(target, &value).await,
                None => {
                    warn!("Descriptor {} not found", descriptor.uuid);
                    return;
                }
            }
        };

        match result {
            Ok(()) => self.emit(ServiceEvent::DescriptorWritten { descriptor, value }),
            Err(e) => self.emit(ServiceEvent::Error(NativeError::Service(e.to_string()))),
        }
    }

    async fn write(&mut self, uuid: Uuid, value: Vec<u8>, mode: WriteMode) {
        if self.shared.faulted.load(Ordering::Acquire) {
            return;
        }
        let Some(peripheral) = self.peripheral.as_ref() else {
            return;
        };
        let Some(characteristic) = peripheral.characteristics().into_iter().find(|c| c.uuid == uuid)
        else {
            return;
        };

        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };

        if let Err(e) = peripheral.write(&characteristic, &value, write_type).await {
            // Later writes are refused until the session is replaced
            self.shared.faulted.store(true, Ordering::Release);
            self.emit(ServiceEvent::Error(NativeError::Write(e.to_string())));
        }
    }

    async fn disconnect(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect from {}: {}", self.locator, e);
            }
        }
    }

    async fn watch_notifications(
        &mut self,
        peripheral: &Peripheral,
    ) -> std::result::Result<(), NativeError> {
        let mut notifications = peripheral.notifications().await.map_err(controller_error)?;
        let events = self.events.clone();

        self.watchers.push(tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                let delivered = events.emit(
                    ServiceEvent::CharacteristicChanged {
                        characteristic: data.uuid,
                        value: data.value,
                    }
                    .into(),
                );
                if !delivered {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn watch_disconnect(
        &mut self,
        peripheral: &Peripheral,
    ) -> std::result::Result<(), NativeError> {
        let mut adapter_events = self.adapter.events().await.map_err(controller_error)?;
        let id = peripheral.id();
        let events = self.events.clone();

        self.watchers.push(tokio::spawn(async move {
            while let Some(event) = adapter_events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        events.emit(ControllerEvent::Disconnected.into());
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn emit(&self, event: impl Into<NativeEvent>) {
        self.events.emit(event.into());
    }
}

fn controller_error(e: btleplug::Error) -> NativeError {
    match e {
        btleplug::Error::DeviceNotFound => NativeError::UnknownDevice(e.to_string()),
        other => NativeError::Controller(other.to_string()),
    }
}

// ----------------------------------------------------------------------------
// Peripheral Lookup
// ----------------------------------------------------------------------------

/// Find the peripheral for `locator`, scanning briefly if the adapter has not
/// seen it yet
async fn find_peripheral(
    adapter: &Adapter,
    locator: &Locator,
) -> std::result::Result<Peripheral, NativeError> {
    if let Some(peripheral) = lookup(adapter, locator).await? {
        return Ok(peripheral);
    }

    debug!("{} not cached, scanning", locator);
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(controller_error)?;
    tokio::time::sleep(LOOKUP_SCAN).await;
    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop lookup scan: {}", e);
    }

    lookup(adapter, locator)
        .await?
        .ok_or_else(|| NativeError::UnknownDevice(locator.to_string()))
}

async fn lookup(
    adapter: &Adapter,
    locator: &Locator,
) -> std::result::Result<Option<Peripheral>, NativeError> {
    let peripherals = adapter.peripherals().await.map_err(controller_error)?;
    Ok(peripherals.into_iter().find(|p| matches_locator(p, locator)))
}

fn matches_locator(peripheral: &Peripheral, locator: &Locator) -> bool {
    match locator {
        Locator::Address(address) => format_address(peripheral.address()) == *address,
        Locator::OpaqueId(id) => opaque_id(peripheral) == Some(*id),
    }
}

fn format_address(address: BDAddr) -> String {
    address.to_string().to_ascii_uppercase()
}

/// Platform identifier of a peripheral, on hosts that expose one as a UUID
fn opaque_id(peripheral: &Peripheral) -> Option<Uuid> {
    Uuid::parse_str(&peripheral.id().to_string()).ok()
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

impl DiscoveryStack for BtleplugStack {
    fn create_discovery_agent(
        &mut self,
        events: EventSink<DiscoveryEvent>,
    ) -> std::result::Result<Box<dyn DiscoveryAgent>, NativeError> {
        Ok(Box::new(BtleplugDiscovery {
            adapter: self.adapter.clone(),
            runtime: self.runtime.clone(),
            events,
            task: None,
        }))
    }
}

/// Unfiltered scan reporting every named advertiser
struct BtleplugDiscovery {
    adapter: Adapter,
    runtime: Handle,
    events: EventSink<DiscoveryEvent>,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryAgent for BtleplugDiscovery {
    fn start(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.task = Some(self.runtime.spawn(async move {
            if let Err(e) = discover(&adapter, &events).await {
                events.emit(DiscoveryEvent::Error(e));
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let adapter = self.adapter.clone();
            self.runtime.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
            });
        }
    }
}

impl Drop for BtleplugDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn discover(
    adapter: &Adapter,
    events: &EventSink<DiscoveryEvent>,
) -> std::result::Result<(), NativeError> {
    let mut central_events = adapter.events().await.map_err(controller_error)?;
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(controller_error)?;

    while let Some(event) = central_events.next().await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };
        let Ok(peripheral) = adapter.peripheral(&id).await else {
            continue;
        };
        let Ok(Some(properties)) = peripheral.properties().await else {
            continue;
        };

        let device = DiscoveredDevice {
            name: properties.local_name.unwrap_or_default(),
            address: Some(format_address(properties.address)),
            opaque_id: opaque_id(&peripheral),
            // btleplug only sees low energy advertisers
            low_energy: true,
        };
        if !events.emit(DiscoveryEvent::DeviceFound(device)) {
            break;
        }
    }

    events.emit(DiscoveryEvent::Finished);
    Ok(())
}
