//! Device discovery and the deduplicated device list

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::device::{AddressingMode, DeviceDescriptor, Locator};
use crate::error::Result;
use crate::native::{
    DiscoveredDevice, DiscoveryAgent, DiscoveryEvent, DiscoveryStack, EventSink, Registration,
    SessionId,
};
use crate::protocol::ble_display_name;

/// Notifications raised by a [`DeviceScanner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerEvent {
    /// The device list was cleared or grew
    DeviceListChanged,
    /// Scanning started (`true`) or stopped (`false`)
    ScanningChanged(bool),
    /// A different device was made active
    DeviceChanged,
}

/// Agent of the running discovery together with its event registration
struct ActiveDiscovery {
    session: SessionId,
    registration: Registration,
    agent: Box<dyn DiscoveryAgent>,
}

/// Discovers nearby devices and tracks the one selected for linking
pub struct DeviceScanner<D> {
    config: ScanConfig,
    stack: D,
    discovery: Option<ActiveDiscovery>,
    scanning: bool,
    devices: Vec<DeviceDescriptor>,
    device_names: Vec<String>,
    active_device: Option<DeviceDescriptor>,
    next_session: SessionId,
    events: mpsc::UnboundedSender<ScannerEvent>,
    discovery_tx: mpsc::UnboundedSender<(SessionId, DiscoveryEvent)>,
    discovery_rx: mpsc::UnboundedReceiver<(SessionId, DiscoveryEvent)>,
}

impl<D: DiscoveryStack> DeviceScanner<D> {
    pub fn new(config: ScanConfig, stack: D) -> (Self, mpsc::UnboundedReceiver<ScannerEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();

        let scanner = Self {
            config,
            stack,
            discovery: None,
            scanning: false,
            devices: Vec::new(),
            device_names: Vec::new(),
            active_device: None,
            next_session: 1,
            events,
            discovery_tx,
            discovery_rx,
        };

        (scanner, event_rx)
    }

    /// Start a fresh scan, discarding the devices found so far.
    ///
    /// Restarting a running scan does not toggle the scanning state.
    pub fn start_scan(&mut self) -> Result<()> {
        if self.release_discovery() {
            debug!("Restarting device discovery");
        } else {
            self.scanning = true;
            self.emit(ScannerEvent::ScanningChanged(true));
        }

        self.devices.clear();
        self.device_names.clear();
        self.emit(ScannerEvent::DeviceListChanged);

        let session = self.next_session;
        self.next_session += 1;
        let (sink, registration) = EventSink::register(session, self.discovery_tx.clone());

        let mut agent = match self.stack.create_discovery_agent(sink) {
            Ok(agent) => agent,
            Err(e) => {
                warn!("Failed to create discovery agent: {}", e);
                self.scanning = false;
                self.emit(ScannerEvent::ScanningChanged(false));
                return Err(e.into());
            }
        };

        info!("Scanning for devices ({} addressing)", self.config.addressing_mode);
        agent.start();
        self.discovery = Some(ActiveDiscovery {
            session,
            registration,
            agent,
        });
        Ok(())
    }

    /// Scan until discovery finishes or the configured duration elapses
    pub async fn scan(&mut self) -> Result<()> {
        self.start_scan()?;
        let deadline = self.config.scan_duration.map(|d| Instant::now() + d);

        while self.scanning {
            let next = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.discovery_rx.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            debug!("Scan duration elapsed");
                            self.stop_scan();
                            break;
                        }
                    }
                }
                None => self.discovery_rx.recv().await,
            };

            match next {
                Some((session, event)) => self.handle_discovery_event(session, event),
                None => break,
            }
        }

        Ok(())
    }

    /// Dispatch every discovery event already queued
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((session, event)) = self.discovery_rx.try_recv() {
            self.handle_discovery_event(session, event);
            handled += 1;
        }
        handled
    }

    /// Feed one discovery event into the scanner. Events from a replaced
    /// discovery run are ignored.
    pub fn handle_discovery_event(&mut self, session: SessionId, event: DiscoveryEvent) {
        if self.discovery.as_ref().map(|d| d.session) != Some(session) {
            debug!("Ignoring event from stale discovery {}", session);
            return;
        }

        match event {
            DiscoveryEvent::DeviceFound(info) => self.on_device_found(info),
            DiscoveryEvent::Finished => {
                info!("Device discovery finished, {} found", self.devices.len());
                self.stop_scan();
            }
            DiscoveryEvent::Error(e) => {
                warn!("Device discovery error: {}", e);
                self.stop_scan();
            }
        }
    }

    fn on_device_found(&mut self, info: DiscoveredDevice) {
        if info.name.is_empty() {
            return;
        }

        let locator = match self.config.addressing_mode {
            AddressingMode::Address => info
                .address
                .as_deref()
                .and_then(|addr| Locator::address(addr).ok()),
            AddressingMode::OpaqueId => info.opaque_id.map(Locator::OpaqueId),
        };
        let Some(locator) = locator else {
            debug!("Skipping {}: no {} locator", info.name, self.config.addressing_mode);
            return;
        };

        let is_ble = info.low_energy;
        let name = if is_ble {
            ble_display_name(&info.name)
        } else {
            info.name
        };

        let device = DeviceDescriptor::new(name, locator, is_ble);
        if self.devices.contains(&device) {
            return;
        }

        debug!("Found device {}", device);
        self.device_names.push(device.name.clone());
        self.devices.push(device);
        self.emit(ScannerEvent::DeviceListChanged);
    }
}

impl<D> DeviceScanner<D> {
    /// Stop discovery. A no-op when not scanning.
    pub fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }

        self.release_discovery();
        self.scanning = false;
        self.emit(ScannerEvent::ScanningChanged(false));
    }

    /// Make the first device with a matching display name active.
    ///
    /// Returns false and leaves the selection untouched when nothing matches.
    pub fn select_by_name(&mut self, name: &str) -> bool {
        let Some(device) = self.devices.iter().find(|d| d.name == name).cloned() else {
            debug!("No discovered device named {}", name);
            return false;
        };

        self.set_active_device(device);
        true
    }

    /// Make `device` active, e.g. one restored from saved settings
    pub fn set_active_device(&mut self, device: DeviceDescriptor) {
        info!("Selected {}", device);
        self.active_device = Some(device);
        self.emit(ScannerEvent::DeviceChanged);
    }

    pub fn active_device(&self) -> Option<&DeviceDescriptor> {
        self.active_device.as_ref()
    }

    /// Hardware address of the active device, empty in opaque-id mode
    pub fn address(&self) -> String {
        self.active_device
            .as_ref()
            .and_then(|d| d.locator.as_address())
            .unwrap_or_default()
            .to_string()
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn device_names(&self) -> &[String] {
        &self.device_names
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Stop and drop the running agent. Returns whether there was one.
    fn release_discovery(&mut self) -> bool {
        let Some(mut discovery) = self.discovery.take() else {
            return false;
        };

        discovery.registration.cancel();
        discovery.agent.stop();
        true
    }

    fn emit(&self, event: ScannerEvent) {
        if self.events.send(event).is_err() {
            debug!("Scanner event receiver dropped");
        }
    }
}

impl<D> Drop for DeviceScanner<D> {
    fn drop(&mut self) {
        self.release_discovery();
    }
}
