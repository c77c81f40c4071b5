//! Device identity, addressing modes and the persisted settings schema

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BluetoothError, Result};
use crate::protocol::BLE_NAME_SUFFIX;

// ----------------------------------------------------------------------------
// Addressing
// ----------------------------------------------------------------------------

/// How remote devices are identified on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// Textual hardware address (`AA:BB:CC:DD:EE:FF`)
    #[default]
    Address,
    /// Platform-assigned opaque identifier (hosts that hide radio addresses)
    OpaqueId,
}

impl AddressingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressingMode::Address => "address",
            AddressingMode::OpaqueId => "opaque_id",
        }
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a remote device can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Normalized upper case hardware address
    Address(String),
    /// Opaque platform identifier
    OpaqueId(Uuid),
}

impl Locator {
    /// Parse and normalize a `AA:BB:CC:DD:EE:FF` hardware address
    pub fn address(addr: &str) -> Result<Self> {
        let parts: Vec<&str> = addr.trim().split(':').collect();
        let well_formed = parts.len() == 6
            && parts
                .iter()
                .all(|p| p.len() == 2 && hex::decode(p).is_ok());

        if !well_formed {
            return Err(BluetoothError::InvalidLocator(addr.to_string()));
        }

        Ok(Locator::Address(parts.join(":").to_ascii_uppercase()))
    }

    /// Parse a platform identifier
    pub fn opaque_id(id: &str) -> Result<Self> {
        Uuid::parse_str(id.trim())
            .map(Locator::OpaqueId)
            .map_err(|_| BluetoothError::InvalidLocator(id.to_string()))
    }

    /// Addressing mode this locator belongs to
    pub fn mode(&self) -> AddressingMode {
        match self {
            Locator::Address(_) => AddressingMode::Address,
            Locator::OpaqueId(_) => AddressingMode::OpaqueId,
        }
    }

    /// Hardware address, if this is an address locator
    pub fn as_address(&self) -> Option<&str> {
        match self {
            Locator::Address(addr) => Some(addr),
            Locator::OpaqueId(_) => None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Address(addr) => f.write_str(addr),
            Locator::OpaqueId(id) => write!(f, "{}", id),
        }
    }
}

// ----------------------------------------------------------------------------
// Device Descriptor
// ----------------------------------------------------------------------------

/// Identity of one discoverable remote device.
///
/// Two descriptors are equal when their display names and locators match;
/// `is_ble` does not take part. Because BLE devices carry a `" (BLE)"` name
/// suffix, the BLE and classic faces of one radio stay distinct.
#[derive(Debug, Clone, Eq)]
pub struct DeviceDescriptor {
    /// Display name
    pub name: String,
    /// Where the device is reached
    pub locator: Locator,
    /// Whether the link should use the GATT serial emulation
    pub is_ble: bool,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, locator: Locator, is_ble: bool) -> Self {
        Self {
            name: name.into(),
            locator,
            is_ble,
        }
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.locator == other.locator
    }
}

impl std::hash::Hash for DeviceDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.locator.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.locator)
    }
}

// ----------------------------------------------------------------------------
// Persisted Settings
// ----------------------------------------------------------------------------

/// Persisted form of a selected device, tagged by addressing mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "addressing", rename_all = "snake_case")]
pub enum DeviceSettings {
    Address {
        device_name: String,
        address: String,
        is_ble: bool,
    },
    OpaqueId {
        device_name: String,
        uuid: String,
    },
}

impl DeviceSettings {
    pub fn device_name(&self) -> &str {
        match self {
            DeviceSettings::Address { device_name, .. } => device_name,
            DeviceSettings::OpaqueId { device_name, .. } => device_name,
        }
    }

    pub fn mode(&self) -> AddressingMode {
        match self {
            DeviceSettings::Address { .. } => AddressingMode::Address,
            DeviceSettings::OpaqueId { .. } => AddressingMode::OpaqueId,
        }
    }
}

impl From<&DeviceDescriptor> for DeviceSettings {
    fn from(device: &DeviceDescriptor) -> Self {
        match &device.locator {
            Locator::Address(address) => DeviceSettings::Address {
                device_name: device.name.clone(),
                address: address.clone(),
                is_ble: device.is_ble,
            },
            Locator::OpaqueId(id) => DeviceSettings::OpaqueId {
                device_name: device.name.clone(),
                uuid: id.to_string(),
            },
        }
    }
}

impl TryFrom<DeviceSettings> for DeviceDescriptor {
    type Error = BluetoothError;

    fn try_from(settings: DeviceSettings) -> Result<Self> {
        match settings {
            DeviceSettings::Address {
                device_name,
                address,
                is_ble,
            } => Ok(DeviceDescriptor::new(
                device_name,
                Locator::address(&address)?,
                is_ble,
            )),
            DeviceSettings::OpaqueId { device_name, uuid } => {
                // The opaque-id schema has no BLE flag; the display name carries it
                let is_ble = device_name.ends_with(BLE_NAME_SUFFIX);
                Ok(DeviceDescriptor::new(
                    device_name,
                    Locator::opaque_id(&uuid)?,
                    is_ble,
                ))
            }
        }
    }
}
