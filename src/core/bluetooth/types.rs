//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::registry::DiscoveredDevice;

static MAC_ADDRESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok());

/// Platform-assigned identifier of a peripheral.
///
/// Opaque to the core; unique per physical device for the lifetime of the
/// registry. The platform adapter keeps the actual device object keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Power state of the local radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    On,
    Off,
    Unauthorized,
    Unsupported,
    Resetting,
    Unknown,
}

impl PowerState {
    /// Only a powered-on radio can scan or connect.
    pub fn is_ready(self) -> bool {
        self == PowerState::On
    }

    pub fn describe(self) -> &'static str {
        match self {
            PowerState::On => "Bluetooth is ON",
            PowerState::Off => "Bluetooth is OFF",
            PowerState::Unauthorized => "Bluetooth unauthorized",
            PowerState::Unsupported => "Bluetooth unsupported on this device",
            PowerState::Resetting => "Bluetooth resetting…",
            PowerState::Unknown => "Bluetooth state unknown",
        }
    }
}

/// Lifecycle state of the (single) session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Disconnected,
}

impl SessionState {
    /// A session is bound to a peripheral from the connect request until it is torn down.
    pub fn is_bound(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Disconnected)
    }
}

/// A characteristic reported by discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    /// Whether the characteristic supports notifications
    pub can_notify: bool,
}

impl CharacteristicInfo {
    pub fn new(uuid: Uuid, can_notify: bool) -> Self {
        Self { uuid, can_notify }
    }
}

/// Reference to a negotiated characteristic of the connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub device_id: DeviceId,
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Represents a discovered Bluetooth device, as shown to the display layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BluetoothDevice {
    /// Platform-specific unique identifier for the device
    pub id: DeviceId,
    /// Best-effort name of the device
    pub name: String,
    /// The address of the device when the platform id carries one, "N/A" otherwise (macOS)
    pub address: String,
    /// The most recent signal strength (RSSI) in dBm
    pub rssi: i16,
    /// Whole seconds since the device was last seen
    pub last_seen_secs: u64,
}

impl BluetoothDevice {
    /// Builds the display view of a registry record at `now`
    pub fn from_discovered(device: &DiscoveredDevice, now: Instant) -> Self {
        let address = extract_mac_address(device.id.as_str()).unwrap_or_else(|| "N/A".to_string());
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            address,
            rssi: device.rssi,
            last_seen_secs: now.saturating_duration_since(device.last_seen).as_secs(),
        }
    }
}

fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = MAC_ADDRESS.as_ref()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(id: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            id: DeviceId::new(id),
            name: "DoorLock".to_string(),
            rssi: -60,
            last_seen: Instant::now(),
        }
    }

    #[test]
    fn extracts_mac_from_linux_style_id() {
        let device = record("hci0/dev_aa:bb:cc:dd:ee:0f");
        let view = BluetoothDevice::from_discovered(&device, device.last_seen);
        assert_eq!(view.address, "AA:BB:CC:DD:EE:0F");
    }

    #[test]
    fn id_without_mac_reports_not_available() {
        let device = record("5F1C7E0A-2B0D-4C8E-9F44-0C3A2B1D9E77");
        let view = BluetoothDevice::from_discovered(&device, device.last_seen + Duration::from_secs(3));
        assert_eq!(view.address, "N/A");
        assert_eq!(view.last_seen_secs, 3);
    }

    #[test]
    fn bound_states() {
        assert!(!SessionState::Idle.is_bound());
        assert!(!SessionState::Disconnected.is_bound());
        assert!(SessionState::Connecting.is_bound());
        assert!(SessionState::Ready.is_bound());
    }
}
