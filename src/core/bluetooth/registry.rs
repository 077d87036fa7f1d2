//! Registry of transiently seen peripherals
//! Records are upserted on every advertisement and evicted once they go quiet.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;

use crate::core::bluetooth::constants::DEVICE_EVICTION_WINDOW;
use crate::core::bluetooth::types::DeviceId;

/// A peripheral seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub name: String,
    /// Most recent RSSI in dBm
    pub rssi: i16,
    pub last_seen: Instant,
}

/// Result of [`DeviceRegistry::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Insertion-ordered registry, at most one record per id.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<DiscoveredDevice>,
    index_by_id: HashMap<DeviceId, usize>,
    eviction_window: Duration,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::with_eviction_window(DEVICE_EVICTION_WINDOW)
    }

    pub fn with_eviction_window(eviction_window: Duration) -> Self {
        Self {
            devices: Vec::new(),
            index_by_id: HashMap::new(),
            eviction_window,
        }
    }

    /// Inserts a new record or refreshes the existing one in place.
    pub fn upsert(&mut self, id: DeviceId, name: &str, rssi: i16, now: Instant) -> Upsert {
        if let Some(&idx) = self.index_by_id.get(&id) {
            let device = &mut self.devices[idx];
            device.rssi = rssi;
            device.last_seen = device.last_seen.max(now);
            if device.name != name {
                debug!("Device {} renamed {:?} -> {:?}", id, device.name, name);
                device.name = name.to_string();
            }
            return Upsert::Updated;
        }

        self.index_by_id.insert(id.clone(), self.devices.len());
        self.devices.push(DiscoveredDevice {
            id,
            name: name.to_string(),
            rssi,
            last_seen: now,
        });
        Upsert::Inserted
    }

    /// Removes every record quiet for longer than the eviction window.
    /// Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.devices.len();
        let window = self.eviction_window;
        self.devices
            .retain(|device| now.saturating_duration_since(device.last_seen) <= window);
        let removed = before - self.devices.len();
        if removed > 0 {
            self.rebuild_index();
        }
        removed
    }

    /// Point-in-time copy of the records matching `filter`, strongest signal first.
    pub fn snapshot<F>(&self, filter: F) -> Vec<DiscoveredDevice>
    where
        F: Fn(&DiscoveredDevice) -> bool,
    {
        self.snapshot_by(filter, |a, b| b.rssi.cmp(&a.rssi))
    }

    /// Point-in-time copy of the records matching `filter`, ordered by `compare`.
    /// Ties keep insertion order.
    pub fn snapshot_by<F, C>(&self, filter: F, compare: C) -> Vec<DiscoveredDevice>
    where
        F: Fn(&DiscoveredDevice) -> bool,
        C: FnMut(&DiscoveredDevice, &DiscoveredDevice) -> Ordering,
    {
        let mut devices: Vec<DiscoveredDevice> =
            self.devices.iter().filter(|d| filter(d)).cloned().collect();
        devices.sort_by(compare);
        devices
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DiscoveredDevice> {
        self.index_by_id.get(id).map(|&idx| &self.devices[idx])
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.index_by_id.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.index_by_id.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn rebuild_index(&mut self) {
        self.index_by_id = self
            .devices
            .iter()
            .enumerate()
            .map(|(idx, device)| (device.id.clone(), idx))
            .collect();
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
