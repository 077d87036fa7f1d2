//! Scan control
//! Owns the scan flag and the radio power state, and turns advertisements into
//! registry updates and auto-connect decisions.

use std::time::Instant;

use log::debug;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;
use crate::core::bluetooth::event_log::EventLog;
use crate::core::bluetooth::events::Effect;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{DeviceId, PowerState};

pub struct BluetoothScanner {
    power_state: PowerState,
    scan_active: bool,
}

impl BluetoothScanner {
    pub fn new() -> Self {
        Self {
            power_state: PowerState::Unknown,
            scan_active: false,
        }
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_active
    }

    /// Starts a broad scan with duplicate reports, clearing the registry.
    /// Returns `None` without side effects when the radio is not powered on.
    pub fn start_scan(
        &mut self,
        registry: &mut DeviceRegistry,
        target_name: &str,
        log: &mut EventLog,
    ) -> Option<Vec<Effect>> {
        if !self.power_state.is_ready() {
            debug!("Ignoring scan request, radio is {:?}", self.power_state);
            return None;
        }

        log.push(format!("Scanning (no filter)… target name = \"{}\"", target_name));
        registry.clear();
        self.scan_active = true;
        Some(vec![Effect::StartScan {
            service_filter: None,
            allow_duplicates: true,
        }])
    }

    /// Safe to call when already stopped.
    pub fn stop_scan(&mut self) -> Vec<Effect> {
        self.scan_active = false;
        vec![Effect::StopScan]
    }

    /// Scanning could not be started by the platform.
    pub fn scan_failed(&mut self, error: &str, log: &mut EventLog) {
        self.scan_active = false;
        log.push(format!("Scan failed: {}", error));
    }

    /// Records a radio power transition. Returns true when scanning should start.
    pub fn on_power_state(&mut self, state: PowerState, log: &mut EventLog) -> bool {
        self.power_state = state;
        if state.is_ready() {
            return true;
        }
        self.scan_active = false;
        log.push(state.describe());
        false
    }

    /// Ingests one advertisement. Returns the resolved name when the sighting
    /// should trigger an automatic connection.
    #[allow(clippy::too_many_arguments)]
    pub fn on_advertisement(
        &mut self,
        registry: &mut DeviceRegistry,
        id: DeviceId,
        local_name: Option<&str>,
        cached_name: Option<&str>,
        rssi: i16,
        now: Instant,
        config: &SessionConfig,
        session_bound: bool,
    ) -> Option<String> {
        if !self.scan_active {
            debug!("Ignoring advertisement from {} while not scanning", id);
            return None;
        }

        let name = resolve_display_name(local_name, cached_name);
        registry.upsert(id, &name, rssi, now);

        let auto_connect = config.auto_connect_enabled
            && !session_bound
            && matches_target(&name, &config.target_name);
        auto_connect.then_some(name)
    }
}

impl Default for BluetoothScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Advertised local name, else the platform-cached name, else "Unknown".
pub fn resolve_display_name(local_name: Option<&str>, cached_name: Option<&str>) -> String {
    local_name
        .or(cached_name)
        .unwrap_or(UNKNOWN_DEVICE_NAME)
        .to_string()
}

/// Case-insensitive name match. An empty target matches nothing.
pub fn matches_target(name: &str, target_name: &str) -> bool {
    !target_name.is_empty() && name.to_lowercase() == target_name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn door_config() -> SessionConfig {
        SessionConfig {
            target_name: "DoorLock".to_string(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn name_priority() {
        assert_eq!(resolve_display_name(Some("Adv"), Some("Cached")), "Adv");
        assert_eq!(resolve_display_name(None, Some("Cached")), "Cached");
        assert_eq!(resolve_display_name(None, None), UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn target_match_ignores_case() {
        assert!(matches_target("doorlock", "DoorLock"));
        assert!(!matches_target("DoorLock2", "DoorLock"));
        assert!(!matches_target("", ""));
    }

    #[test]
    fn start_requires_powered_radio() {
        let mut scanner = BluetoothScanner::new();
        let mut registry = DeviceRegistry::new();
        let mut log = EventLog::default();

        assert_eq!(scanner.start_scan(&mut registry, "DoorLock", &mut log), None);
        assert!(!scanner.is_scanning());
        assert!(log.is_empty());

        assert!(scanner.on_power_state(PowerState::On, &mut log));
        registry.upsert(DeviceId::new("stale"), "Old", -80, Instant::now());
        let effects = scanner.start_scan(&mut registry, "DoorLock", &mut log);
        assert_eq!(
            effects,
            Some(vec![Effect::StartScan {
                service_filter: None,
                allow_duplicates: true,
            }])
        );
        assert!(scanner.is_scanning());
        assert!(registry.is_empty());
    }

    #[test]
    fn power_loss_is_logged_and_stops_scanning() {
        let mut scanner = BluetoothScanner::new();
        let mut log = EventLog::default();
        scanner.on_power_state(PowerState::On, &mut log);
        scanner.start_scan(&mut DeviceRegistry::new(), "", &mut log);

        assert!(!scanner.on_power_state(PowerState::Off, &mut log));
        assert!(!scanner.is_scanning());
        assert_eq!(log.last(), Some("Bluetooth is OFF"));
    }

    #[test]
    fn advertisement_upserts_and_decides_auto_connect() {
        let mut scanner = BluetoothScanner::new();
        let mut registry = DeviceRegistry::new();
        let mut log = EventLog::default();
        scanner.on_power_state(PowerState::On, &mut log);
        scanner.start_scan(&mut registry, "DoorLock", &mut log);
        let now = Instant::now();
        let config = door_config();

        let other = scanner.on_advertisement(
            &mut registry,
            DeviceId::new("x"),
            None,
            None,
            -50,
            now,
            &config,
            false,
        );
        assert_eq!(other, None);

        let hit = scanner.on_advertisement(
            &mut registry,
            DeviceId::new("lock"),
            Some("doorlock"),
            Some("Cached"),
            -60,
            now,
            &config,
            false,
        );
        assert_eq!(hit.as_deref(), Some("doorlock"));

        let bound = scanner.on_advertisement(
            &mut registry,
            DeviceId::new("lock"),
            Some("doorlock"),
            None,
            -61,
            now,
            &config,
            true,
        );
        assert_eq!(bound, None);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&DeviceId::new("x")).map(|d| d.name.as_str()), Some("Unknown"));
    }

    #[test]
    fn auto_connect_disabled_only_records() {
        let mut scanner = BluetoothScanner::new();
        let mut registry = DeviceRegistry::new();
        let mut log = EventLog::default();
        scanner.on_power_state(PowerState::On, &mut log);
        scanner.start_scan(&mut registry, "DoorLock", &mut log);
        let config = SessionConfig {
            auto_connect_enabled: false,
            ..door_config()
        };

        let hit = scanner.on_advertisement(
            &mut registry,
            DeviceId::new("lock"),
            Some("DoorLock"),
            None,
            -60,
            Instant::now(),
            &config,
            false,
        );
        assert_eq!(hit, None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn advertisements_after_stop_are_ignored() {
        let mut scanner = BluetoothScanner::new();
        let mut registry = DeviceRegistry::new();
        let mut log = EventLog::default();
        scanner.on_power_state(PowerState::On, &mut log);
        scanner.start_scan(&mut registry, "DoorLock", &mut log);
        assert_eq!(scanner.stop_scan(), vec![Effect::StopScan]);

        let hit = scanner.on_advertisement(
            &mut registry,
            DeviceId::new("lock"),
            Some("DoorLock"),
            None,
            -60,
            Instant::now(),
            &door_config(),
            false,
        );
        assert_eq!(hit, None);
        assert!(registry.is_empty());
    }
}
