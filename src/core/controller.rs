//! Central controller state machine
//! This module composes the registry, scanner, connection lifecycle, session
//! protocol and event log behind one event-ingestion point.
//!
//! The controller performs no I/O. Each input returns the [`Effect`]s the
//! driver has to carry out, and time is passed in by the caller.

use std::time::Instant;

use log::debug;
use serde::Serialize;

use crate::config::SharedConfig;
use crate::core::bluetooth::connection::{ConnectionManager, Transition};
use crate::core::bluetooth::event_log::EventLog;
use crate::core::bluetooth::events::{BleEvent, Effect, TimerEvent, UserRequest};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::{BluetoothScanner, matches_target};
use crate::core::bluetooth::session::SessionProtocol;
use crate::core::bluetooth::types::{BluetoothDevice, DeviceId, PowerState, SessionState};
use crate::error::ControllerError;

/// Immutable view handed to the display layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub power_state: PowerState,
    pub scan_active: bool,
    pub session_state: SessionState,
    pub connected_device: Option<DeviceId>,
    pub last_message: String,
    /// All known devices, strongest signal first
    pub devices: Vec<BluetoothDevice>,
    pub event_log: Vec<String>,
    /// Entries evicted from the bounded event log
    pub dropped_log_entries: usize,
}

impl ControllerSnapshot {
    /// Devices whose name matches `target_name`, strongest signal first
    pub fn devices_named(&self, target_name: &str) -> Vec<&BluetoothDevice> {
        self.devices
            .iter()
            .filter(|d| matches_target(&d.name, target_name))
            .collect()
    }
}

impl Default for ControllerSnapshot {
    fn default() -> Self {
        Self {
            power_state: PowerState::Unknown,
            scan_active: false,
            session_state: SessionState::Idle,
            connected_device: None,
            last_message: String::new(),
            devices: Vec::new(),
            event_log: Vec::new(),
            dropped_log_entries: 0,
        }
    }
}

pub struct CentralController {
    config: SharedConfig,
    registry: DeviceRegistry,
    scanner: BluetoothScanner,
    connection: ConnectionManager,
    protocol: SessionProtocol,
    log: EventLog,
}

impl CentralController {
    pub fn new(config: SharedConfig) -> Self {
        let log = EventLog::new(config.current().event_log_capacity);
        Self {
            config,
            registry: DeviceRegistry::new(),
            scanner: BluetoothScanner::new(),
            connection: ConnectionManager::new(),
            protocol: SessionProtocol::new(),
            log,
        }
    }

    /// Platform callbacks. Never fails; problems end up in the event log.
    pub fn handle_platform(&mut self, event: BleEvent, now: Instant) -> Vec<Effect> {
        let config = self.config.current();
        match event {
            BleEvent::PowerStateChanged(state) => {
                if self.scanner.on_power_state(state, &mut self.log) {
                    self.start_scan()
                } else {
                    Vec::new()
                }
            }
            BleEvent::Advertisement {
                id,
                local_name,
                cached_name,
                rssi,
            } => {
                let matched = self.scanner.on_advertisement(
                    &mut self.registry,
                    id.clone(),
                    local_name.as_deref(),
                    cached_name.as_deref(),
                    rssi,
                    now,
                    &config,
                    self.connection.session().is_bound(),
                );
                match matched {
                    Some(name) => {
                        self.log.push(format!("Match {}. Auto-connecting…", name));
                        self.connect(id, &name).unwrap_or_default()
                    }
                    None => Vec::new(),
                }
            }
            BleEvent::Connected { id, attempt } => {
                self.connection
                    .on_connected(&id, attempt, &mut self.log)
                    .effects
            }
            BleEvent::ConnectFailed { id, attempt, error } => {
                let t = self
                    .connection
                    .on_connect_failed(&id, attempt, error.as_deref(), &mut self.log);
                self.finish(t)
            }
            BleEvent::Disconnected { id, attempt, error } => {
                let t = self
                    .connection
                    .on_disconnected(&id, attempt, error.as_deref(), &mut self.log);
                self.finish(t)
            }
            BleEvent::ServicesDiscovered { id, result } => {
                let t = self
                    .connection
                    .on_services_discovered(&id, result, &config, &mut self.log);
                self.finish(t)
            }
            BleEvent::CharacteristicsDiscovered {
                id,
                service,
                result,
            } => {
                let t = self.connection.on_characteristics_discovered(
                    &id,
                    service,
                    result,
                    &config,
                    &mut self.log,
                );
                self.finish(t)
            }
            BleEvent::NotifyStateChanged {
                id,
                characteristic,
                result,
            } => {
                self.protocol.on_notify_state_changed(
                    self.connection.session(),
                    &id,
                    characteristic,
                    result,
                    &mut self.log,
                );
                Vec::new()
            }
            BleEvent::WriteComplete {
                id,
                characteristic,
                result,
            } => {
                self.protocol.on_write_complete(
                    self.connection.session(),
                    &id,
                    characteristic,
                    result,
                    &mut self.log,
                );
                Vec::new()
            }
            BleEvent::ValueUpdated {
                id,
                characteristic,
                result,
            } => {
                self.protocol.on_value_updated(
                    self.connection.session_mut(),
                    &id,
                    characteristic,
                    result,
                    &mut self.log,
                );
                Vec::new()
            }
            BleEvent::ScanFailed { error } => {
                self.scanner.scan_failed(&error, &mut self.log);
                Vec::new()
            }
            BleEvent::AdapterError { operation, error } => {
                self.log.push(format!("Bluetooth {} failed: {}", operation, error));
                Vec::new()
            }
        }
    }

    /// Deferred wake-ups
    pub fn handle_timer(&mut self, timer: TimerEvent, now: Instant) -> Vec<Effect> {
        match timer {
            TimerEvent::Sweep => {
                let removed = self.registry.sweep(now);
                if removed > 0 {
                    debug!("Evicted {} device(s) not seen recently", removed);
                }
                Vec::new()
            }
            TimerEvent::AutoAuth { generation } => {
                let config = self.config.current();
                self.protocol.on_auth_timer(
                    self.connection.session(),
                    generation,
                    &config,
                    &mut self.log,
                )
            }
            TimerEvent::ConnectTimeout { attempt } => {
                let t = self.connection.on_connect_timeout(attempt, &mut self.log);
                self.finish(t)
            }
        }
    }

    /// Display-layer entry points
    pub fn handle_request(&mut self, request: UserRequest) -> Result<Vec<Effect>, ControllerError> {
        match request {
            UserRequest::StartScan => Ok(self.start_scan()),
            UserRequest::StopScan => Ok(self.scanner.stop_scan()),
            UserRequest::Connect(id) => {
                let name = self
                    .registry
                    .get(&id)
                    .map(|d| d.name.clone())
                    .ok_or_else(|| ControllerError::UnknownDevice(id.clone()))?;
                self.connect(id, &name)
            }
            UserRequest::Disconnect => {
                let t = self.connection.request_disconnect(&mut self.log)?;
                Ok(self.finish(t))
            }
            UserRequest::Send(command) => {
                self.protocol
                    .send(self.connection.session(), &command, &mut self.log)
            }
        }
    }

    pub fn snapshot(&self, now: Instant) -> ControllerSnapshot {
        let session = self.connection.session();
        ControllerSnapshot {
            power_state: self.scanner.power_state(),
            scan_active: self.scanner.is_scanning(),
            session_state: session.state(),
            connected_device: session.peripheral().cloned(),
            last_message: session.last_message().to_string(),
            devices: self
                .registry
                .snapshot(|_| true)
                .iter()
                .map(|d| BluetoothDevice::from_discovered(d, now))
                .collect(),
            event_log: self.log.entries(),
            dropped_log_entries: self.log.dropped(),
        }
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Stops scanning and starts a connect attempt.
    fn connect(&mut self, id: DeviceId, name: &str) -> Result<Vec<Effect>, ControllerError> {
        if let Some(bound) = self.connection.session().peripheral() {
            return Err(ControllerError::AlreadyBound(bound.clone()));
        }
        let config = self.config.current();
        let mut effects = self.scanner.stop_scan();
        let t = self
            .connection
            .request_connect(id, name, &config, &mut self.log)?;
        effects.extend(t.effects);
        Ok(effects)
    }

    fn start_scan(&mut self) -> Vec<Effect> {
        let target_name = self.config.current().target_name;
        match self
            .scanner
            .start_scan(&mut self.registry, &target_name, &mut self.log)
        {
            Some(effects) => {
                self.connection.mark_idle();
                effects
            }
            None => Vec::new(),
        }
    }

    /// Applies the follow-ups of a lifecycle step: rescan after a teardown,
    /// auto-auth after becoming ready.
    fn finish(&mut self, transition: Transition) -> Vec<Effect> {
        let mut effects = transition.effects;
        if transition.reset {
            self.protocol.reset();
            effects.extend(self.start_scan());
        }
        if transition.became_ready {
            effects.extend(self.protocol.on_ready(&self.config.current()));
        }
        effects
    }
}
