//! Connection lifecycle of the door opener session
//!
//! ```text
//! Idle ──connect──> Connecting ──connected──> DiscoveringServices
//!   ^                   │                            │ service found
//!   │ connect failed    │                            v
//!   └───────────────────┘               DiscoveringCharacteristics
//!                                                    │ write + notify found
//!   Idle <── rescan ── Disconnected <──disconnect── Ready
//! ```
//!
//! Every callback is checked against the bound peripheral; callbacks for any
//! other device are stale and ignored. Link callbacks must also carry the
//! current connect attempt, since a cancelled attempt on the same device can
//! still report back. Recovery is always disconnect → rescan.

use std::time::Duration;

use log::debug;
use uuid::Uuid;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::constants::{
    UUID_NUS_NOTIFY_CHAR, UUID_NUS_SERVICE, UUID_NUS_WRITE_CHAR,
};
use crate::core::bluetooth::event_log::EventLog;
use crate::core::bluetooth::events::{Effect, TimerEvent};
use crate::core::bluetooth::types::{CharacteristicInfo, ChannelRef, DeviceId, SessionState};
use crate::error::ControllerError;

/// The single session record
#[derive(Debug, Clone)]
pub struct Session {
    peripheral: Option<DeviceId>,
    state: SessionState,
    write_channel: Option<ChannelRef>,
    notify_channel: Option<ChannelRef>,
    last_message: String,
}

impl Session {
    fn new() -> Self {
        Self {
            peripheral: None,
            state: SessionState::Idle,
            write_channel: None,
            notify_channel: None,
            last_message: String::new(),
        }
    }

    pub fn peripheral(&self) -> Option<&DeviceId> {
        self.peripheral.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn write_channel(&self) -> Option<&ChannelRef> {
        self.write_channel.as_ref()
    }

    pub fn notify_channel(&self) -> Option<&ChannelRef> {
        self.notify_channel.as_ref()
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    pub fn is_bound(&self) -> bool {
        self.state.is_bound()
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// True when `id` is the peripheral this session is bound to
    pub fn owns(&self, id: &DeviceId) -> bool {
        self.peripheral.as_ref() == Some(id)
    }

    pub(crate) fn set_last_message(&mut self, message: String) {
        self.last_message = message;
    }

    fn reset(&mut self, state: SessionState) {
        self.peripheral = None;
        self.state = state;
        self.write_channel = None;
        self.notify_channel = None;
        self.last_message.clear();
    }
}

/// Outcome of a lifecycle step
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Transition {
    pub effects: Vec<Effect>,
    /// The session was torn down and scanning should restart
    pub reset: bool,
    /// The session just became ready (edge, not level)
    pub became_ready: bool,
}

impl Transition {
    fn effects(effects: Vec<Effect>) -> Self {
        Self {
            effects,
            ..Self::default()
        }
    }

    fn reset(effects: Vec<Effect>) -> Self {
        Self {
            effects,
            reset: true,
            became_ready: false,
        }
    }
}

pub struct ConnectionManager {
    session: Session,
    connect_attempt: u64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            session: Session::new(),
            connect_attempt: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    fn is_current(&self, id: &DeviceId, attempt: u64) -> bool {
        self.session.owns(id) && attempt == self.connect_attempt
    }

    /// Idle/Disconnected → Connecting. The caller stops scanning first.
    pub fn request_connect(
        &mut self,
        id: DeviceId,
        name: &str,
        config: &SessionConfig,
        log: &mut EventLog,
    ) -> Result<Transition, ControllerError> {
        if let Some(bound) = self.session.peripheral.as_ref() {
            return Err(ControllerError::AlreadyBound(bound.clone()));
        }

        log.push(format!("Connecting to {}…", name));
        self.connect_attempt += 1;
        self.session.peripheral = Some(id.clone());
        self.session.state = SessionState::Connecting;

        let mut effects = vec![Effect::Connect {
            id,
            attempt: self.connect_attempt,
        }];
        if let Some(secs) = config.connect_timeout_secs {
            effects.push(Effect::Schedule {
                delay: Duration::from_secs(secs),
                timer: TimerEvent::ConnectTimeout {
                    attempt: self.connect_attempt,
                },
            });
        }
        Ok(Transition::effects(effects))
    }

    /// Connecting → DiscoveringServices
    pub fn on_connected(&mut self, id: &DeviceId, attempt: u64, log: &mut EventLog) -> Transition {
        if self.session.state != SessionState::Connecting || !self.is_current(id, attempt) {
            debug!("Ignoring stale connect callback for {} (attempt {})", id, attempt);
            return Transition::default();
        }

        self.session.state = SessionState::DiscoveringServices;
        log.push("Connected. Discovering services…");
        Transition::effects(vec![Effect::DiscoverServices {
            id: id.clone(),
            uuids: vec![UUID_NUS_SERVICE],
        }])
    }

    /// Connecting → Idle; the caller restarts scanning.
    pub fn on_connect_failed(
        &mut self,
        id: &DeviceId,
        attempt: u64,
        error: Option<&str>,
        log: &mut EventLog,
    ) -> Transition {
        if self.session.state != SessionState::Connecting || !self.is_current(id, attempt) {
            debug!("Ignoring stale connect failure for {} (attempt {})", id, attempt);
            return Transition::default();
        }

        log.push(format!("Connect failed: {}", error.unwrap_or("unknown")));
        self.session.reset(SessionState::Idle);
        Transition::reset(Vec::new())
    }

    /// Abandons a connect attempt that outlived its deadline.
    pub fn on_connect_timeout(&mut self, attempt: u64, log: &mut EventLog) -> Transition {
        if self.session.state != SessionState::Connecting || attempt != self.connect_attempt {
            return Transition::default();
        }
        let Some(id) = self.session.peripheral.clone() else {
            return Transition::default();
        };

        log.push(format!("Connect to {} timed out. Cancelling…", id));
        self.session.reset(SessionState::Idle);
        Transition::reset(vec![Effect::Disconnect { id, attempt }])
    }

    /// DiscoveringServices → DiscoveringCharacteristics, or stall.
    pub fn on_services_discovered(
        &mut self,
        id: &DeviceId,
        result: Result<Vec<Uuid>, String>,
        config: &SessionConfig,
        log: &mut EventLog,
    ) -> Transition {
        if self.session.state != SessionState::DiscoveringServices || !self.session.owns(id) {
            debug!("Ignoring stale service discovery for {}", id);
            return Transition::default();
        }

        match result {
            Err(e) => {
                log.push(format!("Service discovery error: {}", e));
                self.stall(config, log)
            }
            Ok(services) if services.contains(&UUID_NUS_SERVICE) => {
                self.session.state = SessionState::DiscoveringCharacteristics;
                log.push("NUS found. Discovering characteristics…");
                Transition::effects(vec![Effect::DiscoverCharacteristics {
                    id: id.clone(),
                    service: UUID_NUS_SERVICE,
                    uuids: vec![UUID_NUS_WRITE_CHAR, UUID_NUS_NOTIFY_CHAR],
                }])
            }
            Ok(_) => {
                log.push(format!("Service {} not found on {}", UUID_NUS_SERVICE, id));
                self.stall(config, log)
            }
        }
    }

    /// DiscoveringCharacteristics → Ready once both channels are located.
    ///
    /// Both channel references are assigned together, so they are never set
    /// outside Ready. A repeated discovery while Ready is not a new edge.
    pub fn on_characteristics_discovered(
        &mut self,
        id: &DeviceId,
        service: Uuid,
        result: Result<Vec<CharacteristicInfo>, String>,
        config: &SessionConfig,
        log: &mut EventLog,
    ) -> Transition {
        let expecting = matches!(
            self.session.state,
            SessionState::DiscoveringCharacteristics | SessionState::Ready
        );
        if !expecting || !self.session.owns(id) || service != UUID_NUS_SERVICE {
            debug!("Ignoring stale characteristic discovery for {}", id);
            return Transition::default();
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                log.push(format!("Char discovery error: {}", e));
                return self.stall(config, log);
            }
        };

        let write = characteristics.iter().find(|c| c.uuid == UUID_NUS_WRITE_CHAR);
        let notify = characteristics.iter().find(|c| c.uuid == UUID_NUS_NOTIFY_CHAR);
        let (Some(_), Some(notify)) = (write, notify) else {
            log.push(format!(
                "Missing characteristic(s) on {}: write={} notify={}",
                id,
                write.is_some(),
                notify.is_some()
            ));
            return self.stall(config, log);
        };

        let channel = |characteristic| ChannelRef {
            device_id: id.clone(),
            service,
            characteristic,
        };
        self.session.write_channel = Some(channel(UUID_NUS_WRITE_CHAR));
        self.session.notify_channel = Some(channel(UUID_NUS_NOTIFY_CHAR));
        log.push("RX characteristic ready (Write).");

        let mut effects = Vec::new();
        if notify.can_notify {
            effects.push(Effect::SetNotify {
                id: id.clone(),
                characteristic: UUID_NUS_NOTIFY_CHAR,
                enabled: true,
            });
            log.push("Subscribing to TX notifications.");
        } else {
            log.push("TX characteristic does not support notifications.");
        }

        let became_ready = self.session.state != SessionState::Ready;
        if became_ready {
            self.session.state = SessionState::Ready;
            log.push("Session ready.");
        }
        Transition {
            effects,
            reset: false,
            became_ready,
        }
    }

    /// Any state → Disconnected; the caller restarts scanning.
    pub fn on_disconnected(
        &mut self,
        id: &DeviceId,
        attempt: u64,
        error: Option<&str>,
        log: &mut EventLog,
    ) -> Transition {
        if !self.is_current(id, attempt) {
            debug!("Ignoring disconnect callback for {} (attempt {})", id, attempt);
            return Transition::default();
        }

        match error {
            Some(e) => log.push(format!("Disconnected: {}", e)),
            None => log.push("Disconnected."),
        }
        self.session.reset(SessionState::Disconnected);
        Transition::reset(Vec::new())
    }

    /// Explicit disconnect request.
    ///
    /// A pending connect is cancelled on the spot, since the platform may never
    /// call back for it. A live connection waits for the disconnect callback.
    pub fn request_disconnect(&mut self, log: &mut EventLog) -> Result<Transition, ControllerError> {
        let id = self
            .session
            .peripheral
            .clone()
            .ok_or(ControllerError::NotConnected)?;
        let disconnect = Effect::Disconnect {
            id: id.clone(),
            attempt: self.connect_attempt,
        };

        if self.session.state == SessionState::Connecting {
            log.push(format!("Cancelling connection to {}…", id));
            self.session.reset(SessionState::Idle);
            return Ok(Transition::reset(vec![disconnect]));
        }

        log.push("Disconnecting…");
        Ok(Transition::effects(vec![disconnect]))
    }

    /// Disconnected → Idle once scanning has restarted.
    pub fn mark_idle(&mut self) {
        if self.session.state == SessionState::Disconnected {
            self.session.state = SessionState::Idle;
        }
    }

    fn stall(&mut self, config: &SessionConfig, log: &mut EventLog) -> Transition {
        let Some(id) = self.session.peripheral.clone() else {
            return Transition::default();
        };
        if config.disconnect_on_discovery_failure {
            log.push("Disconnecting after discovery failure.");
            return Transition::effects(vec![Effect::Disconnect {
                id,
                attempt: self.connect_attempt,
            }]);
        }
        log.push(format!(
            "Session stalled in {:?}; disconnect to retry.",
            self.session.state
        ));
        Transition::default()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
