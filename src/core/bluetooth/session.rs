//! Session protocol over the negotiated NUS channels
//! Outbound commands are written with acknowledgement; inbound notifications
//! are split into lines. Also owns the one-shot automatic AUTH.

use log::debug;
use uuid::Uuid;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::commands::SessionCommand;
use crate::core::bluetooth::constants::AUTO_AUTH_DELAY;
use crate::core::bluetooth::connection::Session;
use crate::core::bluetooth::event_log::EventLog;
use crate::core::bluetooth::events::{Effect, TimerEvent};
use crate::core::bluetooth::notification::{Notification, decode_notification};
use crate::core::bluetooth::types::DeviceId;
use crate::error::ControllerError;

pub struct SessionProtocol {
    /// Bumped on every session teardown; pending AUTH timers of older
    /// generations are ignored.
    generation: u64,
    /// Whether the AUTH of the current generation was already scheduled
    auth_scheduled: bool,
}

impl SessionProtocol {
    pub fn new() -> Self {
        Self {
            generation: 0,
            auth_scheduled: false,
        }
    }

    /// Writes `command` on the write channel, expecting an acknowledgement.
    pub fn send(
        &self,
        session: &Session,
        command: &SessionCommand,
        log: &mut EventLog,
    ) -> Result<Vec<Effect>, ControllerError> {
        let channel = match session.write_channel() {
            Some(channel) if session.is_ready() => channel,
            _ => return Err(ControllerError::NotReady(session.state())),
        };

        log.push(format!("→ {}", command));
        Ok(vec![Effect::Write {
            id: channel.device_id.clone(),
            characteristic: channel.characteristic,
            bytes: command.to_bytes(),
            with_ack: true,
        }])
    }

    pub fn on_write_complete(
        &self,
        session: &Session,
        id: &DeviceId,
        characteristic: Uuid,
        result: Result<(), String>,
        log: &mut EventLog,
    ) {
        let current = session
            .write_channel()
            .is_some_and(|c| &c.device_id == id && c.characteristic == characteristic);
        if !current {
            debug!("Ignoring write completion for stale channel {} on {}", characteristic, id);
            return;
        }

        match result {
            Ok(()) => log.push("✓ Write ACK"),
            Err(e) => log.push(format!("Write error: {}", e)),
        }
    }

    pub fn on_notify_state_changed(
        &self,
        session: &Session,
        id: &DeviceId,
        characteristic: Uuid,
        result: Result<bool, String>,
        log: &mut EventLog,
    ) {
        let current = session
            .notify_channel()
            .is_some_and(|c| &c.device_id == id && c.characteristic == characteristic);
        if !current {
            debug!("Ignoring notify state for stale channel {} on {}", characteristic, id);
            return;
        }

        match result {
            Ok(true) => log.push("Subscribed to TX notifications."),
            Ok(false) => log.push("TX notifications disabled."),
            Err(e) => log.push(format!("Notify state error: {}", e)),
        }
    }

    /// Demultiplexes one notification into the log; the last line wins as
    /// the session's current message.
    pub fn on_value_updated(
        &self,
        session: &mut Session,
        id: &DeviceId,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
        log: &mut EventLog,
    ) {
        let current = session
            .notify_channel()
            .is_some_and(|c| &c.device_id == id && c.characteristic == characteristic);
        if !current {
            debug!("Ignoring notification from stale channel {} on {}", characteristic, id);
            return;
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                log.push(format!("Notify error: {}", e));
                return;
            }
        };

        match decode_notification(&payload) {
            Notification::Lines(lines) => {
                for line in &lines {
                    log.push(format!("← {}", line));
                }
                if let Some(last) = lines.into_iter().last() {
                    session.set_last_message(last);
                }
            }
            Notification::Raw(rendered) => {
                log.push(format!("← {}", rendered));
                session.set_last_message(rendered);
            }
        }
    }

    /// Called on the not-ready → ready edge. Schedules the deferred AUTH at
    /// most once per session.
    pub fn on_ready(&mut self, config: &SessionConfig) -> Vec<Effect> {
        if !config.auto_auth_enabled || self.auth_scheduled {
            return Vec::new();
        }
        self.auth_scheduled = true;
        vec![Effect::Schedule {
            delay: AUTO_AUTH_DELAY,
            timer: TimerEvent::AutoAuth {
                generation: self.generation,
            },
        }]
    }

    /// Fires the deferred AUTH if it still belongs to the live session.
    pub fn on_auth_timer(
        &self,
        session: &Session,
        generation: u64,
        config: &SessionConfig,
        log: &mut EventLog,
    ) -> Vec<Effect> {
        if generation != self.generation || !session.is_ready() {
            debug!("Dropping stale auto-auth timer (generation {})", generation);
            return Vec::new();
        }
        self.send(session, &SessionCommand::auth(config.pin.as_str()), log)
            .unwrap_or_default()
    }

    /// Forgets the torn-down session.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.auth_scheduled = false;
    }
}

impl Default for SessionProtocol {
    fn default() -> Self {
        Self::new()
    }
}
