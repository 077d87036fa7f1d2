//! Inputs and outputs of the central state machine
//!
//! Every platform callback is a [`BleEvent`], every deferred wake-up a
//! [`TimerEvent`] and every display-layer entry point a [`UserRequest`]. The
//! state machine answers each of them with a list of [`Effect`]s for the driver
//! to carry out against the radio.

use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::core::bluetooth::commands::SessionCommand;
use crate::core::bluetooth::types::{CharacteristicInfo, DeviceId, PowerState};
use crate::error::ControllerError;

/// Callbacks from the platform radio and GATT stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    PowerStateChanged(PowerState),
    Advertisement {
        id: DeviceId,
        /// Advertised local name
        local_name: Option<String>,
        /// Name cached by the platform
        cached_name: Option<String>,
        rssi: i16,
    },
    // Link callbacks echo the `attempt` of the `Effect::Connect` or
    // `Effect::Disconnect` they answer. Several attempts may target the same
    // device id.
    Connected {
        id: DeviceId,
        attempt: u64,
    },
    ConnectFailed {
        id: DeviceId,
        attempt: u64,
        error: Option<String>,
    },
    Disconnected {
        id: DeviceId,
        attempt: u64,
        error: Option<String>,
    },
    ServicesDiscovered {
        id: DeviceId,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        id: DeviceId,
        service: Uuid,
        result: Result<Vec<CharacteristicInfo>, String>,
    },
    NotifyStateChanged {
        id: DeviceId,
        characteristic: Uuid,
        result: Result<bool, String>,
    },
    WriteComplete {
        id: DeviceId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
    ValueUpdated {
        id: DeviceId,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    /// The platform could not start scanning
    ScanFailed {
        error: String,
    },
    /// Any other adapter operation failed
    AdapterError {
        operation: &'static str,
        error: String,
    },
}

/// Deferred wake-ups requested through [`Effect::Schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Periodic registry sweep
    Sweep,
    /// Deferred AUTH for the ready transition numbered `generation`
    AutoAuth { generation: u64 },
    /// Deadline of connect attempt number `attempt`
    ConnectTimeout { attempt: u64 },
}

/// Imperative entry points of the display layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRequest {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Disconnect,
    Send(SessionCommand),
}

/// Work the driver must perform on behalf of the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartScan {
        service_filter: Option<Vec<Uuid>>,
        allow_duplicates: bool,
    },
    StopScan,
    Connect {
        id: DeviceId,
        attempt: u64,
    },
    Disconnect {
        id: DeviceId,
        attempt: u64,
    },
    DiscoverServices {
        id: DeviceId,
        uuids: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        id: DeviceId,
        service: Uuid,
        uuids: Vec<Uuid>,
    },
    SetNotify {
        id: DeviceId,
        characteristic: Uuid,
        enabled: bool,
    },
    Write {
        id: DeviceId,
        characteristic: Uuid,
        bytes: Vec<u8>,
        with_ack: bool,
    },
    Schedule {
        delay: Duration,
        timer: TimerEvent,
    },
}

/// Everything that enters the serialized control context
#[derive(Debug)]
pub enum ControllerInput {
    Platform(BleEvent),
    Timer(TimerEvent),
    Request {
        request: UserRequest,
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
}
