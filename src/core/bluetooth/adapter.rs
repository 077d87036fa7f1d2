//! Boundary to the platform Bluetooth stack
//!
//! The controller never talks to a radio directly. The driver calls these
//! traits to carry out effects, and implementations report completions back
//! through an [`EventSink`]. Every method must return promptly: long-running
//! work (connecting, discovery, notification streams) runs in spawned tasks
//! that finish by emitting the matching [`BleEvent`].

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::events::{BleEvent, ControllerInput};
use crate::core::bluetooth::types::{DeviceId, PowerState};

/// Radio-level operations
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    async fn power_state(&self) -> PowerState;

    /// Starts discovery. Emits `Advertisement` for every report.
    async fn scan(&self, service_filter: Option<Vec<Uuid>>, allow_duplicates: bool) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    /// Emits `Connected` or `ConnectFailed`, later `Disconnected`, all
    /// tagged with `attempt`.
    async fn connect(&self, device_id: &DeviceId, attempt: u64) -> Result<()>;

    /// Emits `Disconnected` tagged with `attempt`.
    async fn disconnect(&self, device_id: &DeviceId, attempt: u64) -> Result<()>;
}

/// GATT-level operations on a connected peripheral
#[async_trait]
pub trait GattAdapter: Send + Sync {
    /// Emits `ServicesDiscovered`.
    async fn discover_services(&self, device_id: &DeviceId, uuids: &[Uuid]) -> Result<()>;

    /// Emits `CharacteristicsDiscovered`.
    async fn discover_characteristics(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        uuids: &[Uuid],
    ) -> Result<()>;

    /// Emits `WriteComplete`.
    async fn write_value(
        &self,
        device_id: &DeviceId,
        characteristic: Uuid,
        bytes: &[u8],
        with_ack: bool,
    ) -> Result<()>;

    /// Emits `NotifyStateChanged`, then `ValueUpdated` per notification.
    async fn set_notify(&self, device_id: &DeviceId, characteristic: Uuid, enabled: bool)
    -> Result<()>;
}

/// Everything the driver needs from the platform
pub trait Platform: RadioAdapter + GattAdapter {}

impl<T: RadioAdapter + GattAdapter> Platform for T {}

/// Sending half of the controller's input queue, handed to the platform
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ControllerInput>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ControllerInput>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: BleEvent) {
        if self.tx.send(ControllerInput::Platform(event)).is_err() {
            debug!("Controller stopped, dropping platform event");
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<ControllerInput> {
        self.tx.clone()
    }
}

/// Creates the controller input queue.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<ControllerInput>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}
