//! Test doubles for the platform boundary

use std::sync::{Mutex, PoisonError};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{GattAdapter, RadioAdapter};
use crate::core::bluetooth::events::Effect;
use crate::core::bluetooth::types::{DeviceId, PowerState};

/// Records every platform operation as the [`Effect`] that caused it.
/// Callbacks are left to the test, which emits them by hand.
pub struct RecordingPlatform {
    power_state: PowerState,
    calls: Mutex<Vec<Effect>>,
    fail_connect: bool,
}

impl RecordingPlatform {
    pub fn new(power_state: PowerState) -> Self {
        Self {
            power_state,
            calls: Mutex::new(Vec::new()),
            fail_connect: false,
        }
    }

    /// `connect` returns an error instead of recording the call
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn calls(&self) -> Vec<Effect> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Effect::Write { bytes, .. } => Some(bytes),
                _ => None,
            })
            .collect()
    }

    fn record(&self, effect: Effect) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(effect);
    }
}

#[async_trait]
impl RadioAdapter for RecordingPlatform {
    async fn power_state(&self) -> PowerState {
        self.power_state
    }

    async fn scan(&self, service_filter: Option<Vec<Uuid>>, allow_duplicates: bool) -> Result<()> {
        self.record(Effect::StartScan {
            service_filter,
            allow_duplicates,
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(Effect::StopScan);
        Ok(())
    }

    async fn connect(&self, device_id: &DeviceId, attempt: u64) -> Result<()> {
        if self.fail_connect {
            return Err(anyhow!("Device not found with ID: {}", device_id));
        }
        self.record(Effect::Connect {
            id: device_id.clone(),
            attempt,
        });
        Ok(())
    }

    async fn disconnect(&self, device_id: &DeviceId, attempt: u64) -> Result<()> {
        self.record(Effect::Disconnect {
            id: device_id.clone(),
            attempt,
        });
        Ok(())
    }
}

#[async_trait]
impl GattAdapter for RecordingPlatform {
    async fn discover_services(&self, device_id: &DeviceId, uuids: &[Uuid]) -> Result<()> {
        self.record(Effect::DiscoverServices {
            id: device_id.clone(),
            uuids: uuids.to_vec(),
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        uuids: &[Uuid],
    ) -> Result<()> {
        self.record(Effect::DiscoverCharacteristics {
            id: device_id.clone(),
            service,
            uuids: uuids.to_vec(),
        });
        Ok(())
    }

    async fn write_value(
        &self,
        device_id: &DeviceId,
        characteristic: Uuid,
        bytes: &[u8],
        with_ack: bool,
    ) -> Result<()> {
        self.record(Effect::Write {
            id: device_id.clone(),
            characteristic,
            bytes: bytes.to_vec(),
            with_ack,
        });
        Ok(())
    }

    async fn set_notify(
        &self,
        device_id: &DeviceId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        self.record(Effect::SetNotify {
            id: device_id.clone(),
            characteristic,
            enabled,
        });
        Ok(())
    }
}
