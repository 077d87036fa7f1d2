//! bluest-backed platform adapter
//! Keeps the native device, service and characteristic objects keyed by
//! [`DeviceId`] and turns every bluest future or stream into [`BleEvent`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bluest::{Adapter, AdapterEvent, Characteristic, ConnectionEvent, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{EventSink, GattAdapter, RadioAdapter};
use crate::core::bluetooth::constants::MISSING_RSSI;
use crate::core::bluetooth::events::BleEvent;
use crate::core::bluetooth::types::{CharacteristicInfo, DeviceId, PowerState};

type GattKey = (DeviceId, Uuid);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Running scan task and the token that stops it
struct ScanTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Connection watcher of one device and the attempt it serves
struct Link {
    attempt: u64,
    cancel_token: CancellationToken,
}

/// Native objects and task tokens shared with the spawned tasks.
///
/// Generic over the native object types so the bookkeeping does not need a
/// radio.
struct PlatformState<D, S, C> {
    /// Devices seen while scanning, by id
    devices: Mutex<HashMap<DeviceId, D>>,
    services: Mutex<HashMap<GattKey, S>>,
    characteristics: Mutex<HashMap<GattKey, C>>,
    links: Mutex<HashMap<DeviceId, Link>>,
    /// Notification streams, one per subscribed characteristic
    subscriptions: Mutex<HashMap<GattKey, CancellationToken>>,
}

type NativeState = PlatformState<Device, Service, Characteristic>;

impl<D, S, C> PlatformState<D, S, C> {
    fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
            characteristics: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the watcher of `attempt`, cancelling the one it replaces.
    fn bind_link(&self, device_id: &DeviceId, attempt: u64) -> CancellationToken {
        let cancel_token = CancellationToken::new();
        let link = Link {
            attempt,
            cancel_token: cancel_token.clone(),
        };
        if let Some(previous) = lock(&self.links).insert(device_id.clone(), link) {
            previous.cancel_token.cancel();
        }
        cancel_token
    }

    /// Cancels and removes the link of `device_id` if it still serves
    /// `attempt`. Returns whether it did.
    fn release_link(&self, device_id: &DeviceId, attempt: u64) -> bool {
        let mut links = lock(&self.links);
        if !matches!(links.get(device_id), Some(link) if link.attempt == attempt) {
            return false;
        }
        if let Some(link) = links.remove(device_id) {
            link.cancel_token.cancel();
        }
        true
    }

    fn is_linked(&self, device_id: &DeviceId) -> bool {
        lock(&self.links).contains_key(device_id)
    }

    /// Drops every GATT object and stream of `device_id`.
    fn forget_gatt(&self, device_id: &DeviceId) {
        lock(&self.services).retain(|(id, _), _| id != device_id);
        lock(&self.characteristics).retain(|(id, _), _| id != device_id);
        lock(&self.subscriptions).retain(|(id, _), token| {
            if id == device_id {
                token.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Drops devices no link refers to. Returns how many were dropped.
    fn prune_devices(&self) -> usize {
        let links = lock(&self.links);
        let mut devices = lock(&self.devices);
        let before = devices.len();
        devices.retain(|id, _| links.contains_key(id));
        before - devices.len()
    }

    fn cancel_all(&self) {
        for link in lock(&self.links).values() {
            link.cancel_token.cancel();
        }
        for token in lock(&self.subscriptions).values() {
            token.cancel();
        }
    }
}

pub struct BluestPlatform {
    adapter: Adapter,
    sink: EventSink,
    state: Arc<NativeState>,
    scan: Mutex<Option<ScanTask>>,
    power_watch: CancellationToken,
}

impl BluestPlatform {
    /// Opens the default adapter and starts reporting power changes to `sink`.
    pub async fn new(sink: EventSink) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        info!("Bluetooth adapter opened.");

        let power_watch = CancellationToken::new();
        tokio::spawn(Self::watch_power(
            adapter.clone(),
            sink.clone(),
            power_watch.clone(),
        ));

        Ok(Self {
            adapter,
            sink,
            state: Arc::new(PlatformState::new()),
            scan: Mutex::new(None),
            power_watch,
        })
    }

    async fn watch_power(adapter: Adapter, sink: EventSink, cancel_token: CancellationToken) {
        let events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Adapter events unavailable, power changes will not be reported: {}", e);
                return;
            }
        };
        tokio::pin!(events);

        loop {
            tokio::select! {
                event = events.next() => {
                    match event {
                        Some(Ok(AdapterEvent::Available)) => {
                            sink.emit(BleEvent::PowerStateChanged(PowerState::On));
                        }
                        Some(Ok(AdapterEvent::Unavailable)) => {
                            sink.emit(BleEvent::PowerStateChanged(PowerState::Off));
                        }
                        Some(Err(e)) => {
                            error!("Error in adapter event stream: {}", e);
                        }
                        None => {
                            info!("Adapter event stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    fn device(&self, device_id: &DeviceId) -> Result<Device> {
        lock(&self.state.devices)
            .get(device_id)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found with ID: {}", device_id))
    }

    fn characteristic(&self, device_id: &DeviceId, uuid: Uuid) -> Result<Characteristic> {
        lock(&self.state.characteristics)
            .get(&(device_id.clone(), uuid))
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic {} not discovered on {}", uuid, device_id))
    }

    async fn scan_task(
        adapter: Adapter,
        services: Vec<Uuid>,
        state: Arc<NativeState>,
        sink: EventSink,
        cancel_token: CancellationToken,
    ) {
        let mut scan_stream = match adapter.scan(&services).await {
            Ok(stream) => stream,
            Err(e) => {
                sink.emit(BleEvent::ScanFailed {
                    error: e.to_string(),
                });
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            let device = discovered.device;
                            let id = DeviceId::new(device.id().to_string());
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device, discovered.rssi);

                            let cached_name = device.name().ok();
                            lock(&state.devices).insert(id.clone(), device);
                            sink.emit(BleEvent::Advertisement {
                                id,
                                local_name: discovered.adv_data.local_name,
                                cached_name,
                                rssi: discovered.rssi.unwrap_or(MISSING_RSSI),
                            });
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn watch_link(
        adapter: Adapter,
        device: Device,
        id: DeviceId,
        attempt: u64,
        state: Arc<NativeState>,
        sink: EventSink,
        cancel_token: CancellationToken,
    ) {
        if let Err(e) = adapter.connect_device(&device).await {
            state.release_link(&id, attempt);
            sink.emit(BleEvent::ConnectFailed {
                id,
                attempt,
                error: Some(e.to_string()),
            });
            return;
        }
        if cancel_token.is_cancelled() {
            // Cancelled while the link was coming up
            if let Err(e) = adapter.disconnect_device(&device).await {
                warn!("Failed to drop cancelled connection to {}: {}", id, e);
            }
            return;
        }
        info!("Connected to {} (attempt {})", id, attempt);
        sink.emit(BleEvent::Connected {
            id: id.clone(),
            attempt,
        });

        let events = match adapter.device_connection_events(&device).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch connection of {}: {}", id, e);
                return;
            }
        };
        tokio::pin!(events);

        loop {
            tokio::select! {
                event = events.next() => {
                    match event {
                        Some(ConnectionEvent::Disconnected) | None => {
                            info!("Device {} disconnected", id);
                            if state.release_link(&id, attempt) {
                                state.forget_gatt(&id);
                            }
                            sink.emit(BleEvent::Disconnected {
                                id: id.clone(),
                                attempt,
                                error: None,
                            });
                            break;
                        }
                        Some(ConnectionEvent::Connected) => {}
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn find_services(device: &Device, uuids: &[Uuid]) -> Result<Vec<Service>, String> {
        let mut found = Vec::new();
        for uuid in uuids {
            let services = device
                .discover_services_with_uuid(*uuid)
                .await
                .map_err(|e| e.to_string())?;
            found.extend(services);
        }
        Ok(found)
    }

    /// Characteristics of `service` with the given uuids, each paired with
    /// whether it supports notifications
    async fn find_characteristics(
        service: &Service,
        uuids: &[Uuid],
    ) -> Result<Vec<(Characteristic, bool)>, String> {
        let mut found = Vec::new();
        for uuid in uuids {
            let characteristics = service
                .discover_characteristics_with_uuid(*uuid)
                .await
                .map_err(|e| e.to_string())?;
            for characteristic in characteristics {
                let properties = characteristic
                    .properties()
                    .await
                    .map_err(|e| e.to_string())?;
                found.push((characteristic, properties.notify));
            }
        }
        Ok(found)
    }

    async fn stream_notifications(
        characteristic: Characteristic,
        id: DeviceId,
        sink: EventSink,
        cancel_token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        let notifications = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                sink.emit(BleEvent::NotifyStateChanged {
                    id,
                    characteristic: uuid,
                    result: Err(e.to_string()),
                });
                return;
            }
        };
        tokio::pin!(notifications);
        sink.emit(BleEvent::NotifyStateChanged {
            id: id.clone(),
            characteristic: uuid,
            result: Ok(true),
        });

        loop {
            tokio::select! {
                result = notifications.next() => {
                    match result {
                        Some(value) => {
                            let stream_failed = value.is_err();
                            sink.emit(BleEvent::ValueUpdated {
                                id: id.clone(),
                                characteristic: uuid,
                                result: value.map_err(|e| e.to_string()),
                            });
                            if stream_failed {
                                break;
                            }
                        }
                        None => {
                            info!("Notification stream of {} ended", uuid);
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }
}

impl Drop for BluestPlatform {
    fn drop(&mut self) {
        self.power_watch.cancel();
        if let Some(scan) = lock(&self.scan).take() {
            scan.cancel_token.cancel();
        }
        self.state.cancel_all();
    }
}

#[async_trait]
impl RadioAdapter for BluestPlatform {
    async fn power_state(&self) -> PowerState {
        match self.adapter.is_available().await {
            Ok(true) => PowerState::On,
            Ok(false) => PowerState::Off,
            Err(e) => {
                warn!("Failed to query adapter availability: {}", e);
                PowerState::Unknown
            }
        }
    }

    async fn scan(&self, service_filter: Option<Vec<Uuid>>, allow_duplicates: bool) -> Result<()> {
        self.stop_scan().await?;
        if !allow_duplicates {
            debug!("Duplicate filtering is left to the platform");
        }

        let pruned = self.state.prune_devices();
        if pruned > 0 {
            debug!("Dropped {} device(s) from the previous scan", pruned);
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            service_filter.unwrap_or_default(),
            self.state.clone(),
            self.sink.clone(),
            cancel_token.clone(),
        ));
        *lock(&self.scan) = Some(ScanTask {
            cancel_token,
            handle,
        });
        info!("Device scan task started.");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let Some(scan) = lock(&self.scan).take() else {
            return Ok(());
        };
        info!("Stopping Bluetooth scan.");
        scan.cancel_token.cancel();
        match scan.handle.await {
            Ok(()) => debug!("Scan task finished after cancellation."),
            Err(e) if e.is_cancelled() => debug!("Scan task was cancelled."),
            Err(e) => return Err(anyhow!("Scan task failed: {}", e)),
        }
        Ok(())
    }

    async fn connect(&self, device_id: &DeviceId, attempt: u64) -> Result<()> {
        let device = self.device(device_id)?;
        let cancel_token = self.state.bind_link(device_id, attempt);

        info!("Initiating connection to {} (attempt {})...", device_id, attempt);
        tokio::spawn(Self::watch_link(
            self.adapter.clone(),
            device,
            device_id.clone(),
            attempt,
            self.state.clone(),
            self.sink.clone(),
            cancel_token,
        ));
        Ok(())
    }

    async fn disconnect(&self, device_id: &DeviceId, attempt: u64) -> Result<()> {
        // The watcher would report this disconnect a second time.
        if !self.state.release_link(device_id, attempt) && self.state.is_linked(device_id) {
            debug!(
                "Not disconnecting {}: attempt {} was superseded",
                device_id, attempt
            );
            return Ok(());
        }
        self.state.forget_gatt(device_id);

        let device = self.device(device_id)?;
        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        let id = device_id.clone();
        tokio::spawn(async move {
            info!("Disconnecting from device {}", id);
            let error = adapter
                .disconnect_device(&device)
                .await
                .err()
                .map(|e| e.to_string());
            sink.emit(BleEvent::Disconnected { id, attempt, error });
        });
        Ok(())
    }
}

#[async_trait]
impl GattAdapter for BluestPlatform {
    async fn discover_services(&self, device_id: &DeviceId, uuids: &[Uuid]) -> Result<()> {
        let device = self.device(device_id)?;
        let state = self.state.clone();
        let sink = self.sink.clone();
        let id = device_id.clone();
        let uuids = uuids.to_vec();
        tokio::spawn(async move {
            let result = Self::find_services(&device, &uuids).await.map(|services| {
                let mut cache = lock(&state.services);
                services
                    .into_iter()
                    .map(|service| {
                        let uuid = service.uuid();
                        cache.insert((id.clone(), uuid), service);
                        uuid
                    })
                    .collect()
            });
            sink.emit(BleEvent::ServicesDiscovered { id, result });
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        uuids: &[Uuid],
    ) -> Result<()> {
        let native = lock(&self.state.services)
            .get(&(device_id.clone(), service))
            .cloned()
            .ok_or_else(|| anyhow!("Service {} not discovered on {}", service, device_id))?;
        let state = self.state.clone();
        let sink = self.sink.clone();
        let id = device_id.clone();
        let uuids = uuids.to_vec();
        tokio::spawn(async move {
            let result = Self::find_characteristics(&native, &uuids)
                .await
                .map(|found| {
                    let mut cache = lock(&state.characteristics);
                    found
                        .into_iter()
                        .map(|(characteristic, can_notify)| {
                            let uuid = characteristic.uuid();
                            cache.insert((id.clone(), uuid), characteristic);
                            CharacteristicInfo::new(uuid, can_notify)
                        })
                        .collect()
                });
            sink.emit(BleEvent::CharacteristicsDiscovered {
                id,
                service,
                result,
            });
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
        let native = self.characteristic(device_id, characteristic)?;
        if !with_ack {
            return Ok(native.write_without_response(bytes).await?);
        }

        let sink = self.sink.clone();
        let id = device_id.clone();
        let bytes = bytes.to_vec();
        tokio::spawn(async move {
            let result = native.write(&bytes).await.map_err(|e| e.to_string());
            sink.emit(BleEvent::WriteComplete {
                id,
                characteristic,
                result,
            });
        });
        Ok(())
    }

    async fn set_notify(
        &self,
        device_id: &DeviceId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        let key = (device_id.clone(), characteristic);
        if let Some(previous) = lock(&self.state.subscriptions).remove(&key) {
            previous.cancel();
        }
        if !enabled {
            self.sink.emit(BleEvent::NotifyStateChanged {
                id: device_id.clone(),
                characteristic,
                result: Ok(false),
            });
            return Ok(());
        }

        let native = self.characteristic(device_id, characteristic)?;
        let cancel_token = CancellationToken::new();
        lock(&self.state.subscriptions).insert(key, cancel_token.clone());
        info!("Subscribing to notifications of {}...", characteristic);
        tokio::spawn(Self::stream_notifications(
            native,
            device_id.clone(),
            self.sink.clone(),
            cancel_token,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_NUS_NOTIFY_CHAR, UUID_NUS_SERVICE};

    type BareState = PlatformState<(), (), ()>;

    fn lock_id() -> DeviceId {
        DeviceId::new("lock-1")
    }

    #[test]
    fn replacing_a_link_cancels_the_old_watcher() {
        let state = BareState::new();
        let first = state.bind_link(&lock_id(), 1);
        let second = state.bind_link(&lock_id(), 2);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!state.release_link(&lock_id(), 1));
        assert!(state.is_linked(&lock_id()));

        assert!(state.release_link(&lock_id(), 2));
        assert!(second.is_cancelled());
        assert!(!state.is_linked(&lock_id()));
    }

    #[test]
    fn forgetting_gatt_only_touches_that_device() {
        let state = BareState::new();
        let other = DeviceId::new("other");
        for id in [lock_id(), other.clone()] {
            lock(&state.services).insert((id.clone(), UUID_NUS_SERVICE), ());
            lock(&state.characteristics).insert((id, UUID_NUS_NOTIFY_CHAR), ());
        }
        let lock_stream = CancellationToken::new();
        let other_stream = CancellationToken::new();
        lock(&state.subscriptions).insert((lock_id(), UUID_NUS_NOTIFY_CHAR), lock_stream.clone());
        lock(&state.subscriptions).insert((other.clone(), UUID_NUS_NOTIFY_CHAR), other_stream.clone());

        state.forget_gatt(&lock_id());

        assert!(lock_stream.is_cancelled());
        assert!(!other_stream.is_cancelled());
        let services: Vec<DeviceId> = lock(&state.services).keys().map(|(id, _)| id.clone()).collect();
        assert_eq!(services, vec![other]);
        assert_eq!(lock(&state.characteristics).len(), 1);
        assert_eq!(lock(&state.subscriptions).len(), 1);
    }

    #[test]
    fn new_scan_keeps_only_linked_devices() {
        let state = BareState::new();
        for id in ["a", "b", "lock-1"] {
            lock(&state.devices).insert(DeviceId::new(id), ());
        }
        state.bind_link(&lock_id(), 1);

        assert_eq!(state.prune_devices(), 2);
        let ids: Vec<DeviceId> = lock(&state.devices).keys().cloned().collect();
        assert_eq!(ids, vec![lock_id()]);

        state.release_link(&lock_id(), 1);
        assert_eq!(state.prune_devices(), 1);
        assert!(lock(&state.devices).is_empty());
    }
}
