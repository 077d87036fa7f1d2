//! Bluetooth manager for the door opener bridge
//! This module runs the controller on one task and provides the main
//! interface for bluetooth operations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;

use crate::config::SharedConfig;
use crate::core::bluetooth::adapter::{EventSink, Platform};
use crate::core::bluetooth::commands::SessionCommand;
use crate::core::bluetooth::constants::DEVICE_SWEEP_INTERVAL;
use crate::core::bluetooth::events::{BleEvent, ControllerInput, Effect, TimerEvent, UserRequest};
use crate::core::bluetooth::types::DeviceId;
use crate::core::controller::{CentralController, ControllerSnapshot};
use crate::error::ControllerError;

/// Owns the controller and executes its effects against the platform.
///
/// All inputs (platform callbacks, timers, user requests) are funnelled
/// through one queue and handled one at a time.
pub struct BluetoothManager<P> {
    controller: CentralController,
    platform: Arc<P>,
    sink: EventSink,
    inputs: mpsc::UnboundedReceiver<ControllerInput>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
    shutdown: CancellationToken,
}

impl<P: Platform + 'static> BluetoothManager<P> {
    /// Creates the manager and the handle the display layer talks to.
    ///
    /// `sink` and `inputs` must come from the same
    /// [`event_channel`](crate::core::bluetooth::event_channel) that the
    /// platform was given.
    pub fn new(
        platform: Arc<P>,
        sink: EventSink,
        inputs: mpsc::UnboundedReceiver<ControllerInput>,
        config: SharedConfig,
    ) -> (Self, BluetoothHandle) {
        let (snapshot_tx, snapshot_rx) = watch::channel(ControllerSnapshot::default());
        let shutdown = CancellationToken::new();
        let handle = BluetoothHandle {
            inputs: sink.sender(),
            snapshot: snapshot_rx,
            config: config.clone(),
            shutdown: shutdown.clone(),
        };
        let manager = Self {
            controller: CentralController::new(config),
            platform,
            sink,
            inputs,
            snapshot_tx,
            shutdown,
        };
        (manager, handle)
    }

    /// Runs until shut down through the handle.
    pub async fn run(mut self) -> Result<()> {
        info!("Bluetooth manager started.");
        let power_state = self.platform.power_state().await;
        self.dispatch(ControllerInput::Platform(BleEvent::PowerStateChanged(power_state)))
            .await;

        let mut sweep = interval_at(Instant::now() + DEVICE_SWEEP_INTERVAL, DEVICE_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Bluetooth manager shutting down.");
                    break;
                }
                _ = sweep.tick() => {
                    self.dispatch(ControllerInput::Timer(TimerEvent::Sweep)).await;
                }
                input = self.inputs.recv() => {
                    match input {
                        Some(input) => self.dispatch(input).await,
                        None => {
                            info!("Controller input queue closed.");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.platform.stop_scan().await {
            warn!("Failed to stop scan on shutdown: {}", e);
        }
        Ok(())
    }

    async fn dispatch(&mut self, input: ControllerInput) {
        let now = Instant::now().into_std();
        let effects = match input {
            ControllerInput::Platform(event) => {
                debug!("Platform event: {:?}", event);
                self.controller.handle_platform(event, now)
            }
            ControllerInput::Timer(timer) => self.controller.handle_timer(timer, now),
            ControllerInput::Request { request, reply } => {
                debug!("User request: {:?}", request);
                let (effects, outcome) = match self.controller.handle_request(request) {
                    Ok(effects) => (effects, Ok(())),
                    Err(e) => (Vec::new(), Err(e)),
                };
                if reply.send(outcome).is_err() {
                    debug!("Requester went away before the reply");
                }
                effects
            }
        };

        for effect in effects {
            self.execute(effect).await;
        }
        self.snapshot_tx
            .send_replace(self.controller.snapshot(Instant::now().into_std()));
    }

    /// Carries out one effect. Failures come back as the matching callback.
    async fn execute(&self, effect: Effect) {
        let platform = &self.platform;
        match effect {
            Effect::StartScan {
                service_filter,
                allow_duplicates,
            } => {
                if let Err(e) = platform.scan(service_filter, allow_duplicates).await {
                    self.sink.emit(BleEvent::ScanFailed {
                        error: e.to_string(),
                    });
                }
            }
            Effect::StopScan => {
                if let Err(e) = platform.stop_scan().await {
                    self.sink.emit(BleEvent::AdapterError {
                        operation: "stop scan",
                        error: e.to_string(),
                    });
                }
            }
            Effect::Connect { id, attempt } => {
                if let Err(e) = platform.connect(&id, attempt).await {
                    self.sink.emit(BleEvent::ConnectFailed {
                        id,
                        attempt,
                        error: Some(e.to_string()),
                    });
                }
            }
            Effect::Disconnect { id, attempt } => {
                if let Err(e) = platform.disconnect(&id, attempt).await {
                    self.sink.emit(BleEvent::AdapterError {
                        operation: "disconnect",
                        error: e.to_string(),
                    });
                }
            }
            Effect::DiscoverServices { id, uuids } => {
                if let Err(e) = platform.discover_services(&id, &uuids).await {
                    self.sink.emit(BleEvent::ServicesDiscovered {
                        id,
                        result: Err(e.to_string()),
                    });
                }
            }
            Effect::DiscoverCharacteristics { id, service, uuids } => {
                if let Err(e) = platform.discover_characteristics(&id, service, &uuids).await {
                    self.sink.emit(BleEvent::CharacteristicsDiscovered {
                        id,
                        service,
                        result: Err(e.to_string()),
                    });
                }
            }
            Effect::SetNotify {
                id,
                characteristic,
                enabled,
            } => {
                if let Err(e) = platform.set_notify(&id, characteristic, enabled).await {
                    self.sink.emit(BleEvent::NotifyStateChanged {
                        id,
                        characteristic,
                        result: Err(e.to_string()),
                    });
                }
            }
            Effect::Write {
                id,
                characteristic,
                bytes,
                with_ack,
            } => {
                if let Err(e) = platform
                    .write_value(&id, characteristic, &bytes, with_ack)
                    .await
                {
                    self.sink.emit(BleEvent::WriteComplete {
                        id,
                        characteristic,
                        result: Err(e.to_string()),
                    });
                }
            }
            Effect::Schedule { delay, timer } => self.schedule(delay, timer),
        }
    }

    fn schedule(&self, delay: Duration, timer: TimerEvent) {
        let inputs = self.sink.sender();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {
                    if inputs.send(ControllerInput::Timer(timer)).is_err() {
                        debug!("Controller stopped before timer {:?} fired", timer);
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }
}

/// Cloneable handle for the display layer
#[derive(Clone)]
pub struct BluetoothHandle {
    inputs: mpsc::UnboundedSender<ControllerInput>,
    snapshot: watch::Receiver<ControllerSnapshot>,
    config: SharedConfig,
    shutdown: CancellationToken,
}

impl BluetoothHandle {
    pub async fn start_scan(&self) -> Result<(), ControllerError> {
        self.request(UserRequest::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), ControllerError> {
        self.request(UserRequest::StopScan).await
    }

    /// Connects to a device from the registry
    pub async fn connect(&self, device_id: DeviceId) -> Result<(), ControllerError> {
        self.request(UserRequest::Connect(device_id)).await
    }

    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.request(UserRequest::Disconnect).await
    }

    pub async fn send(&self, command: SessionCommand) -> Result<(), ControllerError> {
        self.request(UserRequest::Send(command)).await
    }

    /// Latest published state
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits until a newer snapshot is published.
    pub async fn changed(&mut self) -> Result<(), ControllerError> {
        self.snapshot
            .changed()
            .await
            .map_err(|_| ControllerError::ControllerClosed)
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn request(&self, request: UserRequest) -> Result<(), ControllerError> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(ControllerInput::Request { request, reply })
            .map_err(|_| ControllerError::ControllerClosed)?;
        response
            .await
            .map_err(|_| ControllerError::ControllerClosed)?
    }
}
