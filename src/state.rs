//! Application state management
//! This module wires the configuration, the platform and the bluetooth
//! manager together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio::sync::mpsc;

use crate::config::SharedConfig;
use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::events::ControllerInput;
use crate::core::bluetooth::{
    BluestPlatform, BluetoothHandle, BluetoothManager, EventSink, Platform, event_channel,
};

/// Global application state
pub struct AppState {
    pub config: SharedConfig,
    pub bluetooth: BluetoothHandle,
    config_dir: PathBuf,
}

impl AppState {
    /// Loads the saved settings and starts the manager on the default adapter.
    pub async fn new(config_dir: PathBuf) -> Result<Self> {
        let config = SessionConfig::load_config(&config_dir).await?;
        let (sink, inputs) = event_channel();

        info!("Initializing BluetoothManager...");
        let platform = BluestPlatform::new(sink.clone()).await?;
        Ok(Self::start(Arc::new(platform), sink, inputs, config, config_dir))
    }

    /// Starts the manager over an already constructed platform.
    pub fn start<P: Platform + 'static>(
        platform: Arc<P>,
        sink: EventSink,
        inputs: mpsc::UnboundedReceiver<ControllerInput>,
        config: SessionConfig,
        config_dir: PathBuf,
    ) -> Self {
        let config = SharedConfig::new(config);
        let (manager, bluetooth) = BluetoothManager::new(platform, sink, inputs, config.clone());
        tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!("Bluetooth manager stopped: {}", e);
            }
        });

        Self {
            config,
            bluetooth,
            config_dir,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}
