use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::DEFAULT_EVENT_LOG_CAPACITY;
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "session_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the peripheral to connect to, compared case-insensitively.
    pub target_name: String,

    /// Connect as soon as an advertisement carries the target name.
    pub auto_connect_enabled: bool,

    /// Send `AUTH <pin>` shortly after the session becomes ready.
    pub auto_auth_enabled: bool,

    /// PIN used to build the AUTH command.
    pub pin: String,

    /// Give up a connect attempt after this many seconds. `None` waits forever.
    pub connect_timeout_secs: Option<u64>,

    /// Disconnect (and so rescan) when the session service or its
    /// characteristics cannot be found, instead of staying connected.
    pub disconnect_on_discovery_failure: bool,

    /// Number of entries kept by the event log.
    pub event_log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            target_name: String::new(),
            auto_connect_enabled: true,
            auto_auth_enabled: true,
            pin: String::new(),
            connect_timeout_secs: None,
            disconnect_on_discovery_failure: false,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Loads the config from `config_dir`, falling back to defaults when absent.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!(
                "Config file not found at {:?}, using default.",
                file_path_str
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the config to `config_dir`, creating the directory if needed.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize session config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Session config saved to {:?}.", file_path_str);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "target_name": "DoorLock", "pin": "1234" }"#)
                .unwrap_or_default();
        assert_eq!(config.target_name, "DoorLock");
        assert_eq!(config.pin, "1234");
        assert!(config.auto_connect_enabled);
        assert!(config.auto_auth_enabled);
        assert_eq!(config.connect_timeout_secs, None);
        assert!(!config.disconnect_on_discovery_failure);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = std::env::temp_dir().join(format!(
            "dooropener-config-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let config = SessionConfig {
            target_name: "FrontDoor".to_string(),
            pin: "9876".to_string(),
            connect_timeout_secs: Some(10),
            ..SessionConfig::default()
        };

        config.save_config(&dir).await.expect("save");
        let loaded = SessionConfig::load_config(&dir).await.expect("load");
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn absent_file_gives_defaults() {
        let dir = std::env::temp_dir().join("dooropener-config-does-not-exist");
        let loaded = SessionConfig::load_config(&dir).await.expect("load");
        assert_eq!(loaded, SessionConfig::default());
    }
}
