//! Console commands
//! This module defines all the commands that can be invoked from the console
//! front end. Errors are turned into strings at this boundary.

use clap::{Parser, Subcommand, ValueEnum};

use crate::core::bluetooth::{BluetoothDevice, DeviceId, SessionCommand, SessionState};
use crate::core::controller::ControllerSnapshot;
use crate::state::AppState;

/// One console line. The first word names the command.
#[derive(Debug, Parser)]
#[command(multicall = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConsoleCommand {
    /// Start scanning (clears the device list)
    Scan,
    /// Stop scanning
    Stop,
    /// Show discovered devices, strongest first
    #[command(alias = "ls")]
    List,
    /// Connect to a listed device
    Connect { id: DeviceId },
    /// Close the session, or cancel a connect attempt
    Disconnect,
    /// Open the door
    Open,
    /// Show the session and ask the door opener for its state
    Status,
    /// Check the door opener is alive
    Ping,
    /// Send AUTH with the configured PIN
    Auth,
    /// Send a line verbatim
    Send {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Print the event log
    Log,
    /// Set the device name to auto-connect to
    Target {
        #[arg(required = true)]
        name: Vec<String>,
    },
    /// Set the PIN used by AUTH
    Pin { pin: String },
    /// Toggle auto-connect
    #[command(name = "autoconnect")]
    AutoConnect {
        #[arg(ignore_case = true)]
        state: Switch,
    },
    /// Toggle the automatic AUTH after connecting
    #[command(name = "autoauth")]
    AutoAuth {
        #[arg(ignore_case = true)]
        state: Switch,
    },
    /// Persist the settings
    Save,
    /// Exit
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> Self {
        switch == Switch::On
    }
}

impl ConsoleCommand {
    /// Parses a console line; `help` and bad input come back as the error.
    pub fn parse_line(line: &str) -> Result<Self, clap::Error> {
        ConsoleLine::try_parse_from(line.split_whitespace()).map(|line| line.command)
    }

    /// Runs the command. Returns the text to print, if any.
    pub async fn execute(self, app_state: &AppState) -> Result<Option<String>, String> {
        match self {
            Self::Scan => start_scan(app_state).await.map(|()| None),
            Self::Stop => stop_scan(app_state).await.map(|()| None),
            Self::List => Ok(Some(format_devices(
                &app_state.bluetooth.snapshot(),
                &app_state.config.current().target_name,
            ))),
            Self::Connect { id } => connect_to_device(app_state, id).await.map(|()| None),
            Self::Disconnect => disconnect(app_state).await.map(|()| None),
            Self::Open => send_command(app_state, SessionCommand::Open)
                .await
                .map(|()| None),
            Self::Ping => send_command(app_state, SessionCommand::Ping)
                .await
                .map(|()| None),
            Self::Send { text } => send_command(app_state, SessionCommand::Raw(text.join(" ")))
                .await
                .map(|()| None),
            Self::Auth => {
                let pin = app_state.config.current().pin;
                send_command(app_state, SessionCommand::auth(pin))
                    .await
                    .map(|()| None)
            }
            Self::Log => Ok(Some(app_state.bluetooth.snapshot().event_log.join("\n"))),
            Self::Status => {
                // Also ask the door opener, when there is a session to ask.
                let snapshot = app_state.bluetooth.snapshot();
                if snapshot.session_state == SessionState::Ready {
                    send_command(app_state, SessionCommand::Status).await?;
                }
                Ok(Some(format_status(&snapshot)))
            }
            Self::Target { name } => {
                let name = name.join(" ");
                app_state.config.update(|c| c.target_name = name);
                Ok(None)
            }
            Self::Pin { pin } => {
                app_state.config.update(|c| c.pin = pin);
                Ok(None)
            }
            Self::AutoConnect { state } => {
                app_state
                    .config
                    .update(|c| c.auto_connect_enabled = state.into());
                Ok(None)
            }
            Self::AutoAuth { state } => {
                app_state.config.update(|c| c.auto_auth_enabled = state.into());
                Ok(None)
            }
            Self::Save => save_config(app_state).await.map(|()| None),
            Self::Quit => {
                app_state.bluetooth.shutdown();
                Ok(None)
            }
        }
    }
}

/// Starts scanning; the device list is cleared.
pub async fn start_scan(app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth
        .start_scan()
        .await
        .map_err(|e| e.to_string())
}

pub async fn stop_scan(app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth
        .stop_scan()
        .await
        .map_err(|e| e.to_string())
}

/// Connects to a Bluetooth device
///
/// # Arguments
/// * `app_state` - The application state
/// * `device_id` - The platform identifier of a device in the current list
pub async fn connect_to_device(app_state: &AppState, device_id: DeviceId) -> Result<(), String> {
    app_state
        .bluetooth
        .connect(device_id)
        .await
        .map_err(|e| e.to_string())
}

/// Disconnects from the currently connected device
pub async fn disconnect(app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth
        .disconnect()
        .await
        .map_err(|e| e.to_string())
}

pub async fn send_command(app_state: &AppState, command: SessionCommand) -> Result<(), String> {
    app_state
        .bluetooth
        .send(command)
        .await
        .map_err(|e| e.to_string())
}

pub async fn save_config(app_state: &AppState) -> Result<(), String> {
    app_state
        .config
        .current()
        .save_config(app_state.config_dir())
        .await
        .map_err(|e| e.to_string())
}

fn format_device(device: &BluetoothDevice, is_target: bool) -> String {
    format!(
        "{} {:<20} {:>4} dBm  {:<17}  {}  ({}s ago)",
        if is_target { "*" } else { " " },
        device.name,
        device.rssi,
        device.address,
        device.id,
        device.last_seen_secs
    )
}

/// One line per device, strongest first; target matches are starred.
pub fn format_devices(snapshot: &ControllerSnapshot, target_name: &str) -> String {
    if snapshot.devices.is_empty() {
        return "No devices found.".to_string();
    }
    let targets = snapshot.devices_named(target_name);
    snapshot
        .devices
        .iter()
        .map(|d| format_device(d, targets.iter().any(|t| t.id == d.id)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_status(snapshot: &ControllerSnapshot) -> String {
    let mut lines = vec![
        format!("Radio:    {}", snapshot.power_state.describe()),
        format!(
            "Scanning: {}",
            if snapshot.scan_active { "yes" } else { "no" }
        ),
        format!("Session:  {:?}", snapshot.session_state),
    ];
    if let Some(id) = &snapshot.connected_device {
        lines.push(format!("Device:   {}", id));
    }
    lines.push(format!("Message:  {}", snapshot.last_message));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use clap::CommandFactory;
    use std::time::Duration;

    use crate::config::session_config::SessionConfig;
    use crate::core::bluetooth::event_channel;
    use crate::core::bluetooth::events::BleEvent;
    use crate::core::bluetooth::test_utils::RecordingPlatform;
    use crate::core::bluetooth::types::PowerState;

    fn app(power_state: PowerState) -> (AppState, crate::core::bluetooth::EventSink) {
        let (sink, inputs) = event_channel();
        let state = AppState::start(
            Arc::new(RecordingPlatform::new(power_state)),
            sink.clone(),
            inputs,
            SessionConfig::default(),
            std::env::temp_dir().join("dooropener-commands-test"),
        );
        (state, sink)
    }

    #[test]
    fn console_grammar_is_consistent() {
        ConsoleLine::command().debug_assert();
    }

    #[test]
    fn parses_console_lines() {
        let parse = |line: &str| ConsoleCommand::parse_line(line).expect(line);
        assert_eq!(parse("scan"), ConsoleCommand::Scan);
        assert_eq!(parse("ls"), ConsoleCommand::List);
        assert_eq!(
            parse("connect hci0/dev_AA"),
            ConsoleCommand::Connect {
                id: DeviceId::new("hci0/dev_AA")
            }
        );
        assert_eq!(parse("open"), ConsoleCommand::Open);
        assert_eq!(
            parse("send LED -ON"),
            ConsoleCommand::Send {
                text: vec!["LED".to_string(), "-ON".to_string()]
            }
        );
        assert_eq!(
            parse("autoauth OFF"),
            ConsoleCommand::AutoAuth { state: Switch::Off }
        );
        assert_eq!(
            parse("target Front Door"),
            ConsoleCommand::Target {
                name: vec!["Front".to_string(), "Door".to_string()]
            }
        );
        assert_eq!(parse("exit"), ConsoleCommand::Quit);
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(ConsoleCommand::parse_line("connect").is_err());
        assert!(ConsoleCommand::parse_line("send").is_err());
        assert!(ConsoleCommand::parse_line("autoconnect maybe").is_err());
        assert!(ConsoleCommand::parse_line("unlock").is_err());
        assert!(ConsoleCommand::parse_line("scan now").is_err());
    }

    #[test]
    fn help_is_reported_as_an_error_to_print() {
        let err = ConsoleCommand::parse_line("help").expect_err("help");
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert!(err.to_string().contains("autoconnect"));
    }

    #[tokio::test(start_paused = true)]
    async fn settings_update_live_config() {
        let (state, _sink) = app(PowerState::Off);
        ConsoleCommand::Target {
            name: vec!["DoorLock".to_string()],
        }
        .execute(&state)
        .await
        .expect("target");
        ConsoleCommand::AutoConnect { state: Switch::Off }
            .execute(&state)
            .await
            .expect("autoconnect");

        let config = state.config.current();
        assert_eq!(config.target_name, "DoorLock");
        assert!(!config.auto_connect_enabled);
        // The manager reads the same shared config
        assert_eq!(state.bluetooth.config().current().target_name, "DoorLock");
        state.bluetooth.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn session_commands_need_a_ready_session() {
        let (state, _sink) = app(PowerState::On);
        let err = ConsoleCommand::Open
            .execute(&state)
            .await
            .expect_err("not connected");
        assert!(err.contains("not ready"));
        state.bluetooth.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn list_shows_devices_with_target_marked() {
        let (state, sink) = app(PowerState::On);
        state.config.update(|c| {
            c.target_name = "DoorLock".to_string();
            c.auto_connect_enabled = false;
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        sink.emit(BleEvent::Advertisement {
            id: DeviceId::new("speaker"),
            local_name: Some("Speaker".to_string()),
            cached_name: None,
            rssi: -40,
        });
        sink.emit(BleEvent::Advertisement {
            id: DeviceId::new("lock"),
            local_name: Some("doorlock".to_string()),
            cached_name: None,
            rssi: -70,
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let listing = ConsoleCommand::List
            .execute(&state)
            .await
            .expect("list")
            .unwrap_or_default();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  Speaker"));
        assert!(lines[1].starts_with("* doorlock"));
        state.bluetooth.shutdown();
    }

    #[test]
    fn status_lists_session() {
        let snapshot = ControllerSnapshot {
            power_state: PowerState::On,
            scan_active: false,
            session_state: SessionState::Ready,
            connected_device: Some(DeviceId::new("lock")),
            last_message: "OK".to_string(),
            ..ControllerSnapshot::default()
        };
        let status = format_status(&snapshot);
        assert!(status.contains("Session:  Ready"));
        assert!(status.contains("Device:   lock"));
        assert!(status.ends_with("Message:  OK"));
    }

    #[test]
    fn empty_listing() {
        assert_eq!(
            format_devices(&ControllerSnapshot::default(), "DoorLock"),
            "No devices found."
        );
    }
}
