//! Bluetooth functionality for the door opener bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and talking to the door opener over the Nordic UART Service.

pub mod adapter;
pub mod commands;
pub mod connection;
pub mod constants;
pub mod event_log;
pub mod events;
pub mod manager;
pub mod notification;
pub mod platform;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export types that should be publicly accessible
pub use adapter::{EventSink, GattAdapter, Platform, RadioAdapter, event_channel};
pub use commands::SessionCommand;
pub use constants::*;
pub use manager::{BluetoothHandle, BluetoothManager};
pub use platform::BluestPlatform;
pub use types::{BluetoothDevice, DeviceId, PowerState, SessionState};
