//! Constants used throughout the application
//! This module contains the protocol UUIDs, timings and sentinels shared by
//! the registry, the scanner and the session layer.

use std::time::Duration;

use uuid::Uuid;

/// Nordic UART Service UUID (the session service)
pub const UUID_NUS_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// NUS RX characteristic, written by the central
pub const UUID_NUS_WRITE_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// NUS TX characteristic, notified by the peripheral
pub const UUID_NUS_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Display name used when neither the advertisement nor the platform knows one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// A registry entry not seen for longer than this is evicted
pub const DEVICE_EVICTION_WINDOW: Duration = Duration::from_secs(15);

/// How often the registry is swept
pub const DEVICE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Delay between the session becoming ready and the automatic AUTH command
pub const AUTO_AUTH_DELAY: Duration = Duration::from_millis(300);

/// Default number of entries kept by the event log
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// RSSI reported when the platform did not supply one (dBm)
pub const MISSING_RSSI: i16 = -127;
