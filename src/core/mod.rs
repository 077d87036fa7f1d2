//! Core functionality for the door opener bridge
//! This module contains the central controller and the bluetooth plumbing
//! it drives.

pub mod bluetooth;
pub mod controller;

// Re-export commonly used types
pub use bluetooth::{BluetoothHandle, BluetoothManager};
pub use controller::{CentralController, ControllerSnapshot};
