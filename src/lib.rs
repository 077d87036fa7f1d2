//! Door opener bridge library
//! BLE central that finds a door opener by name, connects to its Nordic UART
//! Service and exchanges line-oriented commands with it.

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;
