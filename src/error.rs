//! Errors returned to the display layer

use thiserror::Error;

use crate::core::bluetooth::types::{DeviceId, SessionState};

/// Failures of imperative requests. Platform callbacks never fail; their
/// errors only reach the event log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("session is not ready (state: {0:?})")]
    NotReady(SessionState),

    #[error("no device connected")]
    NotConnected,

    #[error("a session is already bound to {0}")]
    AlreadyBound(DeviceId),

    #[error("device not found with ID: {0}")]
    UnknownDevice(DeviceId),

    #[error("bluetooth controller has shut down")]
    ControllerClosed,
}
