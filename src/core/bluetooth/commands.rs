//! Door opener session commands
//! This module contains the ASCII command vocabulary understood by the peripheral.

use std::fmt;

/// Commands sent over the NUS write characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open the door
    Open,
    /// Authenticate with a PIN
    Auth(String),
    /// Ask the peripheral for its state
    Status,
    /// Liveness check
    Ping,
    /// Any other line, sent verbatim
    Raw(String),
}

impl SessionCommand {
    pub fn auth(pin: impl Into<String>) -> Self {
        Self::Auth(pin.into())
    }

    /// The command line as sent; framing is left to the transport.
    pub fn as_line(&self) -> String {
        match self {
            Self::Open => "OPEN".to_string(),
            Self::Auth(pin) => format!("AUTH {}", pin),
            Self::Status => "STATUS".to_string(),
            Self::Ping => "PING".to_string(),
            Self::Raw(text) => text.clone(),
        }
    }

    /// Convert the command to its UTF-8 byte representation
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_line().into_bytes()
    }

    /// Parses user text, recognising the known vocabulary case-insensitively.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, Some(rest.trim())),
            None => (trimmed, None),
        };
        match (verb.to_ascii_uppercase().as_str(), rest) {
            ("OPEN", None) => Self::Open,
            ("STATUS", None) => Self::Status,
            ("PING", None) => Self::Ping,
            ("AUTH", Some(pin)) => Self::Auth(pin.to_string()),
            _ => Self::Raw(trimmed.to_string()),
        }
    }
}

impl fmt::Display for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_line())
    }
}

impl From<&str> for SessionCommand {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}
