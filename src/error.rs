//! Crate-wide error type.
//!
//! One variant per error kind in the controller's error handling design.
//! `TransportTimeout`/`TransportCorrupt`/`TransportRefused` carry enough
//! context to be logged usefully without the caller re-deriving it.

use crate::servo::ServoId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no open serial connection")]
    NotConnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to open serial port {port}: {source}")]
    PortOpenFailed {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to set baud rate {baud} on {port}")]
    BaudSetFailed { port: String, baud: u32 },

    #[error("servo {id}: transport timed out waiting for a reply to {operation}")]
    TransportTimeout { id: ServoId, operation: &'static str },

    #[error("servo {id}: corrupt reply to {operation} (checksum mismatch)")]
    TransportCorrupt { id: ServoId, operation: &'static str },

    #[error("servo {id}: refused {operation} (status error bits set)")]
    TransportRefused { id: ServoId, operation: &'static str },

    #[error("servo {id} did not respond to ping")]
    ServoNotFound { id: ServoId },

    #[error("servo {id} is already in use")]
    IdInUse { id: ServoId },

    #[error("EEPROM-protected sequence failed for servo {id}: {step}")]
    EepromProtected { id: ServoId, step: &'static str },

    #[error("recovery ladder exhausted for servo {id}; {channel} degraded to N/A")]
    RecoveryExhausted { id: ServoId, channel: &'static str },

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl Error {
    /// A stable, machine-readable tag for the HTTP surface and for clients
    /// that want to switch on error kind rather than parse `error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotConnected => "NotConnected",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::PortOpenFailed { .. } => "PortOpenFailed",
            Error::BaudSetFailed { .. } => "BaudSetFailed",
            Error::TransportTimeout { .. } => "TransportTimeout",
            Error::TransportCorrupt { .. } => "TransportCorrupt",
            Error::TransportRefused { .. } => "TransportRefused",
            Error::ServoNotFound { .. } => "ServoNotFound",
            Error::IdInUse { .. } => "IdInUse",
            Error::EepromProtected { .. } => "EepromProtected",
            Error::RecoveryExhausted { .. } => "RecoveryExhausted",
            Error::Internal(_) => "Internal",
        }
    }
}
