//! Error types for the xpclink library.

use thiserror::Error;

/// The main error type for xpclink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No active device is selected.
    #[error("no active device")]
    NoActiveDevice,

    /// The named device is not in the roster.
    #[error("unknown device: {serial}")]
    UnknownDevice { serial: String },

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// A firmware transfer is already running.
    #[error("a firmware transfer is already in progress")]
    TransferInProgress,

    /// The firmware image could not be read.
    #[error("firmware image unreadable: {path}: {reason}")]
    FirmwareImage { path: String, reason: String },

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type alias for xpclink operations.
pub type Result<T> = std::result::Result<T, Error>;
