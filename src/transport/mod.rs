//! Transport layer for device communication.
//!
//! Each device in the roster owns one transport handle. Inbound data is
//! delivered as raw text chunks tagged with the device serial; framing is
//! the multiplexer's job, not the transport's.

pub mod lister;
pub mod serial;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;
use crate::types::DeviceId;

/// A raw text chunk received from one device.
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Serial of the originating device.
    pub serial: String,
    /// Decoded text as delivered by the link (may be a partial frame).
    pub text: String,
}

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Connects to the device.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Disconnects from the device.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Sends raw bytes to the device.
    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

/// Opens a transport for a freshly discovered device.
///
/// Implementations must arrange for inbound data to be forwarded as
/// [`RawChunk`]s on the channel handed to [`TransportFactory::open`].
pub trait TransportFactory: Send {
    /// Opens a (not yet connected) transport for the given device.
    fn open(
        &self,
        id: &DeviceId,
        chunk_tx: tokio::sync::mpsc::Sender<RawChunk>,
    ) -> Result<Box<dyn Transport>>;
}

pub use lister::{DeviceLister, SerialDeviceLister};
pub use serial::{SerialConfig, SerialTransport, SerialTransportFactory};
