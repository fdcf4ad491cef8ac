//! Serial/USB transport implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::{RawChunk, Transport, TransportFactory};
use crate::types::DeviceId;

/// Default baud rate for TPC300/HPC100 controllers.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay after opening the port before use.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after connection before the port is considered usable.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport for one controller.
///
/// On connect the stream is split; the read half moves into a background
/// task that forwards raw text chunks to the engine's inbound channel.
pub struct SerialTransport {
    config: SerialConfig,
    serial: String,
    chunk_tx: mpsc::Sender<RawChunk>,
    writer: Option<Arc<Mutex<WriteHalf<SerialStream>>>>,
    read_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Creates a new serial transport for the given device.
    #[must_use]
    pub fn new(config: SerialConfig, serial: impl Into<String>, chunk_tx: mpsc::Sender<RawChunk>) -> Self {
        Self {
            config,
            serial: serial.into(),
            chunk_tx,
            writer: None,
            read_task: None,
        }
    }

    /// Runs the read loop, forwarding decoded text chunks.
    async fn run_read_loop(
        mut reader: ReadHalf<SerialStream>,
        serial: String,
        chunk_tx: mpsc::Sender<RawChunk>,
    ) {
        let mut buf = [0u8; 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!(serial, "serial port closed");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(serial, "serial read error: {}", e);
                    return;
                }
            };

            tracing::trace!(serial, "received {} bytes", n);
            let text = String::from_utf8_lossy(&buf[..n]).into_owned();

            if chunk_tx
                .send(RawChunk {
                    serial: serial.clone(),
                    text,
                })
                .await
                .is_err()
            {
                tracing::debug!(serial, "chunk receiver dropped");
                return;
            }
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }

            tracing::info!(port = self.config.port, "connecting to serial port");

            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            // RTS must be low for the controller to start talking.
            if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
                tracing::warn!("failed to set RTS: {}", e);
            }

            tokio::time::sleep(self.config.connection_delay).await;

            let (reader, writer) = tokio::io::split(stream);
            self.writer = Some(Arc::new(Mutex::new(writer)));

            let serial = self.serial.clone();
            let chunk_tx = self.chunk_tx.clone();
            self.read_task = Some(tokio::spawn(Self::run_read_loop(reader, serial, chunk_tx)));

            tracing::info!(port = self.config.port, "connected to serial port");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(task) = self.read_task.take() {
                task.abort();
            }
            if self.writer.take().is_some() {
                tracing::info!(port = self.config.port, "disconnected from serial port");
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let writer = self.writer.clone();
        Box::pin(async move {
            let writer = writer.ok_or(Error::NotConnected)?;
            let mut writer = writer.lock().await;

            tracing::trace!("sending {} bytes", data.len());

            writer.write_all(&data).await.map_err(Error::Io)?;
            writer.flush().await.map_err(Error::Io)?;

            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

/// Opens [`SerialTransport`]s for discovered devices.
#[derive(Debug, Clone, Default)]
pub struct SerialTransportFactory {
    baud_rate: Option<u32>,
}

impl SerialTransportFactory {
    /// Creates a factory using the default baud rate.
    #[must_use]
    pub const fn new() -> Self {
        Self { baud_rate: None }
    }

    /// Overrides the baud rate for all opened transports.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = Some(rate);
        self
    }
}

impl TransportFactory for SerialTransportFactory {
    fn open(
        &self,
        id: &DeviceId,
        chunk_tx: mpsc::Sender<RawChunk>,
    ) -> Result<Box<dyn Transport>> {
        let mut config = SerialConfig::new(&id.port);
        if let Some(rate) = self.baud_rate {
            config = config.baud_rate(rate);
        }
        Ok(Box::new(SerialTransport::new(config, &id.serial, chunk_tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(9600)
            .connection_delay(Duration::from_secs(1));
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
    }
}
