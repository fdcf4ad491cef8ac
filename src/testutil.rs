//! Shared mocks for unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::mux::Device;
use crate::transport::{DeviceLister, RawChunk, Transport, TransportFactory};
use crate::types::DeviceId;

/// Builds a device id for tests.
pub fn device_id(serial: &str) -> DeviceId {
    DeviceId {
        vendor_id: "1234".into(),
        product_id: "5678".into(),
        serial: serial.into(),
        dedupe_index: 0,
        port: format!("/dev/tty{serial}"),
    }
}

/// Transport that records everything sent to it.
pub struct MockTransport {
    pub sent: Arc<Mutex<Vec<Bytes>>>,
    connected: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            connected: true,
        }
    }

    pub fn with_log(sent: Arc<Mutex<Vec<Bytes>>>) -> Self {
        Self {
            sent,
            connected: true,
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.connected = true;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.connected = false;
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let sent = Arc::clone(&self.sent);
        Box::pin(async move {
            sent.lock().unwrap().push(data);
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Builds a roster device backed by a mock transport.
pub fn mock_device(serial: &str) -> Device {
    Device::new(device_id(serial), Box::new(MockTransport::new()))
}

/// Lister returning a fixed set of devices.
pub struct MockLister {
    pub devices: Vec<DeviceId>,
}

impl DeviceLister for MockLister {
    fn list(&mut self) -> Result<Vec<DeviceId>> {
        Ok(self.devices.clone())
    }
}

/// Factory opening mock transports, with all sends logged per serial.
#[derive(Default)]
pub struct MockFactory {
    pub sent: Arc<Mutex<HashMap<String, Arc<Mutex<Vec<Bytes>>>>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent to one device so far, as strings where possible.
    pub fn sent_to(&self, serial: &str) -> Vec<Bytes> {
        self.sent
            .lock()
            .unwrap()
            .get(serial)
            .map(|log| log.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Shared handle to the send logs for use after the factory moves
    /// into the engine.
    pub fn log_handle(&self) -> Arc<Mutex<HashMap<String, Arc<Mutex<Vec<Bytes>>>>>> {
        Arc::clone(&self.sent)
    }
}

/// Reads the frames sent to one device out of a shared log handle.
pub fn sent_to(
    logs: &Arc<Mutex<HashMap<String, Arc<Mutex<Vec<Bytes>>>>>>,
    serial: &str,
) -> Vec<Bytes> {
    logs.lock()
        .unwrap()
        .get(serial)
        .map(|log| log.lock().unwrap().clone())
        .unwrap_or_default()
}

impl TransportFactory for MockFactory {
    fn open(
        &self,
        id: &DeviceId,
        _chunk_tx: mpsc::Sender<RawChunk>,
    ) -> Result<Box<dyn Transport>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        self.sent
            .lock()
            .unwrap()
            .insert(id.serial.clone(), Arc::clone(&log));
        Ok(Box::new(MockTransport::with_log(log)))
    }
}
