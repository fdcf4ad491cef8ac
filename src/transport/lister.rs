//! Device enumeration.
//!
//! The engine polls a [`DeviceLister`] for currently attached devices.
//! The concrete lister wraps the platform port enumeration; tests inject
//! a mock returning a fixed roster.

use std::collections::HashMap;

use tokio_serial::SerialPortType;

use crate::error::{Error, Result};
use crate::types::DeviceId;

/// Enumerates currently attached candidate devices.
pub trait DeviceLister: Send {
    /// Returns one entry per attached device.
    fn list(&mut self) -> Result<Vec<DeviceId>>;
}

/// Lister backed by the system serial port enumeration.
///
/// Only USB ports are reported; devices without a serial number are
/// skipped. Duplicate vendor/product/serial triples get increasing
/// dedupe indices in enumeration order.
#[derive(Debug, Clone, Default)]
pub struct SerialDeviceLister;

impl SerialDeviceLister {
    /// Creates a new lister.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DeviceLister for SerialDeviceLister {
    fn list(&mut self) -> Result<Vec<DeviceId>> {
        let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
        let mut seen: HashMap<(String, String, String), u32> = HashMap::new();
        let mut devices = Vec::new();

        for port in ports {
            let SerialPortType::UsbPort(usb) = port.port_type else {
                continue;
            };

            let Some(serial) = usb.serial_number.filter(|s| !s.trim().is_empty()) else {
                continue;
            };

            let vendor_id = format!("{:04x}", usb.vid);
            let product_id = format!("{:04x}", usb.pid);

            let key = (vendor_id.clone(), product_id.clone(), serial.clone());
            let index = seen.entry(key).or_insert(0);

            devices.push(DeviceId {
                vendor_id,
                product_id,
                serial,
                dedupe_index: *index,
                port: port.port_name,
            });

            *index += 1;
        }

        Ok(devices)
    }
}
