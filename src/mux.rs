//! Device roster for the multiplexer.
//!
//! One [`Device`] per discovered controller, keyed by serial. Devices are
//! never removed; the health tracker marks silent ones disconnected and
//! the next frame marks them connected again.

use std::time::Duration;

use crate::protocol::FrameAccumulator;
use crate::transport::Transport;
use crate::types::{ControllerFamily, DeviceId};

/// One controller on the roster.
pub struct Device {
    /// Identity as reported by the lister.
    pub id: DeviceId,
    /// Transport handle for this device.
    pub transport: Box<dyn Transport>,
    /// Accumulates inbound text until a frame is complete.
    pub accumulator: FrameAccumulator,
    /// True while the controller reports flash mode.
    pub in_flash_mode: bool,
    /// True once a frame has been decoded and the silence threshold has
    /// not been exceeded since.
    pub connected: bool,
    /// True when the UI layer has associated an entry with this device.
    pub has_ui_entry: bool,
    /// Time since the last decoded frame.
    pub silence: Duration,
    /// Controller family, known once an identity field has been seen.
    pub family: Option<ControllerFamily>,
}

impl Device {
    /// Creates a roster entry for a discovered device.
    #[must_use]
    pub fn new(id: DeviceId, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            transport,
            accumulator: FrameAccumulator::new(),
            in_flash_mode: false,
            connected: false,
            has_ui_entry: false,
            silence: Duration::ZERO,
            family: None,
        }
    }

    /// Returns the device serial.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.id.serial
    }
}

/// The device roster.
#[derive(Default)]
pub struct Roster {
    devices: Vec<Device>,
}

impl Roster {
    /// Creates an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a device with this serial is already known.
    #[must_use]
    pub fn contains(&self, serial: &str) -> bool {
        self.devices.iter().any(|d| d.serial() == serial)
    }

    /// Adds a device. The caller checks [`Roster::contains`] first.
    pub fn add(&mut self, device: Device) {
        self.devices.push(device);
    }

    /// Looks up a device by serial.
    #[must_use]
    pub fn get(&self, serial: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.serial() == serial)
    }

    /// Looks up a device mutably by serial.
    pub fn get_mut(&mut self, serial: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.serial() == serial)
    }

    /// Iterates over all devices.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Iterates mutably over all devices.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    /// Number of devices on the roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no device has been discovered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
