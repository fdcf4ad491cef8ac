//! Per-device connection watchdog.
//!
//! Every decoded frame resets a device's silence timer; each scheduler
//! pass advances it. A device that stays silent past the threshold is
//! marked disconnected and a device-scoped "connection lost" condition is
//! raised exactly once. Recovery needs no handshake: the next decoded
//! frame clears the condition.

use std::time::Duration;

use crate::mux::Device;

/// Default silence threshold before a device counts as disconnected.
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error code raised when a device goes silent.
pub const CONNECTION_LOST: &str = "ConnectionLost";

/// State change produced by a health pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// The device exceeded the silence threshold.
    Lost { serial: String },
    /// A previously silent device delivered a frame again.
    Restored { serial: String },
}

/// Watchdog over the device roster.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    timeout: Duration,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_TIMEOUT)
    }
}

impl HealthTracker {
    /// Creates a tracker with the given silence threshold.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Advances all silence timers by `dt`.
    ///
    /// Only devices with a UI association, not in flash mode, and
    /// currently connected are timed: flash-mode devices intentionally
    /// suppress normal traffic during a firmware transfer.
    pub fn tick<'a, I>(&self, devices: I, dt: Duration) -> Vec<HealthEvent>
    where
        I: Iterator<Item = &'a mut Device>,
    {
        let mut events = Vec::new();

        for device in devices {
            if !device.has_ui_entry || device.in_flash_mode || !device.connected {
                continue;
            }

            device.silence += dt;

            if device.silence > self.timeout {
                device.connected = false;
                tracing::error!(serial = device.serial(), "connection lost");
                events.push(HealthEvent::Lost {
                    serial: device.serial().to_owned(),
                });
            }
        }

        events
    }

    /// Records a decoded frame for a device.
    ///
    /// Returns `Restored` when the device was previously disconnected.
    pub fn on_frame(device: &mut Device) -> Option<HealthEvent> {
        device.silence = Duration::ZERO;

        if device.connected {
            return None;
        }

        device.connected = true;
        tracing::debug!(serial = device.serial(), "connection restored");
        Some(HealthEvent::Restored {
            serial: device.serial().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::mock_device;

    #[test]
    fn test_timeout_fires_exactly_once() {
        let tracker = HealthTracker::default();
        let mut device = mock_device("A1");
        device.has_ui_entry = true;
        device.connected = true;

        let mut devices = vec![device];

        // 10s of silence: still within the threshold.
        for _ in 0..10 {
            let events = tracker.tick(devices.iter_mut(), Duration::from_secs(1));
            assert!(events.is_empty());
        }

        // The pass that crosses the threshold raises the condition once.
        let events = tracker.tick(devices.iter_mut(), Duration::from_secs(1));
        assert_eq!(
            events,
            vec![HealthEvent::Lost {
                serial: "A1".into()
            }]
        );

        // A disconnected device is no longer timed.
        let events = tracker.tick(devices.iter_mut(), Duration::from_secs(1));
        assert!(events.is_empty());
    }

    #[test]
    fn test_frame_restores_connection() {
        let tracker = HealthTracker::default();
        let mut device = mock_device("A1");
        device.has_ui_entry = true;
        device.connected = true;

        let mut devices = vec![device];
        let events = tracker.tick(devices.iter_mut(), Duration::from_secs(11));
        assert_eq!(events.len(), 1);

        let restored = HealthTracker::on_frame(&mut devices[0]);
        assert_eq!(
            restored,
            Some(HealthEvent::Restored {
                serial: "A1".into()
            })
        );
        assert!(devices[0].connected);
        assert_eq!(devices[0].silence, Duration::ZERO);

        // Further frames on a healthy device report nothing.
        assert_eq!(HealthTracker::on_frame(&mut devices[0]), None);
    }

    #[test]
    fn test_flash_mode_and_unassociated_devices_exempt() {
        let tracker = HealthTracker::default();

        let mut flashing = mock_device("F1");
        flashing.has_ui_entry = true;
        flashing.connected = true;
        flashing.in_flash_mode = true;

        let mut unassociated = mock_device("U1");
        unassociated.connected = true;

        let mut devices = vec![flashing, unassociated];
        let events = tracker.tick(devices.iter_mut(), Duration::from_secs(60));
        assert!(events.is_empty());
        assert_eq!(devices[0].silence, Duration::ZERO);
    }
}
