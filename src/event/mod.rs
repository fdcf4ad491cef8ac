//! Event system for engine notifications.
//!
//! Components never call back into the UI layer directly; the engine
//! dispatches [`Event`]s through a broadcast channel and subscribers pick
//! up what they care about. Delivery order matches dispatch order within
//! the single scheduler task.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::types::{ControllerFamily, DeviceId, FieldMap};

/// Event types dispatched by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new device appeared in the lister output.
    DeviceDiscovered { id: DeviceId },
    /// A complete frame was decoded from a device.
    FrameReceived { serial: String, values: FieldMap },
    /// A pending switch committed; this device is now active.
    ActiveDeviceChanged {
        serial: String,
        family: ControllerFamily,
    },
    /// The active device connection was established.
    PortConnected { serial: String },
    /// The active device was cleared.
    PortDisconnected,
    /// A device exceeded the silence threshold.
    ConnectionLost { serial: String },
    /// A silent device delivered a frame again.
    ConnectionRestored { serial: String },
    /// The active device went silent; the UI should offer a reconnect.
    ReconnectPrompt { serial: String },
    /// The active device reported flash mode.
    FlashModeEntered { serial: String },
    /// A firmware chunk was acknowledged.
    FirmwareProgress { sent: usize, total: usize },
    /// The firmware transfer completed.
    FirmwareFinished,
    /// The firmware transfer was aborted.
    FirmwareFailed { reason: String },
    /// A capture interval elapsed.
    CaptureTick {
        serial: String,
        device_resident: bool,
    },
    /// A capture was started on a channel.
    CaptureStarted {
        serial: String,
        device_resident: bool,
    },
    /// A capture was stopped or completed its final run.
    CaptureStopped {
        serial: String,
        device_resident: bool,
    },
}

/// Discriminant used by [`EventFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DeviceDiscovered,
    FrameReceived,
    ActiveDeviceChanged,
    PortConnected,
    PortDisconnected,
    ConnectionLost,
    ConnectionRestored,
    ReconnectPrompt,
    FlashModeEntered,
    FirmwareProgress,
    FirmwareFinished,
    FirmwareFailed,
    CaptureTick,
    CaptureStarted,
    CaptureStopped,
}

impl Event {
    /// Returns the discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::DeviceDiscovered { .. } => EventKind::DeviceDiscovered,
            Self::FrameReceived { .. } => EventKind::FrameReceived,
            Self::ActiveDeviceChanged { .. } => EventKind::ActiveDeviceChanged,
            Self::PortConnected { .. } => EventKind::PortConnected,
            Self::PortDisconnected => EventKind::PortDisconnected,
            Self::ConnectionLost { .. } => EventKind::ConnectionLost,
            Self::ConnectionRestored { .. } => EventKind::ConnectionRestored,
            Self::ReconnectPrompt { .. } => EventKind::ReconnectPrompt,
            Self::FlashModeEntered { .. } => EventKind::FlashModeEntered,
            Self::FirmwareProgress { .. } => EventKind::FirmwareProgress,
            Self::FirmwareFinished => EventKind::FirmwareFinished,
            Self::FirmwareFailed { .. } => EventKind::FirmwareFailed,
            Self::CaptureTick { .. } => EventKind::CaptureTick,
            Self::CaptureStarted { .. } => EventKind::CaptureStarted,
            Self::CaptureStopped { .. } => EventKind::CaptureStopped,
        }
    }

    /// Returns the device serial carried by this event, if any.
    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::DeviceDiscovered { id } => Some(&id.serial),
            Self::FrameReceived { serial, .. }
            | Self::ActiveDeviceChanged { serial, .. }
            | Self::PortConnected { serial }
            | Self::ConnectionLost { serial }
            | Self::ConnectionRestored { serial }
            | Self::ReconnectPrompt { serial }
            | Self::FlashModeEntered { serial }
            | Self::CaptureTick { serial, .. }
            | Self::CaptureStarted { serial, .. }
            | Self::CaptureStopped { serial, .. } => Some(serial),
            Self::PortDisconnected
            | Self::FirmwareProgress { .. }
            | Self::FirmwareFinished
            | Self::FirmwareFailed { .. } => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific event kinds and devices.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to these event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Restrict to events for this device serial.
    pub serial: Option<String>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            serial: None,
        }
    }

    /// Creates a filter for one device.
    #[must_use]
    pub fn device(serial: impl Into<String>) -> Self {
        Self {
            kinds: None,
            serial: Some(serial.into()),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(ref serial) = self.serial {
            if event.serial() != Some(serial.as_str()) {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter.matches(&event) {
                            return Some(event);
                        }
                    } else {
                        return None;
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(Event::PortDisconnected);

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert!(matches!(event, Some(Event::PortDisconnected)));
    }

    #[test]
    fn test_kind_filter() {
        let filter = EventFilter::kinds(vec![EventKind::ConnectionLost]);

        assert!(filter.matches(&Event::ConnectionLost {
            serial: "A1".into()
        }));
        assert!(!filter.matches(&Event::PortDisconnected));
    }

    #[test]
    fn test_device_filter() {
        let filter = EventFilter::device("A1");

        assert!(filter.matches(&Event::ConnectionLost {
            serial: "A1".into()
        }));
        assert!(!filter.matches(&Event::ConnectionLost {
            serial: "B2".into()
        }));
        assert!(!filter.matches(&Event::FirmwareFinished));
    }
}
