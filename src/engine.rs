//! The top-level communication engine.
//!
//! [`Engine`] owns all shared state (roster, value store, pending writes,
//! captures, firmware transfer) and advances it from a single cooperative
//! scheduler: [`Engine::tick`] is called once per pass, inbound transport
//! chunks are fed through [`Engine::ingest_raw`], and [`Engine::run`]
//! drives both from a tokio interval. Components never touch each other
//! directly; everything fans out through the event dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::export::{self, ExportSink, ExportSpec, LoggedError};
use crate::firmware::{FirmwareOp, FirmwareUpdater, Phase};
use crate::health::{CONNECTION_LOST, HealthEvent, HealthTracker};
use crate::mux::{Device, Roster};
use crate::protocol::codec::{self, KEEPALIVE_FRAME};
use crate::protocol::keys::{
    FLASH_READY_FRAGMENT, KEY_CAPTURE_TOGGLE, KEY_CONTROLLER_ID, KEY_FIRMWARE_VERSION,
    KEY_FLASH_HPC, KEY_FLASH_TPC, VALUE_OFF, VALUE_ON,
};
use crate::recording::{CaptureSettings, RecordingEvent, RecordingScheduler};
use crate::store::ValueStore;
use crate::transport::{DeviceLister, RawChunk, TransportFactory};
use crate::types::{ControllerFamily, FieldMap};
use crate::updates::UpdateBatcher;

/// Timing configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Device lister poll interval.
    pub discovery_interval: Duration,
    /// Keepalive/update send interval.
    pub send_interval: Duration,
    /// Silence threshold before a device counts as disconnected.
    pub silence_timeout: Duration,
    /// Firmware stall timeout.
    pub firmware_stall_timeout: Duration,
    /// Scheduler pass interval used by [`Engine::run`].
    pub tick_interval: Duration,
    /// Timing defaults for captures mirrored from a device report.
    pub capture_defaults: CaptureSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(2),
            send_interval: Duration::from_secs(5),
            silence_timeout: Duration::from_secs(10),
            firmware_stall_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(100),
            capture_defaults: CaptureSettings::default(),
        }
    }
}

/// Requests a clean engine stop, observed at the next scheduler pass.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Signals the engine to stop.
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Communication engine for TPC300/HPC100 controllers.
pub struct Engine {
    lister: Box<dyn DeviceLister>,
    factory: Box<dyn TransportFactory>,
    export_sink: Option<Box<dyn ExportSink>>,
    export_spec_tpc: ExportSpec,
    export_spec_hpc: ExportSpec,

    roster: Roster,
    store: ValueStore,
    batcher: UpdateBatcher,
    health: HealthTracker,
    firmware: FirmwareUpdater,
    recording: RecordingScheduler,
    dispatcher: EventDispatcher,
    errors: Vec<LoggedError>,

    active: Option<String>,
    active_family: ControllerFamily,
    pending_switch: Option<String>,

    config: EngineConfig,
    discovery_elapsed: Duration,
    send_elapsed: Duration,

    chunk_tx: mpsc::Sender<RawChunk>,
    chunk_rx: Option<mpsc::Receiver<RawChunk>>,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Creates an engine with default configuration.
    #[must_use]
    pub fn new(
        lister: impl DeviceLister + 'static,
        factory: impl TransportFactory + 'static,
    ) -> Self {
        Self::with_config(lister, factory, EngineConfig::default())
    }

    /// Creates an engine with custom configuration.
    #[must_use]
    pub fn with_config(
        lister: impl DeviceLister + 'static,
        factory: impl TransportFactory + 'static,
        config: EngineConfig,
    ) -> Self {
        let (chunk_tx, chunk_rx) = mpsc::channel(256);
        let mut firmware = FirmwareUpdater::new();
        firmware.set_stall_timeout(config.firmware_stall_timeout);

        Self {
            lister: Box::new(lister),
            factory: Box::new(factory),
            export_sink: None,
            export_spec_tpc: ExportSpec::tpc300_default(),
            export_spec_hpc: ExportSpec::hpc100_default(),
            roster: Roster::new(),
            store: ValueStore::new(),
            batcher: UpdateBatcher::new(),
            health: HealthTracker::new(config.silence_timeout),
            firmware,
            recording: RecordingScheduler::new(),
            dispatcher: EventDispatcher::new(256),
            errors: Vec::new(),
            active: None,
            active_family: ControllerFamily::default(),
            pending_switch: None,
            // Poll the lister on the very first pass.
            discovery_elapsed: config.discovery_interval,
            send_elapsed: Duration::ZERO,
            config,
            chunk_tx,
            chunk_rx: Some(chunk_rx),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates an engine backed by the system serial ports.
    #[must_use]
    pub fn serial() -> Self {
        Self::new(
            crate::transport::SerialDeviceLister::new(),
            crate::transport::SerialTransportFactory::new(),
        )
    }

    /// Subscribes to engine events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Returns a clone of the event dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> EventDispatcher {
        self.dispatcher.clone()
    }

    /// Returns a handle that stops [`Engine::run`].
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Installs the export collaborator for host-side captures.
    pub fn set_export_sink(&mut self, sink: Box<dyn ExportSink>) {
        self.export_sink = Some(sink);
    }

    /// Replaces the export columns for one controller family.
    pub fn set_export_spec(&mut self, family: ControllerFamily, spec: ExportSpec) {
        match family {
            ControllerFamily::Tpc300 => self.export_spec_tpc = spec,
            ControllerFamily::Hpc100 => self.export_spec_hpc = spec,
        }
    }

    /// Returns the value store.
    #[must_use]
    pub const fn store(&self) -> &ValueStore {
        &self.store
    }

    /// Serial of the active device, if one is selected.
    #[must_use]
    pub fn active_serial(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Family of the active device.
    #[must_use]
    pub const fn active_family(&self) -> ControllerFamily {
        self.active_family
    }

    /// Current firmware transfer phase.
    #[must_use]
    pub const fn firmware_phase(&self) -> Phase {
        self.firmware.phase()
    }

    /// Associates a UI entry with a device, enabling its health timer.
    pub fn set_ui_association(&mut self, serial: &str, associated: bool) -> Result<()> {
        let device = self
            .roster
            .get_mut(serial)
            .ok_or_else(|| Error::UnknownDevice {
                serial: serial.to_owned(),
            })?;
        device.has_ui_entry = associated;
        Ok(())
    }

    /// Requests a switch to another device.
    ///
    /// The switch commits only when the next frame from that device
    /// arrives, so the store is never populated from a device that never
    /// answered.
    pub fn request_switch(&mut self, serial: &str) -> Result<()> {
        if self.active.as_deref() == Some(serial) {
            return Ok(());
        }
        if !self.roster.contains(serial) {
            return Err(Error::UnknownDevice {
                serial: serial.to_owned(),
            });
        }

        tracing::debug!(serial, "switch requested");
        self.pending_switch = Some(serial.to_owned());
        Ok(())
    }

    /// Cancels a pending switch and clears the active device.
    pub fn cancel_switch(&mut self) {
        self.pending_switch = None;
        if self.active.take().is_some() {
            self.dispatcher.dispatch(Event::PortDisconnected);
        }
    }

    /// Queues a field write to the active device.
    pub fn request_write(&mut self, field: &str, value: &str) {
        let confirmed = self.store.active().get(field).cloned();
        self.batcher.request_write(field, value, confirmed.as_deref());
    }

    /// Enables or disables the periodic sender.
    pub fn set_sending_enabled(&mut self, enabled: bool) {
        self.batcher.set_enabled(enabled);
    }

    /// Starts a host-side capture for the active device.
    pub fn start_host_capture(&mut self, settings: CaptureSettings) -> Result<()> {
        let serial = self.active.clone().ok_or(Error::NoActiveDevice)?;
        let events: Vec<_> = self.recording.start(&serial, false, settings).into_iter().collect();
        self.handle_recording_events(events);
        Ok(())
    }

    /// Stops the host-side capture of the active device.
    pub fn stop_host_capture(&mut self) -> Result<()> {
        let serial = self.active.clone().ok_or(Error::NoActiveDevice)?;
        let events: Vec<_> = self.recording.stop(&serial, false).into_iter().collect();
        self.handle_recording_events(events);
        Ok(())
    }

    /// Starts the device-resident capture of the active device.
    ///
    /// The controller's own capture flag is written through the batcher;
    /// local state converges on the echo.
    pub fn start_resident_capture(&mut self, settings: CaptureSettings) -> Result<()> {
        self.toggle_resident_capture(true, settings)
    }

    /// Stops the device-resident capture of the active device.
    pub fn stop_resident_capture(&mut self) -> Result<()> {
        self.toggle_resident_capture(false, CaptureSettings::default())
    }

    fn toggle_resident_capture(&mut self, on: bool, settings: CaptureSettings) -> Result<()> {
        let serial = self.active.clone().ok_or(Error::NoActiveDevice)?;

        let value = if on { VALUE_ON } else { VALUE_OFF };
        let confirmed = self.store.active().get(KEY_CAPTURE_TOGGLE).cloned();
        self.batcher
            .request_write(KEY_CAPTURE_TOGGLE, value, confirmed.as_deref());

        let events: Vec<_> = self
            .recording
            .request_resident(&serial, on, settings)
            .into_iter()
            .collect();
        self.handle_recording_events(events);
        Ok(())
    }

    /// Starts a firmware transfer from an image file.
    ///
    /// A missing or unreadable file aborts before any device interaction.
    pub async fn start_firmware_update(&mut self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let path = path.as_ref();
        let image = tokio::fs::read(path).await.map_err(|e| {
            tracing::error!(path = %path.display(), "firmware image unreadable: {}", e);
            Error::FirmwareImage {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        self.start_firmware_transfer(Bytes::from(image)).await
    }

    /// Starts a firmware transfer with an image already in memory.
    pub async fn start_firmware_transfer(&mut self, image: Bytes) -> Result<()> {
        let serial = self.active.clone().ok_or(Error::NoActiveDevice)?;
        let in_flash = self
            .roster
            .get(&serial)
            .is_some_and(|device| device.in_flash_mode);

        let ops = self.firmware.start(image, in_flash)?;
        self.apply_firmware_ops(ops).await;
        Ok(())
    }

    /// Cancels a running firmware transfer.
    pub async fn cancel_firmware_update(&mut self) {
        let ops = self.firmware.cancel();
        self.apply_firmware_ops(ops).await;
    }

    /// Feeds one raw text chunk received from a device.
    pub async fn ingest_raw(&mut self, serial: &str, text: &str) {
        // Firmware flow control rides on raw transport events of the
        // active device, outside the frame pipeline.
        if self.firmware.in_progress() && self.active.as_deref() == Some(serial) {
            let ops = self.firmware.on_transport_text(text);
            self.apply_firmware_ops(ops).await;
        }

        let Some(device) = self.roster.get_mut(serial) else {
            tracing::warn!(serial, "data from device not on the roster");
            return;
        };

        let Some(frame) = device.accumulator.feed(text) else {
            return;
        };

        let values = codec::decode(&frame);

        let was_flash = device.in_flash_mode;
        device.in_flash_mode = frame.contains(FLASH_READY_FRAGMENT);
        let flash_entered = !was_flash && device.in_flash_mode;

        if let Some(id) = values.get(KEY_CONTROLLER_ID).filter(|id| !id.is_empty()) {
            device.family = Some(ControllerFamily::from_controller_id(id));
        }

        let restored = HealthTracker::on_frame(device);

        self.store.set_for_device(serial, values.clone());

        if let Some(HealthEvent::Restored { serial: restored }) = restored {
            self.errors
                .retain(|e| !(e.serial == restored && e.code == CONNECTION_LOST));
            self.dispatcher
                .dispatch(Event::ConnectionRestored { serial: restored });
        }

        if flash_entered {
            self.dispatcher.dispatch(Event::FlashModeEntered {
                serial: serial.to_owned(),
            });
        }

        if self.pending_switch.as_deref() == Some(serial) {
            self.commit_switch(serial, &values);
        }

        if self.active.as_deref() == Some(serial) {
            self.store.set_active(values.clone());
            self.batcher.confirm(&values);

            if self.firmware.phase() == Phase::AwaitingCompletion {
                let version = values
                    .get(KEY_FIRMWARE_VERSION)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_owned());
                let ops = self.firmware.on_version_report(&version);
                self.apply_firmware_ops(ops).await;
            }
        }

        let capture_events =
            self.recording
                .on_frame(serial, &values, self.config.capture_defaults);
        self.handle_recording_events(capture_events);

        self.dispatcher.dispatch(Event::FrameReceived {
            serial: serial.to_owned(),
            values,
        });
    }

    /// Commits a pending switch on the first frame from its target.
    fn commit_switch(&mut self, serial: &str, values: &FieldMap) {
        self.pending_switch = None;
        self.active = Some(serial.to_owned());

        let family = match values.get(KEY_CONTROLLER_ID) {
            Some(id) if !id.is_empty() => ControllerFamily::from_controller_id(id),
            _ => ControllerFamily::default(),
        };
        self.active_family = family;

        // Flash mode is spelled differently per family.
        let in_flash = match family {
            ControllerFamily::Hpc100 => values.get(KEY_FLASH_HPC).is_some_and(|v| v == VALUE_ON),
            ControllerFamily::Tpc300 => values.get(KEY_FLASH_TPC).is_some_and(|v| v == "rdy"),
        };
        if let Some(device) = self.roster.get_mut(serial) {
            device.in_flash_mode = in_flash;
        }

        tracing::info!(serial, %family, "active device switched");
        self.dispatcher.dispatch(Event::PortConnected {
            serial: serial.to_owned(),
        });
        self.dispatcher.dispatch(Event::ActiveDeviceChanged {
            serial: serial.to_owned(),
            family,
        });
    }

    /// Advances the engine by one scheduler pass.
    pub async fn tick(&mut self, dt: Duration) {
        self.discovery_elapsed += dt;
        if self.discovery_elapsed >= self.config.discovery_interval {
            self.discovery_elapsed = Duration::ZERO;
            self.discover().await;
        }

        let health_events = self.health.tick(self.roster.iter_mut(), dt);
        for event in health_events {
            let HealthEvent::Lost { serial } = event else {
                continue;
            };
            self.errors.push(LoggedError {
                serial: serial.clone(),
                code: CONNECTION_LOST.to_owned(),
            });
            self.dispatcher.dispatch(Event::ConnectionLost {
                serial: serial.clone(),
            });
            if self.active.as_deref() == Some(serial.as_str()) {
                self.dispatcher.dispatch(Event::ReconnectPrompt { serial });
            }
        }

        let ops = self.firmware.tick(dt);
        self.apply_firmware_ops(ops).await;

        self.send_elapsed += dt;
        if self.send_elapsed >= self.config.send_interval {
            self.send_elapsed = Duration::ZERO;
            self.send_updates().await;
        }

        let capture_events = self.recording.tick(dt);
        self.handle_recording_events(capture_events);
    }

    /// Runs the engine until shut down.
    ///
    /// Drives [`Engine::tick`] from an interval and feeds inbound chunks
    /// as they arrive; both are cooperative on the same task.
    pub async fn run(&mut self) -> Result<()> {
        let Some(mut chunk_rx) = self.chunk_rx.take() else {
            return Err(Error::ChannelClosed);
        };

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        let mut last = tokio::time::Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                maybe = chunk_rx.recv() => {
                    match maybe {
                        Some(chunk) => self.ingest_raw(&chunk.serial, &chunk.text).await,
                        None => break,
                    }
                }
                instant = ticker.tick() => {
                    let dt = instant.duration_since(last);
                    last = instant;
                    self.tick(dt).await;
                }
            }
        }

        self.chunk_rx = Some(chunk_rx);
        Ok(())
    }

    /// Polls the lister and spawns transports for new devices.
    async fn discover(&mut self) {
        let listed = match self.lister.list() {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!("device listing failed: {}", e);
                return;
            }
        };

        for id in listed {
            if self.roster.contains(&id.serial) {
                continue;
            }

            let mut transport = match self.factory.open(&id, self.chunk_tx.clone()) {
                Ok(transport) => transport,
                Err(e) => {
                    tracing::warn!(serial = id.serial, "failed to open transport: {}", e);
                    continue;
                }
            };

            // Left off the roster on failure; retried at the next poll.
            if let Err(e) = transport.connect().await {
                tracing::warn!(serial = id.serial, "failed to connect: {}", e);
                continue;
            }

            tracing::info!(serial = id.serial, "device discovered");
            self.dispatcher
                .dispatch(Event::DeviceDiscovered { id: id.clone() });
            self.roster.add(Device::new(id, transport));
        }
    }

    /// Sends one frame per device: pending writes to the active device,
    /// the keepalive to everyone else (and to an idle active device).
    async fn send_updates(&mut self) {
        if !self.batcher.enabled() {
            return;
        }

        let active = self.active.clone();
        let update_frame = self.batcher.frame();

        for device in self.roster.iter_mut() {
            if device.in_flash_mode {
                continue;
            }

            let is_active = active.as_deref() == Some(device.serial());
            let payload = if is_active {
                update_frame
                    .clone()
                    .unwrap_or_else(|| KEEPALIVE_FRAME.to_owned())
            } else {
                KEEPALIVE_FRAME.to_owned()
            };

            if let Err(e) = device.transport.send(Bytes::from(payload)).await {
                tracing::warn!(serial = device.serial(), "send failed: {}", e);
            }
        }
    }

    fn handle_recording_events(&mut self, events: Vec<RecordingEvent>) {
        for event in events {
            match event {
                RecordingEvent::Started {
                    serial,
                    device_resident,
                } => {
                    self.dispatcher.dispatch(Event::CaptureStarted {
                        serial,
                        device_resident,
                    });
                }
                RecordingEvent::Stopped {
                    serial,
                    device_resident,
                } => {
                    self.dispatcher.dispatch(Event::CaptureStopped {
                        serial,
                        device_resident,
                    });
                }
                RecordingEvent::RunCompleted { serial } => {
                    self.dispatcher.dispatch(Event::CaptureStopped {
                        serial,
                        device_resident: false,
                    });
                }
                RecordingEvent::IntervalElapsed {
                    serial,
                    device_resident: true,
                    ..
                } => {
                    self.dispatcher.dispatch(Event::CaptureTick {
                        serial,
                        device_resident: true,
                    });
                }
                RecordingEvent::IntervalElapsed {
                    serial,
                    device_resident: false,
                    row,
                } => {
                    self.flush_host_capture(&serial, row);
                    self.dispatcher.dispatch(Event::CaptureTick {
                        serial,
                        device_resident: false,
                    });
                }
            }
        }
    }

    /// Hands one export row plus the accumulated error log to the sink.
    fn flush_host_capture(&mut self, serial: &str, row: u32) {
        let family = self
            .roster
            .get(serial)
            .and_then(|device| device.family)
            .unwrap_or_default();
        let spec = match family {
            ControllerFamily::Tpc300 => &self.export_spec_tpc,
            ControllerFamily::Hpc100 => &self.export_spec_hpc,
        };

        let export_row = export::build_row(spec, &self.store, serial, row);

        if let Some(sink) = self.export_sink.as_mut() {
            if let Err(e) = sink.write_row(serial, &export_row, &self.errors) {
                tracing::error!(serial, "export failed: {}", e);
            }
        }

        self.errors.clear();
    }

    async fn apply_firmware_ops(&mut self, ops: Vec<FirmwareOp>) {
        for op in ops {
            match op {
                FirmwareOp::RequestFlashMode => {
                    let confirmed = self.store.active().get(KEY_FLASH_HPC).cloned();
                    self.batcher
                        .request_write(KEY_FLASH_HPC, VALUE_ON, confirmed.as_deref());
                }
                FirmwareOp::SuspendUpdates => self.batcher.set_enabled(false),
                FirmwareOp::ResumeUpdates => self.batcher.set_enabled(true),
                FirmwareOp::Write(bytes) => {
                    let result = match self.active.clone() {
                        Some(serial) => match self.roster.get_mut(&serial) {
                            Some(device) => device.transport.send(bytes).await,
                            None => Err(Error::UnknownDevice { serial }),
                        },
                        None => Err(Error::NoActiveDevice),
                    };

                    if let Err(e) = result {
                        tracing::error!("firmware write failed: {}", e);
                        self.firmware.cancel();
                        self.batcher.set_enabled(true);
                        self.dispatcher.dispatch(Event::FirmwareFailed {
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
                FirmwareOp::Progress { sent, total } => {
                    self.dispatcher
                        .dispatch(Event::FirmwareProgress { sent, total });
                }
                FirmwareOp::Finished => self.dispatcher.dispatch(Event::FirmwareFinished),
                FirmwareOp::Failed { reason } => {
                    self.dispatcher.dispatch(Event::FirmwareFailed { reason });
                }
            }
        }
    }
}
