//! Periodic data-capture scheduler.
//!
//! Each device has two independent capture channels: a device-resident
//! capture (mirrors the controller's own capture flag, started and
//! stopped through the update batcher so host and device state stay
//! consistent) and a host-side capture driven purely locally. The
//! scheduler advances interval and run timers every pass and reports
//! what the engine should do as [`RecordingEvent`]s.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::protocol::keys::{KEY_CAPTURE_TOGGLE, KEY_SD_MISSING, VALUE_ON};
use crate::types::FieldMap;

/// Timing policy for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Length of one run.
    pub duration: Duration,
    /// Time between captured rows.
    pub interval: Duration,
    /// Number of runs; 0 repeats without bound.
    pub repeat_count: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(3600),
            interval: Duration::from_secs(10),
            repeat_count: 0,
        }
    }
}

/// One running capture on one channel of one device.
#[derive(Debug, Clone)]
pub struct ActiveRecording {
    /// Device serial.
    pub serial: String,
    /// True for the device-resident channel.
    pub device_resident: bool,
    /// Timing policy.
    pub settings: CaptureSettings,
    /// Completed re-runs so far.
    pub repeats_done: u32,
    /// Time into the current run.
    pub elapsed_in_run: Duration,
    /// Time into the current interval.
    pub elapsed_in_interval: Duration,
    /// When the capture started.
    pub started_at: DateTime<Local>,
    /// Next row index for the export writer.
    pub row_cursor: u32,
    /// True while the device reports its storage medium missing;
    /// suppresses all timing.
    pub medium_missing: bool,
}

impl ActiveRecording {
    fn new(serial: &str, device_resident: bool, settings: CaptureSettings) -> Self {
        Self {
            serial: serial.to_owned(),
            device_resident,
            settings,
            repeats_done: 0,
            elapsed_in_run: Duration::ZERO,
            elapsed_in_interval: Duration::ZERO,
            started_at: Local::now(),
            row_cursor: 0,
            medium_missing: false,
        }
    }
}

/// Action the engine should take for a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    /// A capture was added to the schedule.
    Started { serial: String, device_resident: bool },
    /// A capture was removed from the schedule.
    Stopped { serial: String, device_resident: bool },
    /// A capture interval elapsed; resident captures just notify, host
    /// captures export row `row`.
    IntervalElapsed {
        serial: String,
        device_resident: bool,
        row: u32,
    },
    /// A host capture finished its final run and was removed.
    RunCompleted { serial: String },
}

/// Schedules all active captures.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    recordings: Vec<ActiveRecording>,
    // Requested resident-capture state awaiting the controller's echo;
    // contrary device reports are ignored until it resolves.
    pending_toggle: Option<(String, bool)>,
}

impl RecordingScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the capture on the given channel, if running.
    #[must_use]
    pub fn get(&self, serial: &str, device_resident: bool) -> Option<&ActiveRecording> {
        self.recordings
            .iter()
            .find(|r| r.serial == serial && r.device_resident == device_resident)
    }

    /// All running captures.
    #[must_use]
    pub fn recordings(&self) -> &[ActiveRecording] {
        &self.recordings
    }

    /// Starts a capture; at most one per (device, channel) pair.
    pub fn start(
        &mut self,
        serial: &str,
        device_resident: bool,
        settings: CaptureSettings,
    ) -> Option<RecordingEvent> {
        if self.get(serial, device_resident).is_some() {
            return None;
        }

        tracing::debug!(serial, device_resident, "capture started");
        self.recordings
            .push(ActiveRecording::new(serial, device_resident, settings));
        Some(RecordingEvent::Started {
            serial: serial.to_owned(),
            device_resident,
        })
    }

    /// Stops a capture.
    pub fn stop(&mut self, serial: &str, device_resident: bool) -> Option<RecordingEvent> {
        let before = self.recordings.len();
        self.recordings
            .retain(|r| !(r.serial == serial && r.device_resident == device_resident));

        if self.recordings.len() == before {
            return None;
        }

        tracing::debug!(serial, device_resident, "capture stopped");
        Some(RecordingEvent::Stopped {
            serial: serial.to_owned(),
            device_resident,
        })
    }

    /// Records a resident-capture request sent to the controller.
    ///
    /// The local schedule changes immediately; the controller's own flag
    /// converges through the batcher, and contrary reports are ignored
    /// until the echo arrives.
    pub fn request_resident(
        &mut self,
        serial: &str,
        on: bool,
        settings: CaptureSettings,
    ) -> Option<RecordingEvent> {
        self.pending_toggle = Some((serial.to_owned(), on));

        if on {
            self.start(serial, true, settings)
        } else {
            self.stop(serial, true)
        }
    }

    /// Processes a decoded frame for capture state.
    pub fn on_frame(
        &mut self,
        serial: &str,
        values: &FieldMap,
        defaults: CaptureSettings,
    ) -> Vec<RecordingEvent> {
        let mut events = Vec::new();

        if let Some(reported) = values.get(KEY_CAPTURE_TOGGLE) {
            let reported_on = reported == VALUE_ON;

            let blocked = match &self.pending_toggle {
                Some((pending_serial, requested)) if pending_serial == serial => {
                    if *requested == reported_on {
                        // Echo arrived; the handshake is complete.
                        self.pending_toggle = None;
                        true
                    } else {
                        // Stale report from before the request; ignore.
                        true
                    }
                }
                _ => false,
            };

            if !blocked {
                let event = if reported_on {
                    self.start(serial, true, defaults)
                } else {
                    self.stop(serial, true)
                };
                events.extend(event);
            }
        }

        if let Some(recording) = self
            .recordings
            .iter_mut()
            .find(|r| r.serial == serial && r.device_resident)
        {
            let missing = values
                .get(KEY_SD_MISSING)
                .is_some_and(|v| v == VALUE_ON);

            recording.medium_missing = missing;
            if missing {
                recording.elapsed_in_interval = Duration::ZERO;
            }
        }

        events
    }

    /// Advances all capture timers by `dt`.
    pub fn tick(&mut self, dt: Duration) -> Vec<RecordingEvent> {
        let mut events = Vec::new();

        for recording in &mut self.recordings {
            if recording.medium_missing {
                continue;
            }
            recording.elapsed_in_run += dt;
            recording.elapsed_in_interval += dt;
        }

        // Host captures whose run elapsed either start the next repeat or
        // finish for good; resident captures run until stopped.
        self.recordings.retain_mut(|recording| {
            if recording.device_resident
                || recording.elapsed_in_run < recording.settings.duration
            {
                return true;
            }

            let repeats_left = recording.settings.repeat_count == 0
                || recording.repeats_done < recording.settings.repeat_count - 1;

            if repeats_left {
                recording.elapsed_in_run = Duration::ZERO;
                recording.elapsed_in_interval = Duration::ZERO;
                recording.repeats_done += 1;
                return true;
            }

            tracing::debug!(serial = recording.serial, "capture run completed");
            events.push(RecordingEvent::RunCompleted {
                serial: recording.serial.clone(),
            });
            false
        });

        for recording in &mut self.recordings {
            if recording.medium_missing
                || recording.elapsed_in_interval < recording.settings.interval
            {
                continue;
            }

            recording.elapsed_in_interval = Duration::ZERO;
            events.push(RecordingEvent::IntervalElapsed {
                serial: recording.serial.clone(),
                device_resident: recording.device_resident,
                row: recording.row_cursor,
            });
            recording.row_cursor += 1;
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(duration: u64, interval: u64, repeat_count: u32) -> CaptureSettings {
        CaptureSettings {
            duration: Duration::from_secs(duration),
            interval: Duration::from_secs(interval),
            repeat_count,
        }
    }

    fn frame(entries: &[(&str, &str)]) -> FieldMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_one_capture_per_channel() {
        let mut scheduler = RecordingScheduler::new();
        assert!(scheduler.start("A1", false, settings(10, 1, 0)).is_some());
        assert!(scheduler.start("A1", false, settings(10, 1, 0)).is_none());
        // The other channel is independent.
        assert!(scheduler.start("A1", true, settings(10, 1, 0)).is_some());
        assert_eq!(scheduler.recordings().len(), 2);
    }

    #[test]
    fn test_interval_flush_resets_and_counts_rows() {
        let mut scheduler = RecordingScheduler::new();
        scheduler.start("A1", false, settings(3600, 10, 0));

        assert!(scheduler.tick(Duration::from_secs(9)).is_empty());
        let events = scheduler.tick(Duration::from_secs(1));
        assert_eq!(
            events,
            vec![RecordingEvent::IntervalElapsed {
                serial: "A1".into(),
                device_resident: false,
                row: 0,
            }]
        );

        let events = scheduler.tick(Duration::from_secs(10));
        assert_eq!(
            events,
            vec![RecordingEvent::IntervalElapsed {
                serial: "A1".into(),
                device_resident: false,
                row: 1,
            }]
        );
    }

    #[test]
    fn test_repeat_budget_completes_three_runs() {
        let mut scheduler = RecordingScheduler::new();
        scheduler.start("A1", false, settings(10, 100, 3));

        // Two completed runs reset the timers and keep going.
        for done in 1..=2 {
            let events = scheduler.tick(Duration::from_secs(10));
            assert!(events.is_empty(), "run {done} should repeat");
            assert_eq!(scheduler.get("A1", false).unwrap().repeats_done, done);
        }

        // The third completion removes the capture.
        let events = scheduler.tick(Duration::from_secs(10));
        assert_eq!(
            events,
            vec![RecordingEvent::RunCompleted {
                serial: "A1".into()
            }]
        );
        assert!(scheduler.get("A1", false).is_none());
    }

    #[test]
    fn test_zero_repeat_budget_runs_forever() {
        let mut scheduler = RecordingScheduler::new();
        scheduler.start("A1", false, settings(10, 100, 0));

        for _ in 0..20 {
            let events = scheduler.tick(Duration::from_secs(10));
            assert!(events.is_empty());
        }
        assert!(scheduler.get("A1", false).is_some());
    }

    #[test]
    fn test_resident_capture_mirrors_device_report() {
        let mut scheduler = RecordingScheduler::new();

        let events = scheduler.on_frame("A1", &frame(&[("ZPLJ", "1.00")]), settings(10, 1, 0));
        assert_eq!(
            events,
            vec![RecordingEvent::Started {
                serial: "A1".into(),
                device_resident: true,
            }]
        );

        let events = scheduler.on_frame("A1", &frame(&[("ZPLJ", "0.00")]), settings(10, 1, 0));
        assert_eq!(
            events,
            vec![RecordingEvent::Stopped {
                serial: "A1".into(),
                device_resident: true,
            }]
        );
    }

    #[test]
    fn test_resident_handshake_ignores_stale_reports() {
        let mut scheduler = RecordingScheduler::new();
        scheduler.request_resident("A1", true, settings(10, 1, 0));
        assert!(scheduler.get("A1", true).is_some());

        // The controller still reports the old state; ignored.
        let events = scheduler.on_frame("A1", &frame(&[("ZPLJ", "0.00")]), settings(10, 1, 0));
        assert!(events.is_empty());
        assert!(scheduler.get("A1", true).is_some());

        // The echo resolves the handshake; later reports apply again.
        scheduler.on_frame("A1", &frame(&[("ZPLJ", "1.00")]), settings(10, 1, 0));
        let events = scheduler.on_frame("A1", &frame(&[("ZPLJ", "0.00")]), settings(10, 1, 0));
        assert_eq!(events.len(), 1);
        assert!(scheduler.get("A1", true).is_none());
    }

    #[test]
    fn test_missing_medium_suppresses_timing() {
        let mut scheduler = RecordingScheduler::new();
        scheduler.start("A1", true, settings(10, 5, 0));

        scheduler.on_frame("A1", &frame(&[("SDNM", "1.00")]), settings(10, 5, 0));
        for _ in 0..10 {
            assert!(scheduler.tick(Duration::from_secs(5)).is_empty());
        }

        scheduler.on_frame("A1", &frame(&[("SDNM", "0.00")]), settings(10, 5, 0));
        let events = scheduler.tick(Duration::from_secs(5));
        assert_eq!(events.len(), 1);
    }
}
