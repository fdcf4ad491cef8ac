//! Firmware chunked-transfer protocol.
//!
//! The updater is a state machine over the raw transport events of the
//! active device. It produces [`FirmwareOp`]s; the engine performs the
//! actual IO. Exactly one transfer may run system-wide.
//!
//! Wire sequence once the controller reports flash mode:
//! a 12-byte header `[crc32 LE][length LE][page count LE]`, then the
//! image in 4096-byte chunks with one chunk in flight at a time. Any
//! transport event that is not the done marker acknowledges the previous
//! chunk.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::keys::{FLASH_DONE_MARKER, FLASH_READY_MARKER, VALUE_OFF};

/// Size of one firmware chunk on the wire.
pub const CHUNK_SIZE: usize = 4096;

/// Flash page size used to derive the page count in the header.
pub const PAGE_SIZE: usize = 256;

/// Unconfirmed version observations before completion is forced.
pub const MAX_VERSION_CHECKS: u8 = 3;

/// Default time without any transport event before the transfer aborts.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Transfer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No transfer running.
    #[default]
    Idle,
    /// Waiting for the controller to report flash mode.
    AwaitingFlashMode,
    /// Streaming chunks, one in flight.
    Streaming,
    /// All chunks sent; waiting for the new version to be reported.
    AwaitingCompletion,
}

/// IO or state action requested by the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareOp {
    /// Ask the controller to enter flash mode (normal field write).
    RequestFlashMode,
    /// Suspend normal outgoing updates.
    SuspendUpdates,
    /// Resume normal outgoing updates.
    ResumeUpdates,
    /// Write these bytes to the active device transport.
    Write(Bytes),
    /// A chunk was acknowledged.
    Progress { sent: usize, total: usize },
    /// Transfer confirmed complete.
    Finished,
    /// Transfer aborted.
    Failed { reason: String },
}

/// Drives one firmware image to the active controller.
#[derive(Debug, Default)]
pub struct FirmwareUpdater {
    phase: Phase,
    image: Bytes,
    cursor: usize,
    chunks_sent: usize,
    total_chunks: usize,
    checksum: u32,
    idle_for: Duration,
    stall_timeout: Duration,
    version_checks: u8,
}

impl FirmwareUpdater {
    /// Creates an idle updater with the default stall timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            ..Self::default()
        }
    }

    /// Overrides the stall timeout.
    pub fn set_stall_timeout(&mut self, timeout: Duration) {
        self.stall_timeout = timeout;
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns true while a transfer is running.
    #[must_use]
    pub const fn in_progress(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Expected total chunk count for the loaded image.
    #[must_use]
    pub const fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Starts a transfer with an image already read from disk.
    ///
    /// `already_in_flash` skips the flash-mode request when the
    /// controller reported flash mode before the transfer started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransferInProgress`] if a transfer is running.
    pub fn start(&mut self, image: Bytes, already_in_flash: bool) -> Result<Vec<FirmwareOp>> {
        if self.in_progress() {
            return Err(Error::TransferInProgress);
        }

        self.checksum = crc32fast::hash(&image);
        self.total_chunks = image.len() / CHUNK_SIZE + 1;
        self.cursor = 0;
        self.chunks_sent = 0;
        self.version_checks = 0;
        self.idle_for = Duration::ZERO;
        self.image = image;

        tracing::info!(
            bytes = self.image.len(),
            chunks = self.total_chunks,
            checksum = self.checksum,
            "starting firmware transfer"
        );

        if already_in_flash {
            self.phase = Phase::Streaming;
            Ok(vec![FirmwareOp::SuspendUpdates, FirmwareOp::Write(self.header())])
        } else {
            self.phase = Phase::AwaitingFlashMode;
            Ok(vec![FirmwareOp::RequestFlashMode])
        }
    }

    /// Handles a raw transport event from the active device.
    pub fn on_transport_text(&mut self, text: &str) -> Vec<FirmwareOp> {
        match self.phase {
            Phase::AwaitingFlashMode => {
                if text == FLASH_READY_MARKER {
                    self.idle_for = Duration::ZERO;
                    self.phase = Phase::Streaming;
                    return vec![FirmwareOp::SuspendUpdates, FirmwareOp::Write(self.header())];
                }
                Vec::new()
            }
            Phase::Streaming => {
                self.idle_for = Duration::ZERO;

                if text == FLASH_DONE_MARKER || self.chunks_sent >= self.total_chunks {
                    self.phase = Phase::AwaitingCompletion;
                    tracing::info!(sent = self.chunks_sent, "firmware streaming finished");
                    return vec![FirmwareOp::ResumeUpdates];
                }

                let end = (self.cursor + CHUNK_SIZE).min(self.image.len());
                let chunk = self.image.slice(self.cursor..end);
                self.cursor = end;
                self.chunks_sent += 1;

                vec![
                    FirmwareOp::Write(chunk),
                    FirmwareOp::Progress {
                        sent: self.chunks_sent,
                        total: self.total_chunks,
                    },
                ]
            }
            Phase::Idle | Phase::AwaitingCompletion => Vec::new(),
        }
    }

    /// Polls the reported firmware version after streaming.
    ///
    /// Any non-default value confirms completion; the controller may take
    /// several frames to report its new version, so after
    /// [`MAX_VERSION_CHECKS`] unconfirmed observations completion is
    /// forced anyway.
    pub fn on_version_report(&mut self, version: &str) -> Vec<FirmwareOp> {
        if self.phase != Phase::AwaitingCompletion {
            return Vec::new();
        }

        if !version.is_empty() && version != VALUE_OFF && version != "unknown" {
            return self.finish();
        }

        self.version_checks += 1;
        if self.version_checks >= MAX_VERSION_CHECKS {
            return self.finish();
        }

        Vec::new()
    }

    /// Advances the stall watchdog.
    ///
    /// A transfer that sees no transport event for the stall timeout is
    /// aborted and normal sends resume; the controller is left as-is and
    /// needs a fresh transfer attempt.
    pub fn tick(&mut self, dt: Duration) -> Vec<FirmwareOp> {
        if !matches!(self.phase, Phase::AwaitingFlashMode | Phase::Streaming) {
            return Vec::new();
        }

        self.idle_for += dt;
        if self.idle_for <= self.stall_timeout {
            return Vec::new();
        }

        let reason = format!(
            "no response for {}s during {:?}",
            self.stall_timeout.as_secs(),
            self.phase
        );
        tracing::error!(%reason, "firmware transfer aborted");
        self.reset();
        vec![FirmwareOp::ResumeUpdates, FirmwareOp::Failed { reason }]
    }

    /// Cancels a running transfer.
    pub fn cancel(&mut self) -> Vec<FirmwareOp> {
        if !self.in_progress() {
            return Vec::new();
        }

        tracing::info!("firmware transfer cancelled");
        self.reset();
        vec![FirmwareOp::ResumeUpdates]
    }

    fn finish(&mut self) -> Vec<FirmwareOp> {
        self.reset();
        vec![FirmwareOp::Finished]
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.image = Bytes::new();
        self.cursor = 0;
        self.chunks_sent = 0;
        self.version_checks = 0;
        self.idle_for = Duration::ZERO;
    }

    /// Builds the 12-byte transfer header.
    fn header(&self) -> Bytes {
        let page_count = self.image.len().div_ceil(PAGE_SIZE);

        let mut buf = BytesMut::with_capacity(12);
        buf.put_u32_le(self.checksum);
        buf.put_u32_le(self.image.len() as u32);
        buf.put_u32_le(page_count as u32);
        buf.freeze()
    }
}
