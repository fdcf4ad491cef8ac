//! Outgoing update batcher.
//!
//! Field writes are accumulated, diffed against the last confirmed value,
//! and coalesced into one frame per send tick. Entries stay pending until
//! the controller echoes the written value back; later writes to the same
//! field replace the pending entry (last request wins).

use std::collections::BTreeMap;

use crate::protocol::codec;
use crate::types::FieldMap;

/// Normalizes a wire value for comparison (decimal comma to dot).
fn normalize(value: &str) -> String {
    value.replace(',', ".")
}

/// Accumulates pending field writes for the active device.
#[derive(Debug)]
pub struct UpdateBatcher {
    pending: BTreeMap<String, String>,
    enabled: bool,
}

impl Default for UpdateBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateBatcher {
    /// Creates an empty batcher with sending enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Queues a field write.
    ///
    /// `confirmed` is the last value the controller reported for the
    /// field, if any. A write equal to the confirmed value cancels any
    /// pending entry instead of enqueueing (nothing to converge).
    pub fn request_write(&mut self, field: &str, value: &str, confirmed: Option<&str>) {
        if field.trim().is_empty() || value.trim().is_empty() {
            return;
        }

        let new_value = normalize(value);

        if let Some(confirmed) = confirmed {
            if !confirmed.trim().is_empty() && new_value == normalize(confirmed) {
                self.pending.remove(field);
                return;
            }
        }

        self.pending.insert(field.to_owned(), new_value);
    }

    /// Removes pending entries echoed back by the controller.
    pub fn confirm(&mut self, values: &FieldMap) {
        self.pending
            .retain(|field, pending| values.get(field).is_none_or(|v| normalize(v) != *pending));
    }

    /// Encodes all pending fields into one frame, or `None` when idle.
    ///
    /// Pending entries are kept: they are resent every tick until the
    /// controller confirms them by echo.
    #[must_use]
    pub fn frame(&self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        Some(codec::encode(
            self.pending.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ))
    }

    /// Returns the pending value for a field, if any.
    #[must_use]
    pub fn pending(&self, field: &str) -> Option<&str> {
        self.pending.get(field).map(String::as_str)
    }

    /// Number of pending writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Enables or disables sending (firmware transfer suspends sends).
    ///
    /// Pending writes survive a disable and resume afterwards.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns true while sending is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent_writes() {
        let mut batcher = UpdateBatcher::new();
        batcher.request_write("ZPLJ", "1.00", None);
        batcher.request_write("ZPLJ", "1.00", None);
        assert_eq!(batcher.len(), 1);
    }

    #[test]
    fn test_diff_suppression() {
        let mut batcher = UpdateBatcher::new();
        batcher.request_write("PGTR", "21.5", Some("21.5"));
        assert!(batcher.is_empty());

        // Comma and dot spell the same number.
        batcher.request_write("PGTR", "21,5", Some("21.5"));
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_write_equal_to_confirmed_cancels_pending() {
        let mut batcher = UpdateBatcher::new();
        batcher.request_write("PGTR", "22.0", Some("21.5"));
        assert_eq!(batcher.pending("PGTR"), Some("22.0"));

        batcher.request_write("PGTR", "21.5", Some("21.5"));
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_last_request_wins() {
        let mut batcher = UpdateBatcher::new();
        batcher.request_write("PGTR", "22.0", Some("21.5"));
        batcher.request_write("PGTR", "23.0", Some("21.5"));
        assert_eq!(batcher.pending("PGTR"), Some("23.0"));
        assert_eq!(batcher.len(), 1);
    }

    #[test]
    fn test_confirm_by_echo() {
        let mut batcher = UpdateBatcher::new();
        batcher.request_write("ZPLJ", "1.00", Some("0.00"));
        batcher.request_write("PGTR", "22.0", None);

        let mut echo = FieldMap::new();
        echo.insert("ZPLJ".into(), "1.00".into());
        batcher.confirm(&echo);

        assert_eq!(batcher.pending("ZPLJ"), None);
        assert_eq!(batcher.pending("PGTR"), Some("22.0"));
    }

    #[test]
    fn test_unrelated_echo_keeps_pending() {
        let mut batcher = UpdateBatcher::new();
        batcher.request_write("ZPLJ", "1.00", Some("0.00"));

        // The controller still reports the old value: not a confirmation.
        let mut echo = FieldMap::new();
        echo.insert("ZPLJ".into(), "0.00".into());
        batcher.confirm(&echo);

        assert_eq!(batcher.pending("ZPLJ"), Some("1.00"));
    }

    #[test]
    fn test_frame_encoding() {
        let mut batcher = UpdateBatcher::new();
        assert_eq!(batcher.frame(), None);

        batcher.request_write("ZPLJ", "1.00", None);
        assert_eq!(batcher.frame().as_deref(), Some("{\"ZPLJ\":1.00}\r\n"));

        // Pending entries survive a frame build; resent until confirmed.
        assert!(batcher.frame().is_some());
    }
}
