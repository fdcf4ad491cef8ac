//! Last-known field values per device plus the active-device mirror.
//!
//! Lookups never fail: an unknown field or an unparsable number is logged
//! as a warning and replaced with the caller's default. Parse noise is an
//! expected property of the channel, not an error condition.

use std::collections::HashMap;

use crate::types::FieldMap;

/// Holds decoded field values for every device in the roster.
#[derive(Debug, Default)]
pub struct ValueStore {
    active: FieldMap,
    by_device: HashMap<String, FieldMap>,
}

impl ValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active-device mirror.
    pub fn set_active(&mut self, values: FieldMap) {
        self.active = values;
    }

    /// Replaces the last-known values for one device.
    pub fn set_for_device(&mut self, serial: &str, values: FieldMap) {
        self.by_device.insert(serial.to_owned(), values);
    }

    /// Returns the active-device mirror.
    #[must_use]
    pub const fn active(&self) -> &FieldMap {
        &self.active
    }

    /// Gets a field of the active device, falling back to `default`.
    #[must_use]
    pub fn get(&self, field: &str, default: &str) -> String {
        let field = field.replace(' ', "");
        match self.active.get(&field) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => {
                tracing::warn!(field, "field not present in active values");
                default.to_owned()
            }
        }
    }

    /// Gets a field of the active device as a float, falling back to `default`.
    #[must_use]
    pub fn get_float(&self, field: &str, default: f32) -> f32 {
        match self.active.get(field) {
            Some(value) if !value.is_empty() => parse_float(field, value, default),
            _ => {
                tracing::warn!(field, "field not present in active values");
                default
            }
        }
    }

    /// Gets a field of a specific device, falling back to `default`.
    #[must_use]
    pub fn get_for_device(&self, serial: &str, field: &str, default: &str) -> String {
        match self.by_device.get(serial).and_then(|v| v.get(field)) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => {
                tracing::warn!(serial, field, "field not present for device");
                default.to_owned()
            }
        }
    }

    /// Gets a field of a specific device as a float, falling back to `default`.
    #[must_use]
    pub fn get_float_for_device(&self, serial: &str, field: &str, default: f32) -> f32 {
        match self.by_device.get(serial).and_then(|v| v.get(field)) {
            Some(value) if !value.is_empty() => parse_float(field, value, default),
            _ => default,
        }
    }
}

fn parse_float(field: &str, value: &str, default: f32) -> f32 {
    value.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(field, value, "value is not a number");
        default
    })
}
