//! Export records produced by host-side captures.
//!
//! The engine only builds row values; persisting them (spreadsheet
//! writing) is the [`ExportSink`] collaborator's job.

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::protocol::keys::{
    KEY_FAN1_CURRENT, KEY_FAN2_CURRENT, KEY_PELTIER_CURRENT, KEY_SD_MISSING,
};
use crate::store::ValueStore;
use crate::types::ControllerFamily;

/// Pseudo-key resolved as the sum of the current-sense fields.
pub const DERIVED_CURRENT_KEY: &str = "CurrentOverall";

/// Condition attached to an export field.
///
/// When the requirement is not met the alternate text is exported
/// instead of the field value.
#[derive(Debug, Clone)]
pub struct Requirement {
    /// Field key to check.
    pub key: String,
    /// Value to compare against.
    pub value: String,
    /// True: require equality; false: require inequality.
    pub check_equal: bool,
    /// Text substituted when the requirement fails.
    pub alternate_text: String,
}

impl Requirement {
    fn met(&self, actual: &str) -> bool {
        if self.check_equal {
            actual == self.value
        } else {
            actual != self.value
        }
    }
}

/// One column of an export row.
#[derive(Debug, Clone)]
pub struct ExportField {
    /// Field key, or [`DERIVED_CURRENT_KEY`].
    pub key: String,
    /// Column header.
    pub header: String,
    /// Unit suffix appended to the value.
    pub suffix: String,
    /// Optional requirement with alternate text.
    pub requirement: Option<Requirement>,
}

impl ExportField {
    /// Creates a plain field column.
    #[must_use]
    pub fn new(key: impl Into<String>, header: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            header: header.into(),
            suffix: suffix.into(),
            requirement: None,
        }
    }

    /// Attaches a requirement to this column.
    #[must_use]
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }
}

/// Configured columns for one controller family.
#[derive(Debug, Clone, Default)]
pub struct ExportSpec {
    /// Columns in export order.
    pub fields: Vec<ExportField>,
}

impl ExportSpec {
    /// Default columns for TPC300 controllers.
    #[must_use]
    pub fn tpc300_default() -> Self {
        Self {
            fields: vec![
                ExportField::new("SYST", "Mode", ""),
                ExportField::new("PGTR", "Target", " °C"),
                ExportField::new(KEY_FAN1_CURRENT, "Fan 1 Current", " A"),
                ExportField::new(KEY_FAN2_CURRENT, "Fan 2 Current", " A"),
                ExportField::new(KEY_PELTIER_CURRENT, "Peltier Current", " A"),
                ExportField::new(DERIVED_CURRENT_KEY, "Current Overall", " A"),
            ],
        }
    }

    /// Default columns for HPC100 controllers.
    #[must_use]
    pub fn hpc100_default() -> Self {
        Self {
            fields: vec![
                ExportField::new("SYST", "Mode", ""),
                ExportField::new("PGTR", "Target", " %"),
                ExportField::new(DERIVED_CURRENT_KEY, "Current Overall", " A"),
                ExportField::new(KEY_SD_MISSING, "SD Missing", ""),
            ],
        }
    }

    /// Returns the default spec for a family.
    #[must_use]
    pub fn for_family(family: ControllerFamily) -> Self {
        match family {
            ControllerFamily::Tpc300 => Self::tpc300_default(),
            ControllerFamily::Hpc100 => Self::hpc100_default(),
        }
    }
}

/// One captured row: timestamp plus one value per configured column.
#[derive(Debug, Clone)]
pub struct ExportRow {
    /// Capture timestamp.
    pub timestamp: DateTime<Local>,
    /// Row index within the capture run.
    pub row: u32,
    /// Values in column order.
    pub values: Vec<String>,
}

/// One entry of the device error log, exported alongside value rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedError {
    /// Device the error belongs to.
    pub serial: String,
    /// Error code (e.g. "ConnectionLost").
    pub code: String,
}

/// Receives export rows; the spreadsheet writer implements this.
pub trait ExportSink: Send {
    /// Writes one row for the named device, plus the errors logged since
    /// the previous row.
    fn write_row(&mut self, serial: &str, row: &ExportRow, errors: &[LoggedError]) -> Result<()>;
}

/// Builds a row from the store state of one device.
#[must_use]
pub fn build_row(spec: &ExportSpec, store: &ValueStore, serial: &str, row: u32) -> ExportRow {
    let mut values = Vec::with_capacity(spec.fields.len());

    for field in &spec.fields {
        let value = if field.key == DERIVED_CURRENT_KEY {
            format!("{:.1}", total_current(store, serial))
        } else {
            store.get_for_device(serial, &field.key, "-")
        };

        let cell = match &field.requirement {
            Some(req) => {
                let actual = store.get_for_device(serial, &req.key, "");
                if req.met(&actual) {
                    format!("{}{}", value, field.suffix)
                } else {
                    req.alternate_text.clone()
                }
            }
            None => format!("{}{}", value, field.suffix),
        };

        values.push(cell);
    }

    ExportRow {
        timestamp: Local::now(),
        row,
        values,
    }
}

/// Sum of the fan and peltier currents for one device.
#[must_use]
pub fn total_current(store: &ValueStore, serial: &str) -> f32 {
    store.get_float_for_device(serial, KEY_FAN1_CURRENT, 0.0)
        + store.get_float_for_device(serial, KEY_FAN2_CURRENT, 0.0)
        + store.get_float_for_device(serial, KEY_PELTIER_CURRENT, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_for(serial: &str, entries: &[(&str, &str)]) -> ValueStore {
        let mut store = ValueStore::new();
        store.set_for_device(
            serial,
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        );
        store
    }

    #[test]
    fn test_build_row_with_suffix_and_default() {
        let store = store_for("A1", &[("PGTR", "21.5")]);
        let spec = ExportSpec {
            fields: vec![
                ExportField::new("PGTR", "Target", " °C"),
                ExportField::new("SYST", "Mode", ""),
            ],
        };

        let row = build_row(&spec, &store, "A1", 0);
        assert_eq!(row.values, vec!["21.5 °C", "-"]);
    }

    #[test]
    fn test_derived_current_sums_sense_fields() {
        let store = store_for("A1", &[("L1A", "0.40"), ("L2A", "0.35"), ("PLA", "2.10")]);
        let spec = ExportSpec {
            fields: vec![ExportField::new(DERIVED_CURRENT_KEY, "Current", " A")],
        };

        let row = build_row(&spec, &store, "A1", 0);
        assert_eq!(row.values, vec!["2.9 A"]);
    }

    #[test]
    fn test_requirement_substitutes_alternate_text() {
        let store = store_for("A1", &[("PGTR", "21.5"), ("SYST", "0.00")]);
        let spec = ExportSpec {
            fields: vec![
                ExportField::new("PGTR", "Target", " °C").with_requirement(Requirement {
                    key: "SYST".into(),
                    value: "1.00".into(),
                    check_equal: true,
                    alternate_text: "off".into(),
                }),
            ],
        };

        let row = build_row(&spec, &store, "A1", 0);
        assert_eq!(row.values, vec!["off"]);
    }

    #[test]
    fn test_requirement_met_keeps_value() {
        let store = store_for("A1", &[("PGTR", "21.5"), ("SYST", "1.00")]);
        let spec = ExportSpec {
            fields: vec![
                ExportField::new("PGTR", "Target", " °C").with_requirement(Requirement {
                    key: "SYST".into(),
                    value: "1.00".into(),
                    check_equal: true,
                    alternate_text: "off".into(),
                }),
            ],
        };

        let row = build_row(&spec, &store, "A1", 0);
        assert_eq!(row.values, vec!["21.5 °C"]);
    }
}
