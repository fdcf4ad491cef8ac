//! Device identity types.

use std::fmt;

/// The two controller families the engine speaks to.
///
/// The family is derived from the controller id field: an id starting
/// with `h` selects the HPC100 (dehumidifier), anything else the TPC300.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControllerFamily {
    /// TPC300 temperature controller.
    #[default]
    Tpc300,
    /// HPC100 dehumidifier controller.
    Hpc100,
}

impl ControllerFamily {
    /// Derives the family from a controller id value.
    #[must_use]
    pub fn from_controller_id(id: &str) -> Self {
        if id.starts_with('h') {
            Self::Hpc100
        } else {
            Self::Tpc300
        }
    }
}

impl fmt::Display for ControllerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tpc300 => write!(f, "TPC300"),
            Self::Hpc100 => write!(f, "HPC100"),
        }
    }
}

/// Identity of an attached device as reported by the device lister.
///
/// `serial` is the roster key; `dedupe_index` disambiguates devices that
/// report identical vendor/product/serial triples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    /// USB vendor id.
    pub vendor_id: String,
    /// USB product id.
    pub product_id: String,
    /// Device serial / unique id.
    pub serial: String,
    /// Index among devices with an identical triple.
    pub dedupe_index: u32,
    /// Transport address (serial port path, e.g. "/dev/ttyUSB0").
    pub port: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_controller_id() {
        assert_eq!(
            ControllerFamily::from_controller_id("h12"),
            ControllerFamily::Hpc100
        );
        assert_eq!(
            ControllerFamily::from_controller_id("t300"),
            ControllerFamily::Tpc300
        );
        assert_eq!(
            ControllerFamily::from_controller_id(""),
            ControllerFamily::Tpc300
        );
    }
}
