//! Reserved field keys and wire markers.

/// Controller identity field; value is quoted on the wire.
pub const KEY_CONTROLLER_ID: &str = "UCID";

/// Free-text field; value is quoted on the wire.
pub const KEY_TEXT_FIELD: &str = "FEFT";

/// Flash-mode flag on HPC100 controllers ("1.00" when active).
pub const KEY_FLASH_HPC: &str = "FLSH";

/// Flash-mode flag on TPC300 controllers ("rdy" when active).
pub const KEY_FLASH_TPC: &str = "flash";

/// Firmware version reported by the controller.
pub const KEY_FIRMWARE_VERSION: &str = "UCSV";

/// Device-resident capture toggle.
pub const KEY_CAPTURE_TOGGLE: &str = "ZPLJ";

/// SD card missing flag ("1.00" when the medium is absent).
pub const KEY_SD_MISSING: &str = "SDNM";

/// Fan 1 current (amps).
pub const KEY_FAN1_CURRENT: &str = "L1A";

/// Fan 2 current (amps).
pub const KEY_FAN2_CURRENT: &str = "L2A";

/// Peltier current (amps).
pub const KEY_PELTIER_CURRENT: &str = "PLA";

/// Keys whose values are quoted when encoding.
pub const QUOTED_KEYS: [&str; 2] = [KEY_CONTROLLER_ID, KEY_TEXT_FIELD];

/// Out-of-band marker sent by a controller that entered flash mode.
pub const FLASH_READY_MARKER: &str = "{\"flash\":\"rdy\"}";

/// Out-of-band marker sent by a controller that consumed the full image.
pub const FLASH_DONE_MARKER: &str = "{\"flash\":\"done\"}";

/// Fragment that marks a frame as coming from a flash-mode controller.
pub const FLASH_READY_FRAGMENT: &str = "\"flash\":\"rdy\"";

/// Canonical truthy wire value.
pub const VALUE_ON: &str = "1.00";

/// Canonical falsy wire value.
pub const VALUE_OFF: &str = "0.00";

/// Interprets a wire value as a boolean.
///
/// Controllers report booleans in several spellings depending on the
/// firmware revision.
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "1.00" | "true" | "True" | "On" | "ON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_spellings() {
        for v in ["1", "1.00", "true", "True", "On", "ON"] {
            assert!(is_truthy(v), "{v} should be truthy");
        }
        for v in ["0", "0.00", "false", "off", ""] {
            assert!(!is_truthy(v), "{v} should be falsy");
        }
    }
}
