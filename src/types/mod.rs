//! Data structures shared across the engine.

pub mod device;

pub use device::{ControllerFamily, DeviceId};

use std::collections::HashMap;

/// Field key/value mapping as decoded from one wire frame.
pub type FieldMap = HashMap<String, String>;
