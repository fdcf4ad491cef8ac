//! Protocol definitions for controller communication.
//!
//! This module contains the low-level protocol pieces:
//! - the key/value frame codec and inbound frame accumulation
//! - reserved field keys and out-of-band flash markers

pub mod codec;
pub mod keys;

pub use codec::{FrameAccumulator, KEEPALIVE_FRAME, decode, encode};
pub use keys::{FLASH_DONE_MARKER, FLASH_READY_FRAGMENT, FLASH_READY_MARKER, is_truthy};
