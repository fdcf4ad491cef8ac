//! # xpclink
//!
//! Communication engine for TPC300 and HPC100 hardware controllers over
//! USB/Serial links.
//!
//! The engine discovers attached controllers, keeps one transport per
//! device, decodes the key/value frame protocol, and exposes controller
//! state through a shared value store. Outgoing field writes are diffed
//! and batched, firmware images are streamed in chunks, and periodic
//! data captures run on a cooperative scheduler.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Multi-device discovery with a single active device
//! - Event-driven architecture for UI notifications
//! - Connection-health tracking with automatic recovery
//! - Chunked firmware transfer with progress reporting
//!
//! ## Quick Start
//!
//! ```no_run
//! use xpclink::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), xpclink::Error> {
//!     // Engine backed by the system serial ports.
//!     let mut engine = Engine::serial();
//!     let mut events = engine.subscribe();
//!     let shutdown = engine.shutdown_handle();
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     // Runs discovery, keepalives, captures and health checks until
//!     // `shutdown.shutdown()` is called.
//!     engine.run().await?;
//!     drop(shutdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Frame codec and the controller field vocabulary
//! - [`types`] - Data structures (device identity, controller families)
//! - [`transport`] - Transport implementations (currently USB/Serial)
//! - [`event`] - Async event system for notifications
//! - [`mux`] - Device roster for the multiplexer
//! - [`store`] - Shared key/value state store
//! - [`updates`] - Outgoing update batcher
//! - [`health`] - Per-device connection watchdog
//! - [`firmware`] - Chunked firmware transfer
//! - [`recording`] - Periodic data-capture scheduler
//! - [`export`] - Export rows for host-side captures
//! - [`engine`] - High-level [`Engine`]

pub mod engine;
pub mod error;
pub mod event;
pub mod export;
pub mod firmware;
pub mod health;
pub mod mux;
pub mod protocol;
pub mod recording;
pub mod store;
pub mod transport;
pub mod types;
pub mod updates;

#[cfg(test)]
mod testutil;

// Re-exports for convenience
pub use engine::{Engine, EngineConfig, ShutdownHandle};
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use recording::CaptureSettings;
pub use types::{ControllerFamily, DeviceId, FieldMap};
