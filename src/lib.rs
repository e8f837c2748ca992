//! LoRaWAN end-device session management for The Things Network
//!
//! This crate manages the connection lifecycle of a LoRaWAN end device on
//! top of an external MAC engine: credential provisioning, network join,
//! session establishment and uplink/downlink transceiving. The engine itself
//! (channel plan, data rates, frame crypto, receive windows, radio) is a
//! collaborator implementing [`engine::MacEngine`].
//!
//! # Features
//! - OTAA and ABP activation
//! - Background driver pumping the engine on its own thread
//! - Lock-serialized state machine shared between application calls and
//!   engine events
//! - Transmit outcomes and downlinks through an optional callback
//!
//! # Example
//! ```no_run
//! # use simple_ttn::engine::MacEngine;
//! # fn run<E: MacEngine + Send + 'static>(engine: E) -> Result<(), simple_ttn::DeviceError<E::Error>> {
//! use simple_ttn::{Configuration, Device, DeviceState};
//!
//! let device = Device::initialize(engine)?;
//! device.configure(Configuration::default().with_link_check(false));
//! device.provision_otaa(
//!     "0011223344556677",
//!     "8877665544332211",
//!     "000102030405060708090A0B0C0D0E0F",
//! )?;
//! device.join()?;
//!
//! // Later, once joined
//! if device.state() == DeviceState::Ready {
//!     device.send(b"Hello, LoRaWAN!", 1, false)?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Engine event dispatch
pub mod bridge;

/// Device and network configuration
pub mod config;

/// High-level device interface
pub mod device;

/// Background engine driver
pub mod driver;

/// MAC engine collaborator interface
pub mod engine;

/// Error types
pub mod error;

pub use bridge::EventBridge;
pub use config::{Configuration, DataRate};
pub use device::{Device, DeviceState, Downlink, PendingMessage, Status, TxCompletion};
pub use error::DeviceError;
