//! Device error type

use core::fmt;

use thiserror::Error;

use crate::config::CredentialError;
use crate::device::DeviceState;

/// LoRaWAN device error type
#[derive(Debug, Error)]
pub enum DeviceError<E: fmt::Debug> {
    /// Malformed hex or wrong length on provisioning
    #[error("invalid credential format: {0}")]
    InvalidCredentialFormat(#[from] CredentialError),
    /// Operation not allowed in the current state
    #[error("can't {operation} in state {state}")]
    InvalidStateTransition {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: DeviceState,
    },
    /// Join requested without an OTAA identity
    #[error("no OTAA identity provisioned")]
    MissingIdentity,
    /// A background driver is already running
    #[error("background driver already running")]
    DriverRunning,
    /// Engine reports a pending transaction
    #[error("engine has a pending transaction")]
    EngineBusy,
    /// Engine or radio initialization failed
    #[error("engine initialization failed: {0:?}")]
    EngineInitFailure(E),
    /// Engine rejected a request
    #[error("engine error: {0:?}")]
    Engine(E),
    /// Port outside the application range
    #[error("invalid application port {0}")]
    InvalidPort(u8),
    /// Payload exceeds the maximum frame payload
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Submitted length
        len: usize,
        /// Maximum length
        max: usize,
    },
    /// Called from inside a message callback
    #[error("send and poll can't be called from a message callback")]
    Reentrant,
    /// Background driver thread couldn't be started
    #[error("failed to spawn background driver: {0}")]
    DriverSpawn(#[from] std::io::Error),
}

impl<E: fmt::Debug> From<nb::Error<E>> for DeviceError<E> {
    fn from(error: nb::Error<E>) -> Self {
        match error {
            nb::Error::WouldBlock => DeviceError::EngineBusy,
            nb::Error::Other(e) => DeviceError::Engine(e),
        }
    }
}
