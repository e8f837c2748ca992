//! MAC engine collaborator interface
//!
//! The LoRaWAN protocol itself (channel plan, data rate selection, frame
//! encryption, receive windows, radio control) lives behind [`MacEngine`].
//! The device only issues thin requests and pumps the engine; the engine
//! reports progress through event codes queued during [`MacEngine::pump_once`].

/// Engine event codes
pub mod event;

use core::fmt;

use bitflags::bitflags;
use heapless::Deque;

use crate::config::{AESKey, Configuration, EUI64};

pub use event::{EngineEvent, EventCode, UnknownEvent};

/// Maximum number of events one engine step may raise
pub const EVENT_QUEUE_SIZE: usize = 8;

/// Events raised during a single engine step
pub type EventQueue = Deque<EventCode, EVENT_QUEUE_SIZE>;

/// Session keys in the engine's representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
    /// Network id
    pub net_id: u32,
    /// Device address
    pub dev_addr: u32,
    /// Network session key
    pub nwk_key: AESKey,
    /// Application session key
    pub art_key: AESKey,
}

bitflags! {
    /// Outcome flags of the last transmit/receive exchange
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TxRxFlags: u8 {
        /// Confirmed uplink was acknowledged
        const ACK = 0x80;
        /// Confirmed uplink was not acknowledged
        const NACK = 0x40;
        /// Downlink carried no port
        const NO_PORT = 0x20;
        /// Downlink carried a port
        const PORT = 0x10;
        /// Downlink received in the first window
        const DNW1 = 0x02;
        /// Downlink received in the second window
        const DNW2 = 0x01;
    }
}

/// Report of the last completed transmission, read on TxComplete
#[derive(Debug, Clone, Copy)]
pub struct TxReport<'a> {
    /// Uplink counter after the transmission
    pub seqno_up: u32,
    /// Exchange flags
    pub flags: TxRxFlags,
    /// Raw frame buffer of the last downlink
    pub frame: &'a [u8],
    /// Offset of the application payload in `frame`
    pub data_beg: usize,
    /// Length of the application payload
    pub data_len: usize,
    /// Downlink port, if the frame carried one
    pub port: Option<u8>,
    /// RSSI of the last downlink in dBm
    pub rssi: i16,
    /// SNR of the last downlink in dB
    pub snr: i8,
}

impl<'a> TxReport<'a> {
    /// Application payload of the downlink, `None` when there is none or the
    /// reported window lies outside the frame
    pub fn payload(&self) -> Option<&'a [u8]> {
        if self.data_len == 0 {
            return None;
        }
        let end = self.data_beg.checked_add(self.data_len)?;
        self.frame.get(self.data_beg..end)
    }
}

/// Credentials the engine reads while joining
pub trait CredentialSupplier {
    /// Device EUI, least significant byte first
    fn dev_eui_le(&self) -> Option<EUI64>;

    /// Application EUI, least significant byte first
    fn app_eui_le(&self) -> Option<EUI64>;

    /// Application root key
    fn dev_key(&self) -> Option<AESKey>;
}

/// External LoRaWAN MAC engine
///
/// Events reach the device two ways: queued into the `events` argument of
/// [`MacEngine::pump_once`], or raised through an
/// [`EventBridge`](crate::EventBridge) at any time. Every method but `init` is
/// called with the device state lock held, and an event raised through the
/// bridge from inside one of them (LMIC reports `EV_JOINING` from
/// `LMIC_startJoining`) is dispatched after the method returns and the
/// requested transition has been applied, before the lock is released.
/// Implementations must not wait for another thread to dispatch an event.
pub trait MacEngine {
    /// Error type for engine operations
    type Error: fmt::Debug;

    /// Initialize the engine and its radio hardware
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Reset the MAC state. Session and pending transfers are discarded.
    fn reset_mac_state(&mut self);

    /// Forget the current network session
    fn unjoin(&mut self);

    /// Start the OTAA join procedure. Credentials are read later via
    /// the supplier passed to [`MacEngine::pump_once`].
    fn start_joining(&mut self);

    /// Install session keys without a handshake
    fn set_session(&mut self, keys: &SessionKeys);

    /// Apply engine tuning
    fn configure(&mut self, config: &Configuration);

    /// Queue an uplink. `WouldBlock` means a transaction is still pending.
    fn set_tx_data(&mut self, port: u8, payload: &[u8], confirm: bool) -> nb::Result<(), Self::Error>;

    /// Set the uplink frame counter
    fn set_sequence_number_up(&mut self, seqno: u32);

    /// Whether a transmit/receive transaction is in flight
    fn tx_pending(&self) -> bool;

    /// Advance the engine by one non-blocking step
    fn pump_once(&mut self, credentials: &dyn CredentialSupplier, events: &mut EventQueue);

    /// Keys of the current session
    fn session_keys(&self) -> SessionKeys;

    /// Report of the last transmission
    fn tx_report(&self) -> TxReport<'_>;
}
